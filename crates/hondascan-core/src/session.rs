//! Scan sessions
//!
//! The backend that stores sessions is external; this module defines the
//! payload the core produces at disconnect and the store interface it calls.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::dtc::DtcRecord;
use crate::state::PhysicalState;

/// Point-in-time copy of the live values and fault codes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    #[serde(flatten)]
    pub state: PhysicalState,
    pub dtcs: Vec<DtcRecord>,
}

/// Session as handed to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewScanSession {
    pub name: String,
    pub adapter_version: Option<String>,
    pub protocol: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub summary: SessionSummary,
}

/// Session as returned by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSession {
    pub id: u64,
    pub name: String,
    pub adapter_version: Option<String>,
    pub protocol: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub summary: SessionSummary,
}

/// Default session name, e.g. "Honda session 14:03:27"
pub fn default_session_name(at: DateTime<Utc>) -> String {
    format!("Honda session {}", at.format("%H:%M:%S"))
}

/// Persistence backend for scan sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a session and return it with its id
    async fn create(&self, session: NewScanSession) -> anyhow::Result<ScanSession>;

    /// All sessions ordered by start time
    async fn list(&self) -> anyhow::Result<Vec<ScanSession>>;

    /// One session by id
    async fn get(&self, id: u64) -> anyhow::Result<Option<ScanSession>>;
}

/// In-process session store
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    next_id: AtomicU64,
    sessions: RwLock<Vec<ScanSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: NewScanSession) -> anyhow::Result<ScanSession> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let stored = ScanSession {
            id,
            name: session.name,
            adapter_version: session.adapter_version,
            protocol: session.protocol,
            started_at: session.started_at,
            ended_at: session.ended_at,
            summary: session.summary,
        };
        self.sessions
            .write()
            .map_err(|e| anyhow::anyhow!("session store poisoned: {e}"))?
            .push(stored.clone());
        Ok(stored)
    }

    async fn list(&self) -> anyhow::Result<Vec<ScanSession>> {
        let mut sessions = self
            .sessions
            .read()
            .map_err(|e| anyhow::anyhow!("session store poisoned: {e}"))?
            .clone();
        sessions.sort_by_key(|s| s.started_at);
        Ok(sessions)
    }

    async fn get(&self, id: u64) -> anyhow::Result<Option<ScanSession>> {
        Ok(self
            .sessions
            .read()
            .map_err(|e| anyhow::anyhow!("session store poisoned: {e}"))?
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(name: &str, started_at: DateTime<Utc>) -> NewScanSession {
        NewScanSession {
            name: name.to_string(),
            adapter_version: Some("ELM327 v2.1".into()),
            protocol: Some("ISO 14230-4 KWP (Honda)".into()),
            started_at,
            ended_at: None,
            summary: SessionSummary {
                state: PhysicalState::default(),
                dtcs: vec![],
            },
        }
    }

    #[test]
    fn test_summary_json_shape() {
        let summary = SessionSummary {
            state: PhysicalState {
                rpm: 3500.0,
                ..Default::default()
            },
            dtcs: vec![DtcRecord::new("P0300")],
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["rpm"], 3500.0);
        assert_eq!(json["dtcs"][0]["code"], "P0300");
    }

    #[tokio::test]
    async fn test_list_ordered_by_start() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        store.create(session("late", now)).await.unwrap();
        store
            .create(session("early", now - Duration::minutes(5)))
            .await
            .unwrap();

        let names: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["early", "late"]);
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let store = MemorySessionStore::new();
        let created = store.create(session("one", Utc::now())).await.unwrap();
        assert_eq!(created.id, 1);
        assert_eq!(store.get(1).await.unwrap().unwrap().name, "one");
        assert!(store.get(42).await.unwrap().is_none());
    }
}
