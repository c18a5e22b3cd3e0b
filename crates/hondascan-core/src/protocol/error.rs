//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the adapter or the ECU behind it
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("No Bluetooth transport available")]
    NoTransportAvailable,

    #[error("Device selection cancelled")]
    UserCancelled,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Not connected to adapter")]
    NotConnected,

    #[error("Adapter disconnected unexpectedly")]
    UnexpectedDisconnect,

    #[error("No response to '{command}' within {timeout_ms}ms")]
    NoResponse { command: String, timeout_ms: u64 },

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Empty command")]
    EmptyCommand,
}

impl ProtocolError {
    /// Whether this error means the link to the adapter is gone
    pub fn is_link_loss(&self) -> bool {
        matches!(
            self,
            ProtocolError::WriteFailed(_)
                | ProtocolError::UnexpectedDisconnect
                | ProtocolError::NotConnected
        )
    }

    /// Whether this error should be shown as information rather than a failure
    pub fn is_informational(&self) -> bool {
        matches!(self, ProtocolError::UserCancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_loss_classification() {
        assert!(ProtocolError::WriteFailed("broken pipe".into()).is_link_loss());
        assert!(ProtocolError::UnexpectedDisconnect.is_link_loss());
        assert!(!ProtocolError::UserCancelled.is_link_loss());
        assert!(!ProtocolError::NoResponse {
            command: "01 00".into(),
            timeout_ms: 2000
        }
        .is_link_loss());
    }

    #[test]
    fn test_no_response_display() {
        let err = ProtocolError::NoResponse {
            command: "01 00".into(),
            timeout_ms: 2000,
        };
        assert_eq!(err.to_string(), "No response to '01 00' within 2000ms");
    }
}
