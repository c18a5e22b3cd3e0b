//! Polling loop
//!
//! Live adapters get the fixed read cycle once per interval, one command at a
//! time with a short gap between commands. The simulator instead walks the
//! physical values directly.

use std::sync::Arc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::commands::{Command, POLL_CYCLE};
use super::engine::{CommandEngine, Shared};
use super::ProtocolError;
use crate::demo::DemoSimulator;
use crate::state::EcuProtocol;

/// Commands issued each cycle for the given ECU protocol
pub fn poll_commands(protocol: Option<EcuProtocol>) -> Vec<Command> {
    let mut commands = POLL_CYCLE.to_vec();
    if protocol == Some(EcuProtocol::HondaKLine) {
        commands.push(Command::HondaTable);
    }
    commands
}

fn ticker(shared: &Shared) -> time::Interval {
    let period = shared.config.poll_interval();
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Poll a live adapter until cancelled
///
/// Returns the error that ended polling early, if any.
pub(crate) async fn poll_live(
    engine: Arc<CommandEngine>,
    shared: Arc<Shared>,
    protocol: Option<EcuProtocol>,
    cancel: CancellationToken,
) -> Result<(), ProtocolError> {
    let commands = poll_commands(protocol);
    let gap = shared.config.poll_command_gap();
    let mut ticker = ticker(&shared);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        for (i, command) in commands.iter().enumerate() {
            if i > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = time::sleep(gap) => {}
                }
            }
            if cancel.is_cancelled() || !shared.status().status.adapter_connected() {
                tracing::debug!("Polling cycle aborted");
                return Ok(());
            }
            engine.send(&command.to_string()).await?;
        }
    }
}

/// Drive the simulator until cancelled
pub(crate) async fn poll_simulated(
    shared: Arc<Shared>,
    mut simulator: DemoSimulator,
    cancel: CancellationToken,
) {
    let mut ticker = ticker(&shared);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let next = simulator.step(&shared.state());
        shared.replace_state(next);
    }
}
