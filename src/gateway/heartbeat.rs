//! Heartbeat Scheduler
//!
//! Sends a heartbeat immediately on start and then once per interval. A
//! heartbeat that was never acknowledged by the time the next one is due
//! marks the connection as dead: the scheduler reports it to the
//! controller and stops instead of sending again.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::messages::GatewaySend;
use super::session::SharedSession;
use super::transport::FrameSender;
use crate::infrastructure::metrics;
use crate::shared::error::Result;

/// Shortest interval the timer accepts
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Reports raised by the heartbeat timeline, tagged with the connection
/// generation they belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    MissedAck { generation: u64 },
}

/// Owns the heartbeat timer for the current connection
#[derive(Debug, Default)]
pub struct HeartbeatScheduler {
    task: Option<JoinHandle<()>>,
}

impl HeartbeatScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start beating on `sender` every `period`, replacing any running timer.
    ///
    /// A zero `period` is raised to [`MIN_PERIOD`].
    pub fn start(
        &mut self,
        period: Duration,
        generation: u64,
        session: SharedSession,
        sender: FrameSender,
        events: mpsc::UnboundedSender<HeartbeatEvent>,
    ) -> Result<()> {
        self.stop();
        let period = period.max(MIN_PERIOD);

        session.lock().reset_heartbeat();
        send_heartbeat(&session, &sender)?;

        tracing::debug!(
            generation = generation,
            interval_ms = period.as_millis() as u64,
            "Heartbeats started"
        );

        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let missed = {
                    let mut state = session.lock();
                    if state.heartbeat_unacknowledged() {
                        true
                    } else {
                        let frame = GatewaySend::heartbeat(state.last_sequence);
                        if sender.send(&frame).is_err() {
                            tracing::debug!(generation = generation, "Heartbeat on closed transport");
                            return;
                        }
                        state.record_heartbeat_sent(Instant::now());
                        metrics::record_heartbeat_sent();
                        false
                    }
                };

                if missed {
                    tracing::warn!(generation = generation, "Heartbeat was not acknowledged");
                    let _ = events.send(HeartbeatEvent::MissedAck { generation });
                    return;
                }
            }
        }));

        Ok(())
    }

    /// Cancel the timer. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("Heartbeats stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Send a heartbeat right away, bypassing the ack check.
pub fn send_heartbeat(session: &SharedSession, sender: &FrameSender) -> Result<()> {
    let mut state = session.lock();
    sender.send(&GatewaySend::heartbeat(state.last_sequence))?;
    state.record_heartbeat_sent(Instant::now());
    metrics::record_heartbeat_sent();
    Ok(())
}
