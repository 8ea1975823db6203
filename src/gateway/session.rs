//! Gateway Session State
//!
//! The mutable fields describing where the client is in the protocol:
//! last seen sequence, server-assigned session id, and the heartbeat
//! bookkeeping used for missed-ack detection.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Session state shared between the controller and the heartbeat scheduler
pub type SharedSession = Arc<Mutex<SessionState>>;

/// Gateway session state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub last_sequence: Option<u64>,
    pub session_id: Option<String>,
    pub last_heartbeat_sent_at: Option<Instant>,
    pub last_ack_received_at: Option<Instant>,
}

/// Credentials needed to resume a previous session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeCredentials {
    pub session_id: String,
    pub sequence: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedSession {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Record the sequence stamped on an inbound frame.
    ///
    /// Absent sequences never overwrite, and the stored value never
    /// decreases.
    pub fn observe_sequence(&mut self, sequence: Option<u64>) {
        if let Some(seq) = sequence {
            self.last_sequence = Some(self.last_sequence.map_or(seq, |last| last.max(seq)));
        }
    }

    pub fn set_session_id(&mut self, session_id: impl Into<String>) {
        self.session_id = Some(session_id.into());
    }

    /// Both a session id and a sequence are required to resume.
    pub fn resume_credentials(&self) -> Option<ResumeCredentials> {
        match (&self.session_id, self.last_sequence) {
            (Some(session_id), Some(sequence)) => Some(ResumeCredentials {
                session_id: session_id.clone(),
                sequence,
            }),
            _ => None,
        }
    }

    pub fn can_resume(&self) -> bool {
        self.resume_credentials().is_some()
    }

    /// Forget the session so the next handshake is a fresh Identify.
    pub fn clear_session(&mut self) {
        self.last_sequence = None;
        self.session_id = None;
    }

    /// Forget heartbeat bookkeeping from a previous connection.
    pub fn reset_heartbeat(&mut self) {
        self.last_heartbeat_sent_at = None;
        self.last_ack_received_at = None;
    }

    pub fn record_heartbeat_sent(&mut self, at: Instant) {
        self.last_heartbeat_sent_at = Some(at);
    }

    pub fn record_ack(&mut self, at: Instant) {
        self.last_ack_received_at = Some(at);
    }

    /// True when the last heartbeat was sent after the last ack, i.e. the
    /// server never acknowledged it.
    pub fn heartbeat_unacknowledged(&self) -> bool {
        match (self.last_heartbeat_sent_at, self.last_ack_received_at) {
            (Some(sent), Some(acked)) => sent > acked,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}
