//! Per-request signing session state

use serde::{Deserialize, Serialize};

use super::collector::CollectOutcome;
use crate::{Request, Signature};

/// Lifecycle of a signing session
///
/// `Collecting` moves to exactly one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Waiting for enough partial signatures
    Collecting,
    /// Aggregate verified and request confirmed
    Confirmed,
    /// Deadline passed without a verified aggregate
    TimedOut,
}

/// Tracks one request through collection
#[derive(Debug)]
pub struct SigningSession {
    request: Request,
    state: SessionState,
    attempts: usize,
}

impl SigningSession {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            state: SessionState::Collecting,
            attempts: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Enter `Confirmed` with the stored, confirmed request
    pub fn confirm(&mut self, request: Request) {
        if self.state == SessionState::Collecting {
            self.request = request;
            self.state = SessionState::Confirmed;
        }
    }

    pub fn time_out(&mut self) {
        if self.state == SessionState::Collecting {
            self.state = SessionState::TimedOut;
        }
    }

    pub fn into_outcome(self, signatures: Vec<Signature>) -> CollectOutcome {
        CollectOutcome {
            state: self.state,
            request: self.request,
            signatures,
            attempts: self.attempts,
        }
    }
}
