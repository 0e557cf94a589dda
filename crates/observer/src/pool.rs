//! `ObserverPool`: aggregates independent `PodObserver` sessions and merges
//! their reports. Sessions never observe each other — independence across
//! sessions is a deliberate simplification, not an oversight.

use chaoscope_core::prelude::RecoveryReport;

use crate::session::SessionHandle;

#[derive(Default)]
pub struct ObserverPool {
    sessions: Vec<SessionHandle>,
}

impl ObserverPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules a session and returns immediately; the session is already
    /// running by the time this returns.
    pub fn add(&mut self, handle: SessionHandle) {
        self.sessions.push(handle);
    }

    /// Signals every pending session to stop at the next event boundary.
    pub fn cancel(&self) {
        for session in &self.sessions {
            session.cancel();
        }
    }

    /// Awaits every session and merges their reports per `RecoveryReport::merge`.
    pub async fn join(self) -> RecoveryReport {
        let mut merged = RecoveryReport::default();
        for session in self.sessions {
            merged = merged.merge(session.wait().await);
        }
        merged
    }
}
