use std::collections::HashMap;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::Instant;
use wire::Capabilities;

use crate::emulator::RunningEmulator;
use crate::store::Reservation;

/// A session proxied to a device server through a local forward port.
pub struct ActiveSession {
    pub id: String,
    pub capabilities: Capabilities,
    pub reservation: Reservation,
    pub serial: String,
    pub forward_port: u16,
    pub emulator: Option<RunningEmulator>,
    last_access: Instant,
}

impl ActiveSession {
    pub fn new(
        id: String,
        capabilities: Capabilities,
        reservation: Reservation,
        serial: String,
        forward_port: u16,
        emulator: Option<RunningEmulator>,
    ) -> Self {
        Self {
            id,
            capabilities,
            reservation,
            serial,
            forward_port,
            emulator,
            last_access: Instant::now(),
        }
    }

    pub fn summary(&self) -> Value {
        json!({ "id": self.id, "capabilities": self.capabilities.to_value() })
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_access)
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, ActiveSession>,
}

impl SessionRegistry {
    pub fn insert(&mut self, session: ActiveSession) {
        tracing::info!(session_id = %session.id, serial = %session.serial, "session started");
        self.sessions.insert(session.id.clone(), session);
    }

    pub fn get(&self, id: &str) -> Option<&ActiveSession> {
        self.sessions.get(id)
    }

    /// Marks the session used and returns its forward port.
    pub fn touch(&mut self, id: &str) -> Option<u16> {
        let session = self.sessions.get_mut(id)?;
        session.last_access = Instant::now();
        Some(session.forward_port)
    }

    pub fn remove(&mut self, id: &str) -> Option<ActiveSession> {
        self.sessions.remove(id)
    }

    pub fn summaries(&self) -> Vec<Value> {
        let mut sessions: Vec<_> = self.sessions.values().collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        sessions.into_iter().map(ActiveSession::summary).collect()
    }

    /// Takes out every session idle for longer than `timeout`.
    pub fn take_expired(&mut self, timeout: Duration) -> Vec<ActiveSession> {
        let now = Instant::now();
        let expired: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.idle_for(now) > timeout)
            .map(|s| s.id.clone())
            .collect();
        expired
            .iter()
            .filter_map(|id| self.sessions.remove(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn drain(&mut self) -> Vec<ActiveSession> {
        self.sessions.drain().map(|(_, s)| s).collect()
    }
}
