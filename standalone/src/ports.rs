use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

/// Pool of even ports in `[min, max]`, handed out lowest first.
pub struct PortAllocator {
    min: u16,
    max: u16,
    free: Mutex<BTreeSet<u16>>,
}

impl PortAllocator {
    pub fn new(min: u16, max: u16) -> Self {
        let free = (min..=max).filter(|port| port % 2 == 0).collect();
        Self {
            min,
            max,
            free: Mutex::new(free),
        }
    }

    /// Pool starting at `base` with room for 16 even ports.
    pub fn with_base(base: u16) -> Self {
        Self::new(base, base.saturating_add(30))
    }

    pub fn next(&self) -> Option<u16> {
        let port = self.lock().pop_first();
        match port {
            Some(port) => tracing::debug!(port, "port allocated"),
            None => tracing::warn!(min = self.min, max = self.max, "port pool exhausted"),
        }
        port
    }

    /// Odd or out-of-range ports are ignored.
    pub fn release(&self, port: u16) {
        if port % 2 != 0 || port < self.min || port > self.max {
            return;
        }
        self.lock().insert(port);
        tracing::debug!(port, "port released");
    }

    pub fn range(&self) -> (u16, u16) {
        (self.min, self.max)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<u16>> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
