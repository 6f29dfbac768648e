use std::time::{Duration, Instant};

/// Minimum-interval filter: an edge is accepted only if the previous
/// accepted edge is at least `interval` old.
#[derive(Debug, Clone)]
pub struct Debouncer {
    interval: Duration,
    last_accepted: Option<Instant>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_accepted: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn accept(&mut self, at: Instant) -> bool {
        match self.last_accepted {
            Some(last) if at.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_accepted = Some(at);
                true
            }
        }
    }
}
