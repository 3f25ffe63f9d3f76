use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const IGNORED_SUFFIX: &str = "/favicon.ico";

/// Per-identity debounce for access log lines.
///
/// Entries are never evicted; the map grows with the number of distinct
/// URLs and hosts seen over the process lifetime.
#[derive(Debug)]
pub struct LogThrottle {
    interval: Duration,
    last_logged: Mutex<HashMap<String, Instant>>,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_logged: Mutex::new(HashMap::new()),
        }
    }

    pub fn should_log(&self, identity: &str) -> bool {
        self.should_log_at(identity, Instant::now())
    }

    pub fn should_log_at(&self, identity: &str, now: Instant) -> bool {
        if identity.is_empty() || identity.ends_with(IGNORED_SUFFIX) {
            return false;
        }

        let mut last_logged = self.last_logged.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(last) = last_logged.get(identity) {
            if now.saturating_duration_since(*last) < self.interval {
                return false;
            }
        }
        last_logged.insert(identity.to_string(), now);
        true
    }

    pub fn tracked_identities(&self) -> usize {
        self.last_logged.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new(Duration::from_millis(300))
    }
}
