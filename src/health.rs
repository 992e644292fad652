use std::time::{Duration, Instant};

use chrono::Utc;
use uuid::Uuid;

use crate::dispatch::job::DispatchedJob;

/// Periodically inspects dispatched jobs for Runners that stopped reporting.
///
/// The checker only detects: it returns the UUIDs to nullify and the
/// Dispatcher owns the write side.
#[derive(Debug)]
pub struct HealthChecker {
    interval: Duration,
    timeout: Duration,
    last_check: Option<Instant>,
}

impl HealthChecker {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            last_check: None,
        }
    }

    /// One tick. Returns the UUIDs of dispatched jobs whose last update is at
    /// least the timeout old, or nothing when the check interval has not
    /// elapsed since the previous run.
    pub fn run_once(&mut self, dispatched: &[DispatchedJob]) -> Vec<Uuid> {
        if let Some(last) = self.last_check {
            if last.elapsed() < self.interval {
                return Vec::new();
            }
        }
        self.last_check = Some(Instant::now());

        let now = Utc::now();
        dispatched
            .iter()
            .filter(|d| {
                now.signed_duration_since(d.last_updated)
                    .to_std()
                    .map(|age| age >= self.timeout)
                    .unwrap_or(false)
            })
            .map(|d| d.uuid)
            .collect()
    }
}
