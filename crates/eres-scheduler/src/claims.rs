//! Per-schedule claims: at most one pipeline per schedule ID at a time.
//!
//! Single-process advisory locks: a claim is taken atomically when a schedule
//! leaves `Due` and released when its guard drops, whatever the outcome.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Set of schedule IDs currently being processed.
#[derive(Clone, Default)]
pub struct ClaimSet {
    active: Arc<Mutex<HashSet<String>>>,
}

impl ClaimSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `schedule_id`. Returns `None` if another pipeline holds it.
    pub fn try_claim(&self, schedule_id: &str) -> Option<Claim> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(schedule_id.to_string()) {
            tracing::debug!("🔒 Schedule {} already claimed", schedule_id);
            return None;
        }
        Some(Claim {
            schedule_id: schedule_id.to_string(),
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_claimed(&self, schedule_id: &str) -> bool {
        self.active
            .lock()
            .map(|a| a.contains(schedule_id))
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().map(|a| a.len()).unwrap_or(0)
    }
}

/// Held for the lifetime of one schedule pipeline.
pub struct Claim {
    schedule_id: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl Claim {
    pub fn schedule_id(&self) -> &str {
        &self.schedule_id
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.schedule_id);
    }
}
