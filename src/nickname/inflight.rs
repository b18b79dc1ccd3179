//! Per-member edit lock.
//!
//! A member holds at most one [`InFlightPermit`] at a time. Acquisition never
//! waits: a busy member is reported as such and the caller drops the message.
//! The permit removes its entry on drop, so every exit path releases it.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct InFlightSet {
    active: Arc<Mutex<HashSet<String>>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `identity`, or `None` if it already has an edit in flight.
    pub fn try_acquire(&self, identity: &str) -> Option<InFlightPermit> {
        let inserted = self.active.lock().insert(identity.to_string());
        inserted.then(|| InFlightPermit {
            active: Arc::clone(&self.active),
            identity: identity.to_string(),
        })
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.active.lock().contains(identity)
    }

    pub fn len(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scoped claim on one identity.
#[derive(Debug)]
pub struct InFlightPermit {
    active: Arc<Mutex<HashSet<String>>>,
    identity: String,
}

impl InFlightPermit {
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.active.lock().remove(&self.identity);
    }
}
