use crate::nickname::{RandomSource, ThreadRandom};
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Result of an issue request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyIssue {
    /// The member already held this key.
    Existing(String),
    /// A key was drawn and assigned.
    New(String),
}

impl KeyIssue {
    pub fn key(&self) -> &str {
        match self {
            Self::Existing(key) | Self::New(key) => key,
        }
    }
}

struct RegistryState {
    assigned: HashMap<String, String>,
    rng: Box<dyn RandomSource>,
}

/// In-memory key assignments, one per member, for the process lifetime.
///
/// Keys are drawn uniformly from the pool; two members may receive the same
/// key.
pub struct KeyRegistry {
    pool: Vec<String>,
    state: Mutex<RegistryState>,
}

impl KeyRegistry {
    pub fn new(pool: Vec<String>) -> Result<Self> {
        Self::with_random_source(pool, Box::new(ThreadRandom))
    }

    pub fn with_random_source(pool: Vec<String>, rng: Box<dyn RandomSource>) -> Result<Self> {
        if pool.is_empty() {
            anyhow::bail!("key pool is empty");
        }
        Ok(Self {
            pool,
            state: Mutex::new(RegistryState {
                assigned: HashMap::new(),
                rng,
            }),
        })
    }

    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    /// Return the member's key, assigning one on first request.
    pub fn issue(&self, identity: &str) -> KeyIssue {
        let mut state = self.state.lock();
        if let Some(existing) = state.assigned.get(identity) {
            return KeyIssue::Existing(existing.clone());
        }
        let key = self.pool[state.rng.index(self.pool.len())].clone();
        state.assigned.insert(identity.to_string(), key.clone());
        KeyIssue::New(key)
    }

    /// Drop the member's assignment. Returns whether one existed.
    pub fn reset(&self, identity: &str) -> bool {
        self.state.lock().assigned.remove(identity).is_some()
    }

    pub fn assigned(&self, identity: &str) -> Option<String> {
        self.state.lock().assigned.get(identity).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
