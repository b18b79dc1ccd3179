//! Repeat-avoiding nickname selection.
//!
//! One [`NameSelector`] owns the pool, the shared sequential cursor and the
//! last name handed to every member. All of it sits behind a single mutex so
//! concurrent handlers observe a consistent cursor and history.

use super::generator;
use crate::config::SelectionMode;
use crate::util::truncate_chars;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Draws per selection before a repeat is accepted.
pub const MAX_DRAW_ATTEMPTS: usize = 5;

/// Source of uniform indices. Injectable so tests can script draws.
pub trait RandomSource: Send {
    /// Uniform index in `0..len`. `len` is never zero.
    fn index(&mut self, len: usize) -> usize;
}

/// Production randomness backed by the thread-local `rand` generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn index(&mut self, len: usize) -> usize {
        rand::random_range(0..len)
    }
}

struct SelectorState {
    cursor: usize,
    last_by_identity: HashMap<String, String>,
    rng: Box<dyn RandomSource>,
}

/// Stateful nickname picker.
pub struct NameSelector {
    pool: Vec<String>,
    mode: SelectionMode,
    max_chars: usize,
    state: Mutex<SelectorState>,
}

impl NameSelector {
    pub fn new(pool: Vec<String>, mode: SelectionMode, max_chars: usize) -> Self {
        Self::with_random_source(pool, mode, max_chars, Box::new(ThreadRandom))
    }

    pub fn with_random_source(
        pool: Vec<String>,
        mode: SelectionMode,
        max_chars: usize,
        rng: Box<dyn RandomSource>,
    ) -> Self {
        Self {
            pool,
            mode,
            max_chars,
            state: Mutex::new(SelectorState {
                cursor: 0,
                last_by_identity: HashMap::new(),
                rng,
            }),
        }
    }

    /// True when names are generated rather than taken from the pool.
    pub fn is_procedural(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// Pick the next nickname for `identity` and remember it.
    ///
    /// Sequential mode ignores the history and simply advances the shared
    /// cursor. Random and procedural modes retry up to [`MAX_DRAW_ATTEMPTS`]
    /// times to avoid the identity's previous name, then accept the last draw.
    pub fn select(&self, identity: &str) -> String {
        let mut guard = self.state.lock();
        let SelectorState {
            cursor,
            last_by_identity,
            rng,
        } = &mut *guard;
        let previous = last_by_identity.get(identity).map(String::as_str);

        let name = if self.pool.is_empty() {
            draw_avoiding(previous, self.max_chars, || generator::generate(&mut **rng))
        } else {
            match self.mode {
                SelectionMode::Sequential => {
                    let name = &self.pool[*cursor % self.pool.len()];
                    *cursor = (*cursor + 1) % self.pool.len();
                    truncate_chars(name, self.max_chars)
                }
                SelectionMode::Random => draw_avoiding(previous, self.max_chars, || {
                    self.pool[rng.index(self.pool.len())].clone()
                }),
            }
        };

        last_by_identity.insert(identity.to_string(), name.clone());
        name
    }

    /// Last nickname handed to `identity`, if any.
    pub fn last_name(&self, identity: &str) -> Option<String> {
        self.state.lock().last_by_identity.get(identity).cloned()
    }

    /// Number of identities with a remembered nickname.
    pub fn tracked_identities(&self) -> usize {
        self.state.lock().last_by_identity.len()
    }
}

fn draw_avoiding<F>(previous: Option<&str>, max_chars: usize, mut draw: F) -> String
where
    F: FnMut() -> String,
{
    let mut candidate = String::new();
    for _ in 0..MAX_DRAW_ATTEMPTS {
        candidate = truncate_chars(&draw(), max_chars);
        if previous != Some(candidate.as_str()) {
            break;
        }
    }
    candidate
}
