//! One-time CSRF state tokens for the identity-provider login flow.
//!
//! The set lives in process memory. A multi-process deployment needs a
//! shared store instead; entries are never purged, only consumed.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::secret::{OsTokenSource, TokenSource};

/// Outstanding state tokens, each valid for exactly one validation.
#[derive(Clone)]
pub struct CsrfStateStore {
    states: Arc<Mutex<HashSet<String>>>,
    source: Arc<dyn TokenSource>,
}

impl CsrfStateStore {
    /// Creates an empty store backed by OS randomness.
    #[must_use]
    pub fn new() -> Self {
        Self::with_token_source(Arc::new(OsTokenSource))
    }

    /// Creates an empty store using `source` to mint states.
    #[must_use]
    pub fn with_token_source(source: Arc<dyn TokenSource>) -> Self {
        Self {
            states: Arc::new(Mutex::new(HashSet::new())),
            source,
        }
    }

    /// Mints and registers a fresh state.
    #[must_use]
    pub fn generate(&self) -> String {
        let state = self.source.generate();
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(state.clone());
        state
    }

    /// Atomically checks and consumes `state`.
    ///
    /// Returns true only for the first validation of an issued state.
    #[must_use]
    pub fn validate(&self, state: &str) -> bool {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(state)
    }

    /// Number of states issued but not yet validated.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for CsrfStateStore {
    fn default() -> Self {
        Self::new()
    }
}
