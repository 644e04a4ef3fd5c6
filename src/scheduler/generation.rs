//! Generation tokens for invalidating timers of a superseded session.
//!
//! Every call to [`GenerationCounter::advance`] starts a new generation and
//! hands out a token for it. Timer callbacks hold a token and check
//! [`GenerationToken::is_current`] before touching the session, so a callback
//! that fires after its task set was stopped does nothing, even if it raced
//! the cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared generation counter. Clones observe the same counter.
#[derive(Debug, Clone, Default)]
pub struct GenerationCounter {
    current: Arc<AtomicU64>,
}

impl GenerationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation and return its token.
    ///
    /// All previously issued tokens become stale.
    pub fn advance(&self) -> GenerationToken {
        let id = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        GenerationToken {
            id,
            current: Arc::clone(&self.current),
        }
    }

    /// The current generation number (0 before the first advance).
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }
}

/// Snapshot of one generation.
#[derive(Debug, Clone)]
pub struct GenerationToken {
    id: u64,
    current: Arc<AtomicU64>,
}

impl GenerationToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether no newer generation has started since this token was issued.
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.id
    }
}
