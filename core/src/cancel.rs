//! Cooperative cancellation.
//!
//! RULE: The token is checked before a participant's aggregation
//! starts, never during it. A cancelled batch never yields a partial
//! snapshot.

use crate::{
    error::{EngineError, EngineResult},
    types::Ssn,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Err if cancelled, naming the participant that was not started.
    pub fn check(&self, ssn: Ssn) -> EngineResult<()> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled { ssn });
        }
        Ok(())
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancellationToken::new();
        let worker = token.clone();
        assert!(worker.check(Ssn::new(1)).is_ok());
        token.cancel();
        assert!(worker.is_cancelled());
        assert!(matches!(worker.check(Ssn::new(1)), Err(EngineError::Cancelled { .. })));
    }
}
