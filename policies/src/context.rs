use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::PolicyError;

/// Cancellation and deadline carried through every public operation.
///
/// Clones share the cancellation flag, so a caller can keep one handle and
/// cancel an operation running with another.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Context {
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails with [`PolicyError::Cancelled`] once cancelled or past the deadline.
    pub fn check(&self) -> Result<(), PolicyError> {
        if self.is_cancelled() {
            return Err(PolicyError::Cancelled {
                reason: "context cancelled".to_string(),
            });
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(PolicyError::Cancelled {
                    reason: "deadline exceeded".to_string(),
                });
            }
        }
        Ok(())
    }
}
