use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::VolumeError;

/// Cooperative cancellation handle.
///
/// Cloning is cheap; all clones observe the same flag. The pipeline polls
/// the token between ICP iterations and between ray-cast and integration
/// chunks, so cancellation latency is bounded by one chunk of work.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Returns `Err(VolumeError::Cancelled)` once cancellation was requested.
    #[inline]
    pub fn check(&self) -> Result<(), VolumeError> {
        if self.is_cancelled() {
            Err(VolumeError::Cancelled)
        } else {
            Ok(())
        }
    }
}
