use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio_util::sync::CancellationToken;

/// One-shot signal. It goes from unset to broken exactly once and every clone observes it.
#[derive(Debug, Clone, Default)]
pub struct Fuse {
    token: CancellationToken,
    broken: Arc<AtomicBool>,
}

impl Fuse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Breaks the fuse. Returns `true` only for the call that actually broke it.
    pub fn break_once(&self) -> bool {
        if self.broken.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    /// Resolves once the fuse is broken, immediately if it already is.
    pub async fn broken(&self) {
        self.token.cancelled().await
    }
}
