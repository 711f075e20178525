use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Exclusive access to the device transport.
///
/// USB probing is not reentrant, so every multi-step conversation with the
/// device (a probe, a full booklist build, a staged command) holds the token
/// for its duration. Clones share the same token.
#[derive(Debug, Clone, Default)]
pub struct BusyToken {
    inner: Arc<Mutex<()>>,
}

/// Held while the device is in use; dropping it releases the token.
#[derive(Debug)]
pub struct BusyGuard {
    _guard: OwnedMutexGuard<()>,
}

impl BusyToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the token if nobody holds it.
    pub fn try_acquire(&self) -> Option<BusyGuard> {
        self.inner.clone().try_lock_owned().ok().map(|guard| BusyGuard { _guard: guard })
    }

    /// Wait for the token.
    pub async fn acquire(&self) -> BusyGuard {
        BusyGuard { _guard: self.inner.clone().lock_owned().await }
    }

    pub fn is_busy(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exclusive() {
        let token = BusyToken::new();
        let shared = token.clone();
        let guard = token.try_acquire().unwrap();
        assert!(shared.is_busy());
        assert!(shared.try_acquire().is_none());
        drop(guard);
        assert!(!shared.is_busy());
        let _guard = shared.acquire().await;
        assert!(token.try_acquire().is_none());
    }
}
