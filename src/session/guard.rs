//! Exactly-once release of the upstream connection.

use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use tracing::debug;

use crate::traits::{ByteStream, HttpError};

/// Flips once. Every later release attempt is a no-op.
#[derive(Debug, Default)]
pub struct ReleaseGuard {
    released: AtomicBool,
}

impl ReleaseGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true only for the first caller.
    pub fn try_release(&self) -> bool {
        self.released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

/// Exclusive owner of an open upstream response body.
///
/// Dropping the body closes the connection. Release happens on the first
/// explicit [`release`](UpstreamHandle::release) or on drop.
pub struct UpstreamHandle {
    body: Option<ByteStream>,
    guard: ReleaseGuard,
    session_id: String,
}

impl UpstreamHandle {
    pub fn new(body: ByteStream, session_id: impl Into<String>) -> Self {
        Self {
            body: Some(body),
            guard: ReleaseGuard::new(),
            session_id: session_id.into(),
        }
    }

    /// Next body chunk, or `None` once the body ended or was released.
    pub async fn next_chunk(&mut self) -> Option<Result<bytes::Bytes, HttpError>> {
        match self.body.as_mut() {
            Some(body) => body.next().await,
            None => None,
        }
    }

    /// Close the upstream connection. Idempotent.
    pub fn release(&mut self) {
        if self.guard.try_release() {
            self.body.take();
            debug!(session_id = %self.session_id, "Released upstream connection");
        }
    }

    pub fn is_released(&self) -> bool {
        self.guard.is_released()
    }
}

impl Drop for UpstreamHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counted_body(drops: Arc<AtomicUsize>) -> ByteStream {
        let counter = DropCounter(drops);
        Box::pin(futures::stream::unfold(counter, |counter| async move {
            Some((Ok(Bytes::from_static(b"data: x\n")), counter))
        }))
    }

    #[test]
    fn test_guard_releases_once() {
        let guard = ReleaseGuard::new();
        assert!(guard.try_release());
        assert!(!guard.try_release());
        assert!(guard.is_released());
    }

    #[tokio::test]
    async fn test_release_is_idempotent_and_closes_body() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut handle = UpstreamHandle::new(counted_body(drops.clone()), "s1");
        assert!(handle.next_chunk().await.is_some());

        handle.release();
        handle.release();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(handle.next_chunk().await.is_none());

        drop(handle);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let drops = Arc::new(AtomicUsize::new(0));
        let handle = UpstreamHandle::new(counted_body(drops.clone()), "s1");
        drop(handle);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
