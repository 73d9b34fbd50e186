// Shared session resource
// One expensive external session (e.g. a logged-in ERP browser) reused across jobs

use crate::port::HandlerError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Opens new sessions on demand
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: Send + Sync + 'static;

    async fn open(&self) -> Result<Self::Session, HandlerError>;
}

struct OpenSession<S> {
    session: Arc<S>,
    opened_at: Instant,
}

/// Session shared by the handlers that need it
///
/// `acquire` hands out the open session while it is younger than the TTL and
/// opens a fresh one otherwise. A lease is an `Arc` and is released on drop;
/// leases taken before an `invalidate` keep their (old) session alive until
/// they are dropped.
pub struct SharedSession<F: SessionFactory> {
    factory: F,
    ttl: Duration,
    current: Mutex<Option<OpenSession<F::Session>>>,
}

impl<F: SessionFactory> SharedSession<F> {
    pub fn new(factory: F, ttl: Duration) -> Self {
        Self {
            factory,
            ttl,
            current: Mutex::new(None),
        }
    }

    /// Get the shared session, opening it if absent or expired
    ///
    /// Concurrent callers wait for a single open instead of racing to log in.
    pub async fn acquire(&self) -> Result<Arc<F::Session>, HandlerError> {
        let mut current = self.current.lock().await;

        if let Some(open) = current.as_ref() {
            if open.opened_at.elapsed() < self.ttl {
                return Ok(Arc::clone(&open.session));
            }
            debug!(
                age_secs = open.opened_at.elapsed().as_secs(),
                "Shared session expired"
            );
        }

        let session = Arc::new(self.factory.open().await?);
        info!(ttl_secs = self.ttl.as_secs(), "Shared session opened");
        *current = Some(OpenSession {
            session: Arc::clone(&session),
            opened_at: Instant::now(),
        });
        Ok(session)
    }

    /// Drop the current session so the next `acquire` opens a new one
    ///
    /// Handlers call this when the session turns out to be dead (logged out,
    /// browser crashed).
    pub async fn invalidate(&self) {
        if self.current.lock().await.take().is_some() {
            info!("Shared session invalidated");
        }
    }

    /// Whether a non-expired session is currently held
    pub async fn is_open(&self) -> bool {
        self.current
            .lock()
            .await
            .as_ref()
            .is_some_and(|open| open.opened_at.elapsed() < self.ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFactory {
        opened: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl SessionFactory for CountingFactory {
        type Session = usize;

        async fn open(&self) -> Result<usize, HandlerError> {
            if self.fail {
                return Err(HandlerError::retryable("login page unreachable"));
            }
            Ok(self.opened.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    fn session(ttl: Duration) -> (SharedSession<CountingFactory>, Arc<AtomicUsize>) {
        let opened = Arc::new(AtomicUsize::new(0));
        let factory = CountingFactory {
            opened: opened.clone(),
            fail: false,
        };
        (SharedSession::new(factory, ttl), opened)
    }

    #[tokio::test]
    async fn test_session_reused_within_ttl() {
        let (shared, opened) = session(Duration::from_secs(60));

        let first = shared.acquire().await.unwrap();
        let second = shared.acquire().await.unwrap();

        assert_eq!(*first, 1);
        assert_eq!(*second, 1);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert!(shared.is_open().await);
    }

    #[tokio::test]
    async fn test_session_reopened_after_expiry() {
        let (shared, opened) = session(Duration::from_millis(20));

        assert_eq!(*shared.acquire().await.unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!shared.is_open().await);
        assert_eq!(*shared.acquire().await.unwrap(), 2);
        assert_eq!(opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reopen() {
        let (shared, _opened) = session(Duration::from_secs(60));

        let lease = shared.acquire().await.unwrap();
        shared.invalidate().await;
        assert!(!shared.is_open().await);

        let fresh = shared.acquire().await.unwrap();
        assert_eq!(*lease, 1, "old lease stays usable");
        assert_eq!(*fresh, 2);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_opens_once() {
        let (shared, opened) = session(Duration::from_secs(60));
        let shared = Arc::new(shared);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let shared = shared.clone();
                tokio::spawn(async move { *shared.acquire().await.unwrap() })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 1);
        }
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_failure_propagates() {
        let shared = SharedSession::new(
            CountingFactory {
                opened: Arc::new(AtomicUsize::new(0)),
                fail: true,
            },
            Duration::from_secs(60),
        );

        let err = shared.acquire().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!shared.is_open().await);
    }
}
