// Shutdown signal shared by the poll loops

use tokio::sync::watch;

/// Receiving side: loops select on `wait()` between ticks
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is signalled or the sender is gone
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Sending side, held by whoever owns the loop
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_after_signal() {
        let (tx, mut token) = shutdown_channel();
        assert!(!token.is_shutdown());

        tx.shutdown();
        tokio::time::timeout(Duration::from_secs(1), token.wait())
            .await
            .expect("wait should resolve");
        assert!(token.is_shutdown());
    }

    #[tokio::test]
    async fn test_wait_resolves_when_already_signalled() {
        let (tx, mut token) = shutdown_channel();
        tx.shutdown();
        token.wait().await;
        // A second wait must not hang either
        tokio::time::timeout(Duration::from_secs(1), token.wait())
            .await
            .expect("wait should resolve again");
    }

    #[tokio::test]
    async fn test_dropped_sender_releases_waiters() {
        let (tx, mut token) = shutdown_channel();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), token.wait())
            .await
            .expect("wait should resolve");
    }
}
