//! Caller-driven cancellation of local observation (polling, backoff sleeps).
//!
//! Cancelling never reaches the chain: a broadcast transaction stays in
//! flight, only our waiting for it stops.

use tokio::sync::watch;

/// Fires the paired [`CancelToken`]s.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Observes cancellation. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Create a linked handle/token pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelToken {
    /// A token that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled. Pends forever if the handle is dropped
    /// without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_wakes_waiter() {
        let (handle, token) = cancel_pair();
        assert!(!token.is_cancelled());

        let waiter = tokio::spawn({
            let token = token.clone();
            async move { token.cancelled().await }
        });
        handle.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn token_from_handle_sees_earlier_cancel() {
        let (handle, _token) = cancel_pair();
        handle.cancel();
        let late = handle.token();
        assert!(late.is_cancelled());
        late.cancelled().await;
    }

    #[tokio::test]
    async fn never_token_stays_pending() {
        let token = CancelToken::never();
        let result = tokio::time::timeout(Duration::from_millis(10), token.cancelled()).await;
        assert!(result.is_err());
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn dropped_handle_does_not_cancel() {
        let (handle, token) = cancel_pair();
        drop(handle);
        let result = tokio::time::timeout(Duration::from_millis(10), token.cancelled()).await;
        assert!(result.is_err());
    }
}
