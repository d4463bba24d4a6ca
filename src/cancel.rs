//! Hierarchical cancellation scopes.
//!
//! The manager owns a root scope, each broadcaster gets a child, and every
//! processor run gets a grandchild. Cancelling a scope cancels everything
//! below it; cancelling a child leaves its parent running.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::watch;

/// A cloneable handle to one node in the cancellation tree.
#[derive(Clone)]
pub struct CancelScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    tx: watch::Sender<bool>,
    parent: Option<CancelScope>,
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelScope")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancelScope {
    /// Create a root scope.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ScopeInner { tx, parent: None }),
        }
    }

    /// Create a scope that is cancelled together with `self`.
    pub fn child(&self) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ScopeInner {
                tx,
                parent: Some(self.clone()),
            }),
        }
    }

    /// Cancel this scope and all of its descendants.
    pub fn cancel(&self) {
        self.inner.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        if *self.inner.tx.borrow() {
            return true;
        }
        match &self.inner.parent {
            Some(parent) => parent.is_cancelled(),
            None => false,
        }
    }

    /// Resolves once this scope or any ancestor is cancelled.
    pub fn cancelled(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let mut rx = self.inner.tx.subscribe();
            let own = async move {
                // The sender lives in `inner`, which `self` keeps alive.
                let _ = rx.wait_for(|cancelled| *cancelled).await;
            };
            match &self.inner.parent {
                Some(parent) => {
                    tokio::select! {
                        _ = own => {}
                        _ = parent.cancelled() => {}
                    }
                }
                None => own.await,
            }
        })
    }

    /// Sleep for `duration`, returning `false` if the scope was cancelled first.
    pub async fn sleep(&self, duration: std::time::Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn new_scope_is_live() {
        let scope = CancelScope::new();
        assert!(!scope.is_cancelled());
    }

    #[test]
    fn parent_cancels_child() {
        let root = CancelScope::new();
        let child = root.child();
        let grandchild = child.child();
        root.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn child_does_not_cancel_parent() {
        let root = CancelScope::new();
        let child = root.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_after_ancestor_cancel() {
        let root = CancelScope::new();
        let child = root.child().child();

        let waiter = {
            let child = child.clone();
            tokio::spawn(async move { child.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        root.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_when_already_cancelled() {
        let scope = CancelScope::new();
        scope.cancel();
        tokio::time::timeout(Duration::from_millis(100), scope.cancelled())
            .await
            .expect("already cancelled");
    }

    #[tokio::test]
    async fn sleep_reports_interruption() {
        let scope = CancelScope::new();
        assert!(scope.sleep(Duration::from_millis(5)).await);

        let other = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            other.cancel();
        });
        assert!(!scope.sleep(Duration::from_secs(5)).await);
    }
}
