//! Keep-alive accounting for the parent's event loop
//!
//! Every handle that should keep the parent running registers here. The
//! fork session finishes once the count drops to zero, which is how "unref"
//! lets the parent exit while channels and the child are still alive.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::trace;

/// Registry of handles that keep the parent alive
#[derive(Debug, Clone)]
pub struct ActiveHandles {
    count: Arc<watch::Sender<usize>>,
}

impl ActiveHandles {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { count: Arc::new(tx) }
    }

    /// Register a new referenced handle
    pub fn register(&self, label: &'static str) -> HandleRef {
        self.count.send_modify(|count| *count += 1);
        trace!(label, count = self.count(), "Handle referenced");
        HandleRef {
            label,
            registry: self.clone(),
            active: true,
        }
    }

    /// Number of handles currently keeping the parent alive
    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Resolves once no handle keeps the parent alive
    pub async fn idle(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives in `self`, so this cannot fail while we wait.
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    fn release(&self, label: &'static str) {
        self.count.send_modify(|count| *count = count.saturating_sub(1));
        trace!(label, count = self.count(), "Handle unreferenced");
    }
}

impl Default for ActiveHandles {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered handle. Dropping it is the same as [`HandleRef::unref`].
#[derive(Debug)]
pub struct HandleRef {
    label: &'static str,
    registry: ActiveHandles,
    active: bool,
}

impl HandleRef {
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Stop counting this handle. Idempotent.
    pub fn unref(&mut self) {
        if self.active {
            self.active = false;
            self.registry.release(self.label);
        }
    }
}

impl Drop for HandleRef {
    fn drop(&mut self) {
        self.unref();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn register_and_unref() {
        let handles = ActiveHandles::new();
        let mut a = handles.register("a");
        let b = handles.register("b");
        assert_eq!(handles.count(), 2);

        a.unref();
        a.unref();
        assert_eq!(handles.count(), 1);

        drop(b);
        assert_eq!(handles.count(), 0);
    }

    #[tokio::test]
    async fn idle_resolves_immediately_when_empty() {
        let handles = ActiveHandles::new();
        tokio::time::timeout(Duration::from_millis(100), handles.idle())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn idle_waits_for_last_unref() {
        let handles = ActiveHandles::new();
        let mut child = handles.register("child");

        let waiter = {
            let handles = handles.clone();
            tokio::spawn(async move { handles.idle().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        child.unref();
        tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
