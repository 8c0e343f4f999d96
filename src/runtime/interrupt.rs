//! Hierarchical interrupt tokens
//!
//! Every fiber owns an [`InterruptToken`]. Tokens form a tree: interrupting a
//! token interrupts every token derived from it with [`InterruptToken::child`],
//! top-down. Interruption is sticky and idempotent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::Notify;

struct TokenState {
    interrupted: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<TokenState>>>,
}

impl TokenState {
    fn new() -> Self {
        Self {
            interrupted: AtomicBool::new(false),
            notify: Notify::new(),
            children: Mutex::new(Vec::new()),
        }
    }

    fn interrupt(&self) {
        if self.interrupted.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_waiters();

        let children = {
            let mut children = self.children.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *children)
        };
        for child in children.iter().filter_map(Weak::upgrade) {
            child.interrupt();
        }
    }
}

/// Cooperative interruption signal shared by a fiber and its handle.
#[derive(Clone)]
pub struct InterruptToken {
    state: Arc<TokenState>,
}

impl InterruptToken {
    pub fn new() -> Self {
        Self {
            state: Arc::new(TokenState::new()),
        }
    }

    /// A token interrupted whenever this one is.
    ///
    /// Deriving from an already interrupted token yields an interrupted token.
    pub fn child(&self) -> InterruptToken {
        let child = InterruptToken::new();
        {
            // The flag is read under the children lock so a concurrent
            // `interrupt` either sees this child or has already set the flag.
            let mut children = self
                .state
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !self.is_interrupted() {
                children.retain(|weak| weak.strong_count() > 0);
                children.push(Arc::downgrade(&child.state));
                return child;
            }
        }
        child.interrupt();
        child
    }

    pub fn interrupt(&self) {
        self.state.interrupt();
    }

    pub fn is_interrupted(&self) -> bool {
        self.state.interrupted.load(Ordering::SeqCst)
    }

    /// Completes once this token is interrupted.
    pub async fn interrupted(&self) {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_interrupted() {
                return;
            }
            notified.await;
        }
    }

    /// Sleeps for `duration` unless interrupted first.
    ///
    /// Returns `true` if the full duration elapsed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.interrupted() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

impl Default for InterruptToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InterruptToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptToken")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_propagates_to_descendants() {
        let root = InterruptToken::new();
        let child = root.child();
        let grandchild = child.child();
        let sibling = InterruptToken::new();

        root.interrupt();

        assert!(child.is_interrupted());
        assert!(grandchild.is_interrupted());
        assert!(!sibling.is_interrupted());
    }

    #[test]
    fn test_child_interrupt_does_not_reach_parent() {
        let root = InterruptToken::new();
        let child = root.child();
        child.interrupt();
        assert!(!root.is_interrupted());
    }

    #[test]
    fn test_child_of_interrupted_token_starts_interrupted() {
        let root = InterruptToken::new();
        root.interrupt();
        root.interrupt();
        assert!(root.child().is_interrupted());
    }

    #[tokio::test]
    async fn test_interrupted_wakes_waiter() {
        let token = InterruptToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.interrupted().await })
        };
        tokio::task::yield_now().await;
        token.interrupt();
        waiter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_reports_interruption() {
        let token = InterruptToken::new();
        assert!(token.sleep(Duration::from_secs(1)).await);

        let sleeper = {
            let token = token.clone();
            tokio::spawn(async move { token.sleep(Duration::from_secs(60)).await })
        };
        tokio::task::yield_now().await;
        token.interrupt();
        assert!(!sleeper.await.unwrap());
    }
}
