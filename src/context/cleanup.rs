//! Per-dispatch async cleanup stack.
//!
//! The equivalent of an async exit stack: handlers that acquire scoped
//! resources push an async closure here, and the engine drains the stack on
//! **every** exit path of the invocation — value, stop, block, error, and
//! cancellation-adjacent teardown. Cleanups run in reverse push order.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

type BoxCleanup = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Shared handle to one invocation's cleanup stack.
///
/// Cheap to clone; all clones push into the same stack. The engine owns the
/// drain; handlers only push.
#[derive(Clone, Default)]
pub struct CleanupStack {
    entries: Arc<Mutex<Vec<BoxCleanup>>>,
}

impl CleanupStack {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an async cleanup to run when the invocation exits.
    ///
    /// ## Example
    /// ```rust
    /// use eventvisor::CleanupStack;
    ///
    /// # async fn demo() {
    /// let stack = CleanupStack::new();
    /// stack.push(|| async { /* release the resource */ });
    /// stack.drain().await;
    /// # }
    /// ```
    pub fn push<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: BoxCleanup = Box::new(move || Box::pin(f()));
        self.entries
            .lock()
            .expect("cleanup stack poisoned")
            .push(boxed);
    }

    /// Runs all registered cleanups in reverse push order.
    ///
    /// Draining twice is harmless; the second drain sees an empty stack.
    pub async fn drain(&self) {
        loop {
            let next = {
                let mut entries = self.entries.lock().expect("cleanup stack poisoned");
                entries.pop()
            };
            match next {
                Some(f) => f().await,
                None => break,
            }
        }
    }

    /// Number of pending cleanups.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("cleanup stack poisoned").len()
    }

    /// True when no cleanups are pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_drain_runs_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let stack = CleanupStack::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            stack.push(move || async move {
                order.lock().unwrap().push(i);
            });
        }
        stack.drain().await;
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn test_double_drain_is_noop() {
        let hits = Arc::new(AtomicUsize::new(0));
        let stack = CleanupStack::new();
        let h = Arc::clone(&hits);
        stack.push(move || async move {
            h.fetch_add(1, Ordering::SeqCst);
        });
        stack.drain().await;
        stack.drain().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(stack.is_empty());
    }
}
