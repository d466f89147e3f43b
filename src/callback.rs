//! Callback registration handles.

use tokio::sync::broadcast;

/// Callback handle for unregistering callbacks.
///
/// Dropping the handle unregisters the callback as well.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandle").field("id", &self.id).finish()
    }
}

/// Forward every event on `rx` to `callback` from a spawned task.
///
/// Must be called from within a tokio runtime.
pub(crate) fn spawn_listener<T, F>(
    id: u64,
    mut rx: broadcast::Receiver<T>,
    callback: F,
) -> CallbackHandle
where
    T: Clone + Send + 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    let handle = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => callback(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event listener {} lagged, skipped {} events", id, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    CallbackHandle::new(id, move || {
        handle.abort();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_drop_unregisters() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        {
            let handle = CallbackHandle::new(7, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            assert_eq!(handle.id(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = CallbackHandle::new(1, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.unregister();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_listener_receives_events() {
        let (tx, rx) = broadcast::channel(8);
        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
        let _handle = spawn_listener(3, rx, move |value: u32| {
            let _ = seen_tx.send(value);
        });

        tx.send(5).unwrap();
        assert_eq!(seen_rx.recv().await, Some(5));
    }
}
