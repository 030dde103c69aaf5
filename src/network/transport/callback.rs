//! The transport's single inbound contract (spec 4.4): `on_envelope`.
//!
//! The callback must be thread-safe and the transport invokes it from its
//! own worker tasks; a mutex guards the callback pointer and is held
//! across each invocation so that shutting the transport down can never
//! race a worker into calling a freed callback.

use std::sync::Arc;
use tokio::sync::Mutex;

/// `sender_hint` is advisory only — the recipient re-derives sender
/// identity by trial-verifying the envelope's signature
/// (`Envelope::identify_sender`), never by trusting this hint.
pub type EnvelopeCallback = Box<dyn Fn(Option<String>, Vec<u8>) + Send + Sync + 'static>;

/// Holds the current callback behind a mutex that is held for the duration
/// of each invocation, so a concurrent `set` (e.g. during shutdown, setting
/// it to `None`) cannot free the closure mid-call.
#[derive(Clone)]
pub struct SharedCallback {
    inner: Arc<Mutex<Option<EnvelopeCallback>>>,
}

impl SharedCallback {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn set(&self, callback: EnvelopeCallback) {
        *self.inner.lock().await = Some(callback);
    }

    pub async fn clear(&self) {
        *self.inner.lock().await = None;
    }

    /// Invoke the callback, if one is registered, while holding the lock.
    pub async fn invoke(&self, sender_hint: Option<String>, bytes: Vec<u8>) {
        let guard = self.inner.lock().await;
        if let Some(callback) = guard.as_ref() {
            callback(sender_hint, bytes);
        }
    }
}

impl Default for SharedCallback {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn invokes_registered_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let shared = SharedCallback::new();
        shared
            .set(Box::new(move |_hint, _bytes| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .await;
        shared.invoke(None, vec![1, 2, 3]).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cleared_callback_is_silently_skipped() {
        let shared = SharedCallback::new();
        shared.clear().await;
        shared.invoke(Some("hint".into()), vec![]).await;
    }
}
