//! The asynchronous event callback pushed to front-ends (spec 6):
//! "Events pushed to the registered callback (thread-safe): DHT
//! connected/disconnected, message received/sent/delivered/read, contact
//! online/offline, group invitation received, group member joined/left,
//! identity loaded, error."
//!
//! Mirrors `network::transport::callback::SharedCallback`'s mutex-held-
//! across-invocation shape so engine shutdown can never race a worker into
//! calling a freed callback.

use crate::error::EngineError;
use crate::types::{Fingerprint, Message, MessageId, MessageStatus};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum Event {
    DhtConnected,
    DhtDisconnected,
    IdentityLoaded { fingerprint: Fingerprint },
    MessageReceived { message: Box<Message> },
    MessageStatusChanged { id: MessageId, status: MessageStatus },
    ContactOnline { fingerprint: Fingerprint },
    ContactOffline { fingerprint: Fingerprint },
    GroupInvitationReceived { group_id: Uuid, from: Fingerprint },
    GroupMemberJoined { group_id: Uuid, member: Fingerprint },
    GroupMemberLeft { group_id: Uuid, member: Fingerprint },
    Error { message: String },
}

impl Event {
    pub fn error(e: impl Into<EngineError>) -> Self {
        Event::Error { message: e.into().to_string() }
    }
}

pub type EventCallback = Box<dyn Fn(Event) + Send + Sync + 'static>;

/// Holds the current callback behind a mutex held for the duration of each
/// invocation (same contract as the transport's `SharedCallback`).
#[derive(Clone)]
pub struct SharedEventCallback {
    inner: Arc<Mutex<Option<EventCallback>>>,
}

impl SharedEventCallback {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn set(&self, callback: EventCallback) {
        *self.inner.lock().await = Some(callback);
    }

    pub async fn clear(&self) {
        *self.inner.lock().await = None;
    }

    pub async fn emit(&self, event: Event) {
        let guard = self.inner.lock().await;
        if let Some(callback) = guard.as_ref() {
            callback(event);
        }
    }
}

impl Default for SharedEventCallback {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn emits_to_registered_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let shared = SharedEventCallback::new();
        shared
            .set(Box::new(move |_event| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .await;
        shared.emit(Event::DhtConnected).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cleared_callback_is_silently_skipped() {
        let shared = SharedEventCallback::new();
        shared.clear().await;
        shared.emit(Event::DhtDisconnected).await;
    }
}
