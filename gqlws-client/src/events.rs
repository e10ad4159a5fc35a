//! Client event surface.
//!
//! Listeners observe connection lifecycle transitions. They are invoked
//! synchronously with the transition that caused them, after the client's
//! own bookkeeping, and run on the client task — keep them cheap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::{Map, Value};

use gqlws_protocol::{CloseFrame, Message};

/// A connection lifecycle event.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A connection attempt is starting.
    Connecting,
    /// The handshake completed; the ack payload, if the server sent one.
    Connected {
        ack_payload: Option<Map<String, Value>>,
    },
    /// An inbound frame was decoded.
    Message(Message),
    /// The socket closed.
    Closed(CloseFrame),
}

/// A registered listener callback.
pub type EventListener = Box<dyn Fn(&ClientEvent) + Send + Sync>;

/// Handle for removing a listener registered at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Listener registry shared between the client handle and its task.
#[derive(Default)]
pub(crate) struct EventListeners {
    listeners: Mutex<Vec<(u64, EventListener)>>,
    next_id: AtomicU64,
}

impl EventListeners {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, listener: EventListener) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .expect("listener registry poisoned")
            .push((id, listener));
        ListenerId(id)
    }

    pub(crate) fn remove(&self, id: ListenerId) {
        self.listeners
            .lock()
            .expect("listener registry poisoned")
            .retain(|(listener_id, _)| *listener_id != id.0);
    }

    pub(crate) fn emit(&self, event: &ClientEvent) {
        let listeners = self.listeners.lock().expect("listener registry poisoned");
        for (_, listener) in listeners.iter() {
            listener(event);
        }
    }
}
