//! Public client handle.

use std::sync::Arc;

use tokio::sync::mpsc;

use gqlws_protocol::SubscribePayload;

use crate::builder::{ClientBuilder, IdGenerator};
use crate::connection::Command;
use crate::error::OperationError;
use crate::events::{ClientEvent, EventListeners, ListenerId};
use crate::sink::EventSink;

/// Handle to a `graphql-transport-ws` client.
///
/// Cheap to clone; all clones talk to the same connection task. Once every
/// handle — client clones and live [`Subscription`]s alike — is gone, the
/// task disposes itself: the socket closes normally and every remaining
/// sink is completed.
#[derive(Clone)]
pub struct Client {
    cmd_tx: mpsc::UnboundedSender<Command>,
    generate_id: IdGenerator,
    events: Arc<EventListeners>,
}

impl Client {
    /// Start configuring a client for the given URL.
    pub fn builder(url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(url)
    }

    pub(crate) fn new(
        cmd_tx: mpsc::UnboundedSender<Command>,
        generate_id: IdGenerator,
        events: Arc<EventListeners>,
    ) -> Self {
        Self {
            cmd_tx,
            generate_id,
            events,
        }
    }

    /// Start an operation and route its results into `sink`.
    ///
    /// In lazy mode this triggers the connect of an idle client. The sink
    /// receives `next` for every result and then exactly one terminal call;
    /// disposing the returned [`Subscription`] guarantees no further calls.
    pub fn subscribe(&self, payload: SubscribePayload, sink: impl EventSink) -> Subscription {
        let id = (self.generate_id)();
        let command = Command::Subscribe {
            id: id.clone(),
            payload,
            sink: Box::new(sink),
        };
        if let Err(mpsc::error::SendError(command)) = self.cmd_tx.send(command) {
            // The connection task is gone; the operation can never run.
            if let Command::Subscribe { mut sink, .. } = command {
                sink.error(OperationError::Disposed);
            }
        }
        Subscription {
            id,
            cmd_tx: self.cmd_tx.clone(),
        }
    }

    /// Register an event listener; returns a handle for [`off`](Self::off).
    pub fn on(&self, listener: impl Fn(&ClientEvent) + Send + Sync + 'static) -> ListenerId {
        self.events.add(Box::new(listener))
    }

    /// Remove a listener registered with [`on`](Self::on).
    pub fn off(&self, id: ListenerId) {
        self.events.remove(id);
    }

    /// Dispose the client: complete every remaining sink and close the
    /// socket with `1000 Normal closure`.
    pub fn dispose(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

/// One active operation.
///
/// Dropping the handle does *not* cancel the operation; call
/// [`dispose`](Subscription::dispose) to stop it.
pub struct Subscription {
    id: String,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    /// The operation id used on the wire.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stop the operation: sends `complete` to the server (best-effort) and
    /// removes the subscriber immediately, so the sink receives nothing
    /// more — even if matching frames are already in flight.
    pub fn dispose(self) {
        let _ = self.cmd_tx.send(Command::Dispose { id: self.id });
    }
}
