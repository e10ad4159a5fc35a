//! Subscriber sinks.
//!
//! A sink is the receiver side of one operation: `next` for every result,
//! then exactly one of `complete` or `error`. The client guarantees that no
//! call follows the terminal one, and that a disposed subscriber's sink is
//! never called again.

use gqlws_protocol::ExecutionResult;

use crate::error::OperationError;

/// The receiver of one operation's results.
pub trait EventSink: Send + 'static {
    /// One execution result.
    fn next(&mut self, result: ExecutionResult);

    /// Terminal: the operation failed, or the connection was closed.
    fn error(&mut self, error: OperationError);

    /// Terminal: the operation completed.
    fn complete(&mut self);
}

/// A sink event as a plain value, for channel-backed consumers.
#[derive(Debug)]
pub enum SinkEvent {
    Next(ExecutionResult),
    Error(OperationError),
    Complete,
}

/// Any unbounded sender of [`SinkEvent`]s is a sink; a dropped receiver
/// silently discards events.
impl EventSink for tokio::sync::mpsc::UnboundedSender<SinkEvent> {
    fn next(&mut self, result: ExecutionResult) {
        let _ = self.send(SinkEvent::Next(result));
    }

    fn error(&mut self, error: OperationError) {
        let _ = self.send(SinkEvent::Error(error));
    }

    fn complete(&mut self) {
        let _ = self.send(SinkEvent::Complete);
    }
}
