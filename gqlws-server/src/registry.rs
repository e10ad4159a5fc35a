//! Active-operation registry for one connection.
//!
//! Tracks which operation ids are live on a socket. An id is reserved with
//! a placeholder *before* the subscribe hooks run so a duplicate `subscribe`
//! racing the (async) planning step is still caught, then upgraded to the
//! spawned execution task once it is running.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;

/// State of one active operation.
pub(crate) enum OperationSlot {
    /// Id reserved; hooks and planning are still in flight.
    Pending,
    /// Execution task is running.
    Running(JoinHandle<()>),
}

/// Registry of active operations, shared between the connection state
/// machine and the per-operation execution tasks.
///
/// Cloning is cheap; all clones share the same map.
#[derive(Clone, Default)]
pub(crate) struct ActiveOperations {
    inner: Arc<DashMap<String, OperationSlot>>,
}

impl ActiveOperations {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Reserve an id with a placeholder. Returns `false` if the id is
    /// already active.
    pub(crate) fn reserve(&self, id: &str) -> bool {
        match self.inner.entry(id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(OperationSlot::Pending);
                true
            }
        }
    }

    /// Upgrade a reserved id to a running execution task.
    ///
    /// Returns `false` if the id is no longer active (the task finished and
    /// removed itself before the upgrade landed); the caller drops the
    /// handle in that case.
    pub(crate) fn activate(&self, id: &str, handle: JoinHandle<()>) -> bool {
        match self.inner.get_mut(id) {
            Some(mut slot) => {
                *slot = OperationSlot::Running(handle);
                true
            }
            None => false,
        }
    }

    /// Cancel an operation: abort its task and free the id.
    ///
    /// Returns `true` if the id was active.
    pub(crate) fn cancel(&self, id: &str) -> bool {
        match self.inner.remove(id) {
            Some((_, OperationSlot::Running(handle))) => {
                handle.abort();
                true
            }
            Some((_, OperationSlot::Pending)) => true,
            None => false,
        }
    }

    /// Free an id without aborting — called by the execution task itself
    /// when it terminates.
    pub(crate) fn finish(&self, id: &str) {
        self.inner.remove(id);
    }

    /// Returns `true` if the id is active.
    pub(crate) fn contains(&self, id: &str) -> bool {
        self.inner.contains_key(id)
    }

    /// Number of active operations.
    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    /// Cancel everything — socket is gone.
    pub(crate) fn drain(&self) {
        self.inner.retain(|_, slot| {
            if let OperationSlot::Running(handle) = slot {
                handle.abort();
            }
            false
        });
    }
}
