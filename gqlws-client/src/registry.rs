//! Subscriber registry.
//!
//! Maps operation ids to their sinks for the lifetime of one client,
//! across socket lifetimes. Registration order is preserved (via a
//! monotonic sequence number) so reconnects replay `subscribe` frames in
//! the order the subscribers arrived.

use std::collections::HashMap;

use gqlws_protocol::SubscribePayload;

use crate::sink::EventSink;

pub(crate) struct Subscriber {
    pub payload: SubscribePayload,
    pub sink: Box<dyn EventSink>,
    /// Whether `subscribe` has been sent on the current socket.
    pub sent: bool,
    seq: u64,
}

#[derive(Default)]
pub(crate) struct SubscriberMap {
    inner: HashMap<String, Subscriber>,
    next_seq: u64,
}

impl SubscriberMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. On an id collision the sink is handed back so
    /// the caller can deliver a terminal error to it.
    pub(crate) fn insert(
        &mut self,
        id: String,
        payload: SubscribePayload,
        sink: Box<dyn EventSink>,
    ) -> Result<(), Box<dyn EventSink>> {
        if self.inner.contains_key(&id) {
            return Err(sink);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.inner.insert(
            id,
            Subscriber {
                payload,
                sink,
                sent: false,
                seq,
            },
        );
        Ok(())
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Subscriber> {
        self.inner.get_mut(id)
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Subscriber> {
        self.inner.remove(id)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    /// Ids of subscribers that have not been sent on the current socket,
    /// in registration order.
    pub(crate) fn unsent_ids(&self) -> Vec<String> {
        let mut pending: Vec<(&String, u64)> = self
            .inner
            .iter()
            .filter(|(_, sub)| !sub.sent)
            .map(|(id, sub)| (id, sub.seq))
            .collect();
        pending.sort_by_key(|(_, seq)| *seq);
        pending.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// Forget the current socket: every subscriber needs re-sending.
    pub(crate) fn mark_all_unsent(&mut self) {
        for sub in self.inner.values_mut() {
            sub.sent = false;
        }
    }

    /// Remove and return everything, in registration order.
    pub(crate) fn drain_ordered(&mut self) -> Vec<(String, Subscriber)> {
        let mut all: Vec<(String, Subscriber)> = self.inner.drain().collect();
        all.sort_by_key(|(_, sub)| sub.seq);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkEvent;

    fn sink() -> Box<dyn EventSink> {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel::<SinkEvent>();
        Box::new(tx)
    }

    #[test]
    fn insert_rejects_duplicate_ids() {
        let mut map = SubscriberMap::new();
        assert!(map
            .insert("a".into(), SubscribePayload::query("{ one }"), sink())
            .is_ok());
        assert!(map
            .insert("a".into(), SubscribePayload::query("{ two }"), sink())
            .is_err());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn unsent_ids_preserve_registration_order() {
        let mut map = SubscriberMap::new();
        for id in ["c", "a", "b"] {
            let _ = map.insert(id.into(), SubscribePayload::query("{ x }"), sink());
        }
        assert_eq!(map.unsent_ids(), vec!["c", "a", "b"]);

        map.get_mut("c").unwrap().sent = true;
        assert_eq!(map.unsent_ids(), vec!["a", "b"]);

        map.mark_all_unsent();
        assert_eq!(map.unsent_ids(), vec!["c", "a", "b"]);
    }

    #[test]
    fn drain_preserves_registration_order() {
        let mut map = SubscriberMap::new();
        for id in ["z", "m", "a"] {
            let _ = map.insert(id.into(), SubscribePayload::query("{ x }"), sink());
        }
        let ids: Vec<String> = map.drain_ordered().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["z", "m", "a"]);
        assert!(map.is_empty());
    }
}
