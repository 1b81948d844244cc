//! Registry of clients suspended on a key.
//!
//! Two families of waiters exist. `BLPOP` waiters queue per key in FIFO
//! order and receive elements directly from producers over oneshot channels,
//! which is what makes the one-element-per-waiter handoff order exact.
//! Blocking `XREAD` waiters share a [`Notify`] registered under every key
//! they watch; producers wake them and they re-inspect the keyspace
//! themselves.
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use tokio::sync::{oneshot, Notify};

/// Token identifying one registered waiter, used to unregister on timeout
/// or cancellation.
pub(crate) type WaiterId = u64;

/// A client blocked on `BLPOP`, waiting for an element to be handed over.
#[derive(Debug)]
struct ListWaiter {
    id: WaiterId,
    tx: oneshot::Sender<Bytes>,
}

/// Per-key queues of blocked readers. Lives inside the keyspace state, so
/// every operation on it happens under the keyspace lock.
#[derive(Debug, Default)]
pub(crate) struct WaiterRegistry {
    next_id: WaiterId,
    list_waiters: HashMap<String, VecDeque<ListWaiter>>,
    /// Weak handles: the waiter owns the only strong one, so a cancelled
    /// read is recognisable by a dead handle.
    stream_waiters: HashMap<String, Vec<(WaiterId, Weak<Notify>)>>,
}

impl WaiterRegistry {
    fn next_id(&mut self) -> WaiterId {
        self.next_id += 1;
        self.next_id
    }

    /// Queue a new `BLPOP` waiter on `key`, returning its token and the
    /// receiving end of the handover channel.
    pub(crate) fn register_list_waiter(
        &mut self,
        key: &str,
    ) -> (WaiterId, oneshot::Receiver<Bytes>) {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.list_waiters
            .entry(key.to_string())
            .or_default()
            .push_back(ListWaiter { id, tx });
        (id, rx)
    }

    /// Drop a list waiter that timed out or was cancelled.
    pub(crate) fn remove_list_waiter(&mut self, key: &str, id: WaiterId) {
        if let Some(queue) = self.list_waiters.get_mut(key) {
            queue.retain(|waiter| waiter.id != id);
            if queue.is_empty() {
                self.list_waiters.remove(key);
            }
        }
    }

    /// Hand elements from the head of `list` to blocked readers, oldest
    /// waiter first, one element each, until either side runs out.
    ///
    /// A waiter whose receiver is gone was cancelled; it is skipped and the
    /// element goes to the next one in line.
    pub(crate) fn drain_list_waiters(&mut self, key: &str, list: &mut VecDeque<Bytes>) {
        let Some(queue) = self.list_waiters.get_mut(key) else {
            return;
        };
        while let Some(element) = list.pop_front() {
            let Some(waiter) = queue.pop_front() else {
                list.push_front(element);
                break;
            };
            if let Err(element) = waiter.tx.send(element) {
                list.push_front(element);
            }
        }
        if queue.is_empty() {
            self.list_waiters.remove(key);
        }
    }

    /// Register interest in new stream entries on each of `keys`, sharing
    /// one wakeup handle across them.
    pub(crate) fn register_stream_waiter(&mut self, keys: &[String]) -> (WaiterId, Arc<Notify>) {
        let id = self.next_id();
        let notify = Arc::new(Notify::new());
        for key in keys {
            self.stream_waiters
                .entry(key.clone())
                .or_default()
                .push((id, Arc::downgrade(&notify)));
        }
        (id, notify)
    }

    pub(crate) fn remove_stream_waiter(&mut self, keys: &[String], id: WaiterId) {
        for key in keys {
            if let Some(watchers) = self.stream_waiters.get_mut(key) {
                watchers.retain(|(waiter_id, _)| *waiter_id != id);
                if watchers.is_empty() {
                    self.stream_waiters.remove(key);
                }
            }
        }
    }

    /// Wake every stream waiter registered on `key`.
    ///
    /// A watcher whose handle is dead belongs to a cancelled read and is
    /// pruned instead of woken.
    pub(crate) fn notify_stream_waiters(&mut self, key: &str) {
        if let Some(watchers) = self.stream_waiters.get_mut(key) {
            watchers.retain(|(_, weak)| match weak.upgrade() {
                Some(notify) => {
                    notify.notify_one();
                    true
                }
                None => false,
            });
            if watchers.is_empty() {
                self.stream_waiters.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handoff_is_fifo() {
        let mut registry = WaiterRegistry::default();
        let (_, mut rx1) = registry.register_list_waiter("k");
        let (_, mut rx2) = registry.register_list_waiter("k");

        let mut list: VecDeque<Bytes> = [Bytes::from("a"), Bytes::from("b"), Bytes::from("c")]
            .into_iter()
            .collect();
        registry.drain_list_waiters("k", &mut list);

        assert_eq!(rx1.try_recv().unwrap(), Bytes::from("a"));
        assert_eq!(rx2.try_recv().unwrap(), Bytes::from("b"));
        // leftover element stays on the list for non-blocking readers
        assert_eq!(list, VecDeque::from([Bytes::from("c")]));
    }

    #[test]
    fn test_cancelled_waiter_is_skipped() {
        let mut registry = WaiterRegistry::default();
        let (_, rx1) = registry.register_list_waiter("k");
        let (_, mut rx2) = registry.register_list_waiter("k");
        drop(rx1);

        let mut list: VecDeque<Bytes> = [Bytes::from("a")].into_iter().collect();
        registry.drain_list_waiters("k", &mut list);

        assert_eq!(rx2.try_recv().unwrap(), Bytes::from("a"));
        assert!(list.is_empty());
    }

    #[test]
    fn test_removed_waiter_gets_nothing() {
        let mut registry = WaiterRegistry::default();
        let (id, mut rx1) = registry.register_list_waiter("k");
        let (_, mut rx2) = registry.register_list_waiter("k");
        registry.remove_list_waiter("k", id);

        let mut list: VecDeque<Bytes> = [Bytes::from("a")].into_iter().collect();
        registry.drain_list_waiters("k", &mut list);

        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap(), Bytes::from("a"));
    }

    #[test]
    fn test_more_waiters_than_elements() {
        let mut registry = WaiterRegistry::default();
        let (_, mut rx1) = registry.register_list_waiter("k");
        let (_, mut rx2) = registry.register_list_waiter("k");

        let mut list: VecDeque<Bytes> = [Bytes::from("only")].into_iter().collect();
        registry.drain_list_waiters("k", &mut list);

        assert_eq!(rx1.try_recv().unwrap(), Bytes::from("only"));
        // second waiter keeps blocking
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stream_waiters_are_woken_and_pruned() {
        let mut registry = WaiterRegistry::default();
        let keys = vec!["s1".to_string(), "s2".to_string()];
        let (id, notify) = registry.register_stream_waiter(&keys);

        registry.notify_stream_waiters("s1");
        // the permit was stored, so this resolves immediately
        notify.notified().await;

        // dropping the caller's handle kills the weak ones; the next
        // producer prunes the watcher
        drop(notify);
        registry.notify_stream_waiters("s2");
        assert!(registry.stream_waiters.get("s2").is_none());

        registry.remove_stream_waiter(&keys, id);
        assert!(registry.stream_waiters.is_empty());
    }
}
