use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    sync::{Arc, RwLock},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;
use tokio::{
    sync::Notify,
    time::{self, Instant},
};
use tracing::debug;

use crate::stream::{IdSpec, Stream, StreamEntry, StreamId};
use crate::waiters::WaiterRegistry;
use crate::{Error, Result};

/// A stored value. A key holds exactly one kind at a time.
#[derive(Debug)]
pub(crate) enum Value {
    String(Bytes),
    List(VecDeque<Bytes>),
    Stream(Stream),
}

impl Value {
    /// Kind name as reported by `TYPE`.
    fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Stream(_) => "stream",
        }
    }
}

#[derive(Debug)]
/// A single database entry.
struct Entry {
    value: Value,
    /// Instant at which the entry expires. Only string values ever carry
    /// one; lists and streams do not expire.
    expires_at: Option<Instant>,
}

#[derive(Debug)]
/// The internal state of the database.
struct DbState {
    /// The actual Key/Value data.
    entries: HashMap<String, Entry>,
    /// Keys TTLs tracking.
    ///
    /// A `BTreeSet` is used to maintain expirations sorted by when they will expire.
    /// This allows the background task to iterate this set to find the next expiring value.
    expirations: BTreeSet<(Instant, String)>,
    /// Clients suspended on `BLPOP` or blocking `XREAD`.
    waiters: WaiterRegistry,
    /// When the Db instance is shutting down, this is `true`.
    ///
    /// This happens when all `Db` values drop.
    /// Also, setting this to `true` signals the background task to exit.
    shutdown: bool,
}

#[derive(Debug)]
/// Shared state for the database.
struct DbSharedState {
    /// The actual database state is guarded by a `std::sync::rwlock::RwLock`.
    ///
    /// There is no need for `tokio::sync::RwLock` here, as no async operations
    /// are performed while the lock is held, and the critical sections are
    /// very small.
    state: RwLock<DbState>,
    /// Notifies the background task handling expiration events.
    ///
    /// The background task waits on this to be notified,
    /// then checks for expired values or the shutdown signal.
    background_task: Notify,
}

#[derive(Debug, Clone)]
/// Server state shared across all connections.
///
/// A `Db` instance is a handle to shared state: the keyspace itself plus the
/// per-key queues of blocked readers. Cloning `Db` is shallow and only incurs
/// an atomic ref count increment.
///
/// When a `Db` value is created, a background task is spawned to expire
/// string values after their deadline has elapsed. The task runs until all
/// instances of `Db` are dropped, at which point it terminates.
pub(crate) struct Db {
    /// Handle to the shared state.
    ///
    /// The background task will also have an `Arc<DbSharedState>`.
    shared: Arc<DbSharedState>,
}

#[derive(Debug)]
/// A wrapper around a `Db` instance.
///
/// This exists to allow orderly cleanup of the `Db` by signalling the background purge task
/// to shutdown when this struct is dropped.
pub(crate) struct DbDropGuard {
    /// The `Db` instance that will be shutdown when this `DbDropGuard` is dropped.
    db: Db,
}

impl DbDropGuard {
    /// Create a new `DbDropGuard`, wrapping a new `Db` instance.
    ///
    /// When this is dropped, the `Db`'s purge task will be shutdown.
    pub(crate) fn new() -> Self {
        DbDropGuard { db: Db::new() }
    }

    /// Get the shared database.
    ///
    /// Internally this is an `Arc`, so a clone only increments the ref count.
    pub(crate) fn db(&self) -> Db {
        self.db.clone()
    }
}

impl Drop for DbDropGuard {
    /// This `drop` signals the `Db` instance to shutdown the task that purges expired values.
    fn drop(&mut self) {
        self.db.shutdown_purge_task();
    }
}

impl Db {
    /// Create a new empty `Db` instance.
    ///
    /// Allocates the shared state and spawns a background task
    /// to manage key expiration.
    pub(crate) fn new() -> Self {
        let shared = Arc::new(DbSharedState {
            state: RwLock::new(DbState {
                entries: HashMap::new(),
                expirations: BTreeSet::new(),
                waiters: WaiterRegistry::default(),
                shutdown: false,
            }),
            background_task: Notify::new(),
        });

        // Start the background task.
        tokio::spawn(purge_expired_tasks(shared.clone()));

        Self { shared }
    }

    /// Get the string value associated with a key.
    ///
    /// Returns `None` if there is no value associated with the key, or if a
    /// previously assigned value has expired; an expired entry is deleted on
    /// the spot. A key holding a list or a stream is a type error.
    pub(crate) fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut state = self.shared.state.write().unwrap();
        if state.expire_if_due(key, Instant::now()) {
            return Ok(None);
        }
        match state.entries.get(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::String(data) => Ok(Some(data.clone())),
                _ => Err(Error::WrongType),
            },
        }
    }

    /// Set the string value associated with a key along with an optional TTL.
    ///
    /// Any value already associated with the key is replaced, regardless of
    /// its kind.
    pub(crate) fn set(&self, key: String, value: Bytes, expire: Option<Duration>) {
        let mut state = self.shared.state.write().unwrap();

        // If this `set` becomes the key that expires **next**, the background
        // task needs to be notified so it can update its state.
        //
        // Whether or not the task needs to be notified is computed during the
        // `set` routine.
        let mut notify = false;

        let expires_at = expire.map(|duration| {
            // `Instant` at which the key expires
            let when = Instant::now() + duration;
            // Only notify the worker task if the newly inserted expiration is
            // the **next** key to evict. In this case, the worker needs to be
            // woken up to update its state.
            notify = state
                .next_expiration()
                .map(|expiration| expiration > when)
                .unwrap_or(true);
            when
        });

        // Insert the value into the database, and get the previous value if it existed.
        let prev = state.entries.insert(
            key.clone(),
            Entry {
                value: Value::String(value),
                expires_at,
            },
        );

        // If there was a value previously associated with the key,
        // **and** it had an expiration date, the associated entry in the `expirations`
        // set must be removed to avoid leaking data.
        if let Some(prev) = prev {
            if let Some(when) = prev.expires_at {
                state.expirations.remove(&(when, key.clone()));
            }
        }

        // Track the expiration.
        if let Some(when) = expires_at {
            state.expirations.insert((when, key));
        }

        // Release the lock before notifying the background task.
        // This helps reduce contention by avoiding the background task waking up
        // only to be unable to acquire the lock due to this function still holding it,
        // and thus blocking.
        drop(state);

        // Finally, only notify the background task if it needs to update
        // its state to reflect a new expiration.
        if notify {
            self.shared.background_task.notify_one();
        }
    }

    /// Append `values` to the tail of the list at `key`, creating the list
    /// if the key is absent.
    ///
    /// Returns the resulting length, counting every pushed element even if
    /// blocked readers consume some of them right away.
    pub(crate) fn rpush(&self, key: &str, values: Vec<Bytes>) -> Result<usize> {
        self.push(key, values, PushSide::Back)
    }

    /// Prepend `values` to the head of the list at `key`, one by one in
    /// argument order, creating the list if the key is absent.
    pub(crate) fn lpush(&self, key: &str, values: Vec<Bytes>) -> Result<usize> {
        self.push(key, values, PushSide::Front)
    }

    fn push(&self, key: &str, values: Vec<Bytes>, side: PushSide) -> Result<usize> {
        let mut state = self.shared.state.write().unwrap();
        let state = &mut *state;

        let entry = state
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry {
                value: Value::List(VecDeque::new()),
                expires_at: None,
            });
        let Value::List(list) = &mut entry.value else {
            return Err(Error::WrongType);
        };

        for value in values {
            match side {
                PushSide::Back => list.push_back(value),
                PushSide::Front => list.push_front(value),
            }
        }
        let len = list.len();

        // the push is applied; now blocked readers take their share,
        // oldest first
        state.waiters.drain_list_waiters(key, list);

        Ok(len)
    }

    /// Remove up to `count` elements from the head of the list at `key`.
    ///
    /// Returns `None` when the key is absent.
    pub(crate) fn lpop(&self, key: &str, count: usize) -> Result<Option<Vec<Bytes>>> {
        let mut state = self.shared.state.write().unwrap();
        match state.entries.get_mut(key) {
            None => Ok(None),
            Some(entry) => {
                let Value::List(list) = &mut entry.value else {
                    return Err(Error::WrongType);
                };
                let n = count.min(list.len());
                // popping to empty retains the (now empty) list
                Ok(Some(list.drain(..n).collect()))
            }
        }
    }

    /// The inclusive slice `[start..=end]` of the list at `key`, with Redis
    /// index semantics: negatives count from the tail, bounds are clamped.
    ///
    /// An absent key or an inverted interval yields an empty vector.
    pub(crate) fn lrange(&self, key: &str, start: i64, end: i64) -> Result<Vec<Bytes>> {
        let state = self.shared.state.read().unwrap();
        match state.entries.get(key) {
            None => Ok(Vec::new()),
            Some(entry) => {
                let Value::List(list) = &entry.value else {
                    return Err(Error::WrongType);
                };
                let len = list.len() as i64;
                let start = (if start < 0 { len + start } else { start }).max(0);
                let end = (if end < 0 { len + end } else { end }).min(len - 1);
                if start > end {
                    return Ok(Vec::new());
                }
                Ok(list
                    .iter()
                    .skip(start as usize)
                    .take((end - start + 1) as usize)
                    .cloned()
                    .collect())
            }
        }
    }

    /// Length of the list at `key`; zero if the key is absent.
    pub(crate) fn llen(&self, key: &str) -> Result<usize> {
        let state = self.shared.state.read().unwrap();
        match state.entries.get(key) {
            None => Ok(0),
            Some(entry) => match &entry.value {
                Value::List(list) => Ok(list.len()),
                _ => Err(Error::WrongType),
            },
        }
    }

    /// Kind of the value at `key`: `string`, `list`, `stream` or `none`.
    ///
    /// An expired string counts as absent (and is deleted on the spot).
    pub(crate) fn key_type(&self, key: &str) -> &'static str {
        let mut state = self.shared.state.write().unwrap();
        if state.expire_if_due(key, Instant::now()) {
            return "none";
        }
        state
            .entries
            .get(key)
            .map(|entry| entry.value.type_name())
            .unwrap_or("none")
    }

    /// Append an entry to the stream at `key`, creating the stream if the
    /// key is absent, and wake blocked stream readers.
    ///
    /// Nothing is created or mutated when the id is rejected.
    pub(crate) fn xadd(
        &self,
        key: &str,
        spec: IdSpec,
        fields: Vec<(Bytes, Bytes)>,
    ) -> Result<StreamId> {
        let now_ms = unix_millis();
        let mut state = self.shared.state.write().unwrap();
        let state = &mut *state;

        let id = match state.entries.get_mut(key) {
            Some(entry) => {
                let Value::Stream(stream) = &mut entry.value else {
                    return Err(Error::WrongType);
                };
                stream.add(spec, fields, now_ms)?
            }
            None => {
                let mut stream = Stream::new();
                let id = stream.add(spec, fields, now_ms)?;
                state.entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Stream(stream),
                        expires_at: None,
                    },
                );
                id
            }
        };

        debug!(key, %id, "stream entry appended");
        state.waiters.notify_stream_waiters(key);

        Ok(id)
    }

    /// Entries of the stream at `key` whose id lies in `[start, end]`.
    ///
    /// An absent key yields an empty vector.
    pub(crate) fn xrange(
        &self,
        key: &str,
        start: StreamId,
        end: StreamId,
    ) -> Result<Vec<StreamEntry>> {
        let state = self.shared.state.read().unwrap();
        match state.entries.get(key) {
            None => Ok(Vec::new()),
            Some(entry) => match &entry.value {
                Value::Stream(stream) => Ok(stream.range(start, end)),
                _ => Err(Error::WrongType),
            },
        }
    }

    /// For each `(key, last_seen)` pair, the entries with a strictly greater
    /// id. Keys that are absent or have nothing new are omitted.
    pub(crate) fn xread(
        &self,
        queries: &[(String, StreamId)],
    ) -> Result<Vec<(String, Vec<StreamEntry>)>> {
        let state = self.shared.state.read().unwrap();
        state.collect_new_entries(queries)
    }

    /// Block until an element can be popped from the head of the list at
    /// `key`, or until `timeout` elapses (`None` waits forever).
    ///
    /// If the list already has an element, it is popped immediately. The
    /// observation and the waiter registration happen under one lock
    /// acquisition, so a concurrent push cannot slip between them.
    pub(crate) async fn blpop(&self, key: &str, timeout: Option<Duration>) -> Result<Option<Bytes>> {
        let deadline = timeout.map(|t| Instant::now() + t);

        let (waiter_id, mut rx) = {
            let mut state = self.shared.state.write().unwrap();
            let state = &mut *state;
            if let Some(entry) = state.entries.get_mut(key) {
                let Value::List(list) = &mut entry.value else {
                    return Err(Error::WrongType);
                };
                if let Some(element) = list.pop_front() {
                    return Ok(Some(element));
                }
            }
            state.waiters.register_list_waiter(key)
        };

        debug!(key, "blocking on list");

        let received = match deadline {
            Some(deadline) => match time::timeout_at(deadline, &mut rx).await {
                Ok(received) => received.ok(),
                Err(_elapsed) => None,
            },
            None => (&mut rx).await.ok(),
        };

        if let Some(element) = received {
            return Ok(Some(element));
        }

        // Deadline hit: unregister, then take a final look at the channel in
        // case a producer handed an element over while we were timing out.
        let mut state = self.shared.state.write().unwrap();
        state.waiters.remove_list_waiter(key, waiter_id);
        drop(state);

        Ok(rx.try_recv().ok())
    }

    /// Block until at least one of the queried streams grows past its
    /// last-seen id, or until `timeout` elapses (`None` waits forever).
    ///
    /// Returns the same groups as [`Db::xread`]; an empty result means the
    /// wait timed out.
    pub(crate) async fn xread_blocking(
        &self,
        queries: Vec<(String, StreamId)>,
        timeout: Option<Duration>,
    ) -> Result<Vec<(String, Vec<StreamEntry>)>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let keys: Vec<String> = queries.iter().map(|(key, _)| key.clone()).collect();

        // Fast path and registration under one lock acquisition, so an entry
        // appended in between cannot be missed.
        let (waiter_id, notify) = {
            let mut state = self.shared.state.write().unwrap();
            let groups = state.collect_new_entries(&queries)?;
            if !groups.is_empty() {
                return Ok(groups);
            }
            state.waiters.register_stream_waiter(&keys)
        };

        debug!(?keys, "blocking on streams");

        loop {
            let woken = match deadline {
                Some(deadline) => time::timeout_at(deadline, notify.notified()).await.is_ok(),
                None => {
                    notify.notified().await;
                    true
                }
            };

            let mut state = self.shared.state.write().unwrap();
            if !woken {
                state.waiters.remove_stream_waiter(&keys, waiter_id);
                // one final scan so a producer that fired just before the
                // deadline is still observed
                return state.collect_new_entries(&queries);
            }
            match state.collect_new_entries(&queries) {
                Ok(groups) if groups.is_empty() => {
                    // woken for a key that still has nothing for us
                    // (another reader's wake, or an id filter that already
                    // skips the new entry): keep blocking
                    continue;
                }
                Ok(groups) => {
                    state.waiters.remove_stream_waiter(&keys, waiter_id);
                    return Ok(groups);
                }
                Err(err) => {
                    state.waiters.remove_stream_waiter(&keys, waiter_id);
                    return Err(err);
                }
            }
        }
    }

    /// Signals the purge background task to shutdown.
    ///
    /// This is called by the `DbDropGuard`'s `Drop` implementation.
    fn shutdown_purge_task(&self) {
        // The background task must be signaled to shutdown. This is done by
        // setting `DbState::shutdown` to `true` and signalling the task.
        let mut state = self.shared.state.write().unwrap();
        state.shutdown = true;
        drop(state);
        self.shared.background_task.notify_one();
    }
}

#[derive(Debug, Clone, Copy)]
enum PushSide {
    Front,
    Back,
}

impl DbSharedState {
    /// Returns `true` if the database is shutting down
    ///
    /// The `shutdown` flag is set when all `Db` values have dropped, indicating
    /// that the shared state can no longer be accessed.
    fn is_shutdown(&self) -> bool {
        self.state.read().unwrap().shutdown
    }

    /// Purge all expired keys and return the `Instant` at which the **next** key will expire.
    ///
    /// The background task will sleep until this instant.
    #[tracing::instrument(skip_all)]
    fn purge_expired_keys(&self) -> Option<Instant> {
        let mut state = self.state.write().unwrap();

        if state.shutdown {
            // The database is shutting down. All handles to the shared state
            // have been dropped. The background task should exit.
            return None;
        }

        // This is needed to make the borrow checker happy. In short, `write()`
        // returns a `RwLockWriteGuard` and not a `&mut DbState`, and it cannot
        // see "through" the guard to determine that it is safe to access both
        // `state.expirations` and `state.entries` mutably.
        let state = &mut *state;

        // Find all keys scheduled to expire **before** now.
        let now = Instant::now();

        while let Some(&(when, ref key)) = state.expirations.iter().next() {
            if when > now {
                // Done purging, `when` is the instant at which the next key expires.
                return Some(when);
            }

            // The key has expired, remove it.
            debug!("removing expired {key:?}");
            state.entries.remove(key);
            state.expirations.remove(&(when, key.clone()));
        }

        None
    }
}

impl DbState {
    fn next_expiration(&self) -> Option<Instant> {
        self.expirations
            .iter()
            .next()
            .map(|expiration| expiration.0)
    }

    /// Lazily drop `key` if its expiration has passed (`expire <= now`).
    ///
    /// Returns `true` if the key was removed. This read-side check is what
    /// makes expiration exact; the background purge merely reclaims memory
    /// early.
    fn expire_if_due(&mut self, key: &str, now: Instant) -> bool {
        let due = matches!(
            self.entries.get(key),
            Some(entry) if entry.expires_at.is_some_and(|when| when <= now)
        );
        if due {
            if let Some(entry) = self.entries.remove(key) {
                if let Some(when) = entry.expires_at {
                    self.expirations.remove(&(when, key.to_string()));
                }
            }
            debug!(key, "expired lazily on read");
        }
        due
    }

    /// Gather, for each query, the stream entries strictly newer than the
    /// query's last-seen id, omitting empty groups.
    fn collect_new_entries(
        &self,
        queries: &[(String, StreamId)],
    ) -> Result<Vec<(String, Vec<StreamEntry>)>> {
        let mut groups = Vec::new();
        for (key, last_seen) in queries {
            match self.entries.get(key) {
                None => continue,
                Some(entry) => match &entry.value {
                    Value::Stream(stream) => {
                        let entries = stream.entries_after(*last_seen);
                        if !entries.is_empty() {
                            groups.push((key.clone(), entries));
                        }
                    }
                    _ => return Err(Error::WrongType),
                },
            }
        }
        Ok(groups)
    }
}

/// Current unix-epoch wall clock in milliseconds, used for `XADD *` ids.
fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Routine executed by the background task.
///
/// Wait to be notified. On notification, purge any expired keys from the shared
/// state handle. If `shutdown` is set, terminate the task.
#[tracing::instrument(skip_all)]
async fn purge_expired_tasks(shared: Arc<DbSharedState>) {
    // If the shutdown flag is set, then the task should exit.
    while !shared.is_shutdown() {
        // Purge all keys that are expired. The function returns the instant at
        // which the **next** key will expire. The worker should wait until the
        // instant has passed then purge again.
        if let Some(when) = shared.purge_expired_keys() {
            // Wait until the next key expires **or** until the background task
            // is notified. If the task is notified, then it must reload its
            // state as new keys have been set to expire early. This is done by
            // looping.
            tokio::select! {
                _ = time::sleep_until(when) => {}
                _ = shared.background_task.notified() => {}
            }
        } else {
            // There are no keys expiring in the future.
            // Wait until the task is notified.
            shared.background_task.notified().await;
        }
    }

    debug!("purge background task shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    fn entry_fields() -> Vec<(Bytes, Bytes)> {
        vec![(b("f"), b("v"))]
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let db = Db::new();
        assert_eq!(db.get("foo").unwrap(), None);
        db.set("foo".into(), b("bar"), None);
        assert_eq!(db.get("foo").unwrap(), Some(b("bar")));
        // overwrite replaces regardless of prior value
        db.set("foo".into(), b("baz"), None);
        assert_eq!(db.get("foo").unwrap(), Some(b("baz")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiration_boundary() {
        let db = Db::new();
        db.set("foo".into(), b("bar"), Some(Duration::from_millis(100)));

        time::advance(Duration::from_millis(99)).await;
        assert_eq!(db.get("foo").unwrap(), Some(b("bar")));

        // `expire <= now` reads as absent
        time::advance(Duration::from_millis(1)).await;
        assert_eq!(db.get("foo").unwrap(), None);
        assert_eq!(db.key_type("foo"), "none");
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_with_elapsed_expiration() {
        let db = Db::new();
        db.set("foo".into(), b("bar"), Some(Duration::ZERO));
        assert_eq!(db.get("foo").unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_clears_expiration() {
        let db = Db::new();
        db.set("foo".into(), b("bar"), Some(Duration::from_millis(50)));
        db.set("foo".into(), b("baz"), None);
        time::advance(Duration::from_millis(100)).await;
        assert_eq!(db.get("foo").unwrap(), Some(b("baz")));
    }

    #[tokio::test]
    async fn test_push_ordering() {
        let db = Db::new();
        db.rpush("k", vec![b("a"), b("b"), b("c")]).unwrap();
        assert_eq!(db.lrange("k", 0, -1).unwrap(), vec![b("a"), b("b"), b("c")]);

        let db = Db::new();
        db.lpush("k", vec![b("a"), b("b"), b("c")]).unwrap();
        assert_eq!(db.lrange("k", 0, -1).unwrap(), vec![b("c"), b("b"), b("a")]);
    }

    #[tokio::test]
    async fn test_lrange_index_semantics() {
        let db = Db::new();
        db.rpush("k", vec![b("v1"), b("v2"), b("v3"), b("v4"), b("v5")])
            .unwrap();

        assert_eq!(db.lrange("k", 0, 1).unwrap(), vec![b("v1"), b("v2")]);
        assert_eq!(
            db.lrange("k", -3, 10).unwrap(),
            vec![b("v3"), b("v4"), b("v5")]
        );
        assert_eq!(db.lrange("k", 3, 1).unwrap(), Vec::<Bytes>::new());
        assert_eq!(db.lrange("absent", 0, 1).unwrap(), Vec::<Bytes>::new());
    }

    #[tokio::test]
    async fn test_lpop_and_llen() {
        let db = Db::new();
        assert_eq!(db.lpop("k", 1).unwrap(), None);

        db.rpush("k", vec![b("v1"), b("v2"), b("v3")]).unwrap();
        assert_eq!(db.lpop("k", 1).unwrap(), Some(vec![b("v1")]));
        assert_eq!(db.lpop("k", 5).unwrap(), Some(vec![b("v2"), b("v3")]));
        assert_eq!(db.llen("k").unwrap(), 0);

        // popped-to-empty list is retained, not deleted
        assert_eq!(db.key_type("k"), "list");
        assert_eq!(db.lpop("k", 1).unwrap(), Some(vec![]));
    }

    #[tokio::test]
    async fn test_type_discipline_never_mutates() {
        let db = Db::new();
        db.set("s".into(), b("x"), None);

        assert!(matches!(
            db.rpush("s", vec![b("v")]),
            Err(Error::WrongType)
        ));
        assert!(matches!(db.llen("s"), Err(Error::WrongType)));
        assert!(matches!(db.lpop("s", 1), Err(Error::WrongType)));
        assert!(matches!(
            db.xadd("s", IdSpec::Auto, entry_fields()),
            Err(Error::WrongType)
        ));

        // the string is untouched
        assert_eq!(db.get("s").unwrap(), Some(b("x")));

        db.rpush("l", vec![b("v")]).unwrap();
        assert!(matches!(db.get("l"), Err(Error::WrongType)));
        assert_eq!(db.llen("l").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_key_type_reporting() {
        let db = Db::new();
        assert_eq!(db.key_type("nope"), "none");
        db.set("s".into(), b("x"), None);
        db.rpush("l", vec![b("v")]).unwrap();
        db.xadd("st", IdSpec::Auto, entry_fields()).unwrap();
        assert_eq!(db.key_type("s"), "string");
        assert_eq!(db.key_type("l"), "list");
        assert_eq!(db.key_type("st"), "stream");
    }

    #[tokio::test]
    async fn test_xadd_failure_leaves_no_key_behind() {
        let db = Db::new();
        let err = db
            .xadd("s", IdSpec::Explicit(StreamId::new(0, 0)), entry_fields())
            .unwrap_err();
        assert!(err.to_string().contains("greater than 0-0"));
        assert_eq!(db.key_type("s"), "none");
    }

    #[tokio::test]
    async fn test_xrange_and_xread() {
        let db = Db::new();
        for seq in 1..=3 {
            db.xadd(
                "s",
                IdSpec::Explicit(StreamId::new(1, seq)),
                entry_fields(),
            )
            .unwrap();
        }

        let got = db
            .xrange("s", StreamId::new(1, 2), StreamId::MAX)
            .unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(db.xrange("absent", StreamId::MIN, StreamId::MAX).unwrap(), vec![]);

        let groups = db
            .xread(&[
                ("s".to_string(), StreamId::new(1, 1)),
                ("absent".to_string(), StreamId::MIN),
            ])
            .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0, "s");
        assert_eq!(groups[0].1.len(), 2);

        // nothing new: the group is omitted entirely
        assert!(db
            .xread(&[("s".to_string(), StreamId::new(1, 3))])
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_blpop_immediate_when_available() {
        let db = Db::new();
        db.rpush("k", vec![b("v1"), b("v2")]).unwrap();
        let got = db.blpop("k", Some(Duration::ZERO)).await.unwrap();
        assert_eq!(got, Some(b("v1")));
        assert_eq!(db.llen("k").unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blpop_wakes_on_push() {
        let db = Db::new();
        let waiter = {
            let db = db.clone();
            tokio::spawn(async move { db.blpop("k", None).await })
        };

        // let the waiter register
        time::sleep(Duration::from_millis(10)).await;
        let len = db.rpush("k", vec![b("v1"), b("v2")]).unwrap();
        assert_eq!(len, 2);

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got, Some(b("v1")));
        // the element the waiter took is gone, the rest remains
        assert_eq!(db.lrange("k", 0, -1).unwrap(), vec![b("v2")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blpop_times_out() {
        let db = Db::new();
        let start = Instant::now();
        let got = db.blpop("k", Some(Duration::from_millis(500))).await.unwrap();
        assert_eq!(got, None);
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blpop_fifo_fairness() {
        let db = Db::new();
        let mut waiters = Vec::new();
        for _ in 0..3 {
            let db = db.clone();
            waiters.push(tokio::spawn(async move { db.blpop("k", None).await }));
            // force registration order to match spawn order
            time::sleep(Duration::from_millis(1)).await;
        }

        db.rpush("k", vec![b("e1"), b("e2")]).unwrap();

        let first = waiters.remove(0).await.unwrap().unwrap();
        let second = waiters.remove(0).await.unwrap().unwrap();
        assert_eq!(first, Some(b("e1")));
        assert_eq!(second, Some(b("e2")));

        // the third waiter is still blocked; a later push serves it
        let third = waiters.remove(0);
        db.rpush("k", vec![b("e3")]).unwrap();
        assert_eq!(third.await.unwrap().unwrap(), Some(b("e3")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blpop_ignores_non_list_writes() {
        let db = Db::new();
        let waiter = {
            let db = db.clone();
            tokio::spawn(async move { db.blpop("k", Some(Duration::from_millis(100))).await })
        };
        time::sleep(Duration::from_millis(10)).await;

        // a string write to the key is not a wakeup
        db.set("k".into(), b("x"), None);

        assert_eq!(waiter.await.unwrap().unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_xread_blocking_wakes_on_xadd() {
        let db = Db::new();
        let reader = {
            let db = db.clone();
            tokio::spawn(async move {
                db.xread_blocking(vec![("s".to_string(), StreamId::new(0, 0))], None)
                    .await
            })
        };
        time::sleep(Duration::from_millis(10)).await;

        db.xadd("s", IdSpec::Explicit(StreamId::new(1, 1)), entry_fields())
            .unwrap();

        let groups = reader.await.unwrap().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].1[0].id, StreamId::new(1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_xread_blocking_reblocks_on_stale_wake() {
        let db = Db::new();
        db.xadd("s", IdSpec::Explicit(StreamId::new(1, 1)), entry_fields())
            .unwrap();

        let reader = {
            let db = db.clone();
            tokio::spawn(async move {
                // only interested in entries after 5-0
                db.xread_blocking(
                    vec![("s".to_string(), StreamId::new(5, 0))],
                    Some(Duration::from_millis(200)),
                )
                .await
            })
        };
        time::sleep(Duration::from_millis(10)).await;

        // too old for the filter: the reader wakes, finds nothing, re-blocks
        db.xadd("s", IdSpec::Explicit(StreamId::new(2, 0)), entry_fields())
            .unwrap();
        time::sleep(Duration::from_millis(10)).await;

        db.xadd("s", IdSpec::Explicit(StreamId::new(6, 0)), entry_fields())
            .unwrap();

        let groups = reader.await.unwrap().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].1.len(), 1);
        assert_eq!(groups[0].1[0].id, StreamId::new(6, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_xread_blocking_times_out_with_empty_result() {
        let db = Db::new();
        let groups = db
            .xread_blocking(
                vec![("s".to_string(), StreamId::MIN)],
                Some(Duration::from_millis(100)),
            )
            .await
            .unwrap();
        assert!(groups.is_empty());
    }
}
