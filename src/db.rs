use crate::stream::{Entry, EntryId, Fields, IdSpec, Stream, StreamError};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Server state shared across all connections.
///
/// Cloning a `Db` is cheap, every clone refers to the same streams.
#[derive(Debug, Clone)]
pub(crate) struct Db {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    /// Shared state guarded by a mutex. The lock is never held across an `.await`.
    state: Mutex<State>,
    /// Announces the name of every stream that received an entry.
    appended: broadcast::Sender<String>,
}

#[derive(Debug, Default)]
struct State {
    /// Streams by name. A stream is created by its first append.
    streams: HashMap<String, Stream>,
}

/// Capacity of the append notification channel. Receivers that lag behind
/// simply re-check their streams.
const APPEND_CHANNEL_CAPACITY: usize = 1024;

impl Db {
    pub(crate) fn new() -> Db {
        let (appended, _) = broadcast::channel(APPEND_CHANNEL_CAPACITY);

        Db {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                appended,
            }),
        }
    }

    /// Appends an entry to `key`, creating the stream if needed.
    pub(crate) fn append(
        &self,
        key: &str,
        id: IdSpec,
        fields: Fields,
    ) -> Result<EntryId, StreamError> {
        let mut state = self.state();

        let id = match state.streams.get_mut(key) {
            Some(stream) => stream.append(id, fields)?,
            None => {
                // Only create the stream once the append is known to succeed.
                let mut stream = Stream::new();
                let id = stream.append(id, fields)?;
                state.streams.insert(key.to_string(), stream);
                id
            }
        };

        drop(state);

        // An error only means nobody is blocked on a read.
        let _ = self.shared.appended.send(key.to_string());

        Ok(id)
    }

    /// Entries of `key` after `after`. Empty if the stream does not exist.
    pub(crate) fn read_after(&self, key: &str, after: EntryId, count: Option<u64>) -> Vec<Entry> {
        self.state()
            .streams
            .get(key)
            .map(|stream| stream.read_after(after, count))
            .unwrap_or_default()
    }

    /// Entries of `key` in `[start, end]`. Empty if the stream does not exist.
    pub(crate) fn range(
        &self,
        key: &str,
        start: EntryId,
        end: EntryId,
        count: Option<u64>,
    ) -> Vec<Entry> {
        self.state()
            .streams
            .get(key)
            .map(|stream| stream.range(start, end, count))
            .unwrap_or_default()
    }

    /// Number of entries in `key`, `0` if the stream does not exist.
    pub(crate) fn len(&self, key: &str) -> u64 {
        self.state()
            .streams
            .get(key)
            .map(Stream::len)
            .unwrap_or(0)
    }

    /// Last identifier of `key`, `0-0` if the stream does not exist.
    pub(crate) fn last_id(&self, key: &str) -> EntryId {
        self.state()
            .streams
            .get(key)
            .map(Stream::last_id)
            .unwrap_or(EntryId::MIN)
    }

    /// Returns a receiver notified with the stream name after every append.
    ///
    /// Subscribe *before* reading so that an append racing the read is not missed.
    pub(crate) fn subscribe_appends(&self) -> broadcast::Receiver<String> {
        self.shared.appended.subscribe()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave a stream half written:
        // `Stream::append` validates before it mutates.
        match self.shared.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn event(user: &str) -> Fields {
        vec![("user".to_string(), Bytes::from(user.to_string()))]
    }

    #[tokio::test]
    async fn missing_stream_reads_as_empty() {
        let db = Db::new();

        assert_eq!(db.len("nope"), 0);
        assert!(db.read_after("nope", EntryId::MIN, Some(10)).is_empty());
        assert!(db.range("nope", EntryId::MIN, EntryId::MAX, None).is_empty());
        assert_eq!(db.last_id("nope"), EntryId::MIN);
    }

    #[tokio::test]
    async fn failed_append_does_not_create_stream() {
        let db = Db::new();

        let err = db.append("s", IdSpec::Explicit(EntryId::MIN), event("juan"));
        assert_eq!(err, Err(StreamError::ZeroId));
        assert_eq!(db.len("s"), 0);
    }

    #[tokio::test]
    async fn append_notifies_subscribers() {
        let db = Db::new();
        let mut rx = db.subscribe_appends();

        let id = db.append("s", IdSpec::Auto, event("juan")).unwrap();

        assert_eq!(rx.recv().await.unwrap(), "s");
        assert_eq!(db.last_id("s"), id);
        assert_eq!(db.len("s"), 1);
    }
}
