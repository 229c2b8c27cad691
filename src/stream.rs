//! Append-only stream log and the identifiers of its entries.
//!
//! A stream is an ordered log of entries. Every entry is identified by an
//! [`EntryId`] made of a millisecond timestamp and a sequence number, rendered
//! as `"<ms>-<seq>"`. Identifiers within a stream are strictly increasing.

use crate::Frame;

use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of a stream entry.
///
/// Ordering is by milliseconds first, then by sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntryId {
    pub ms: u64,
    pub seq: u64,
}

/// Ordered `(field, value)` pairs carried by an entry.
pub type Fields = Vec<(String, Bytes)>;

/// A single immutable record of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: EntryId,
    pub fields: Fields,
}

/// How the identifier of a new entry is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSpec {
    /// `*`, fully generated from the clock.
    Auto,
    /// `<ms>-*`, the sequence number is generated.
    AutoSeq(u64),
    /// `<ms>-<seq>`, given by the caller.
    Explicit(EntryId),
}

/// Errors raised when appending to a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// `0-0` was given as an explicit identifier.
    ZeroId,
    /// The identifier does not sort after the last entry.
    NotIncreasing,
    /// Every possible identifier has been used.
    Exhausted,
    /// An append without fields.
    NoFields,
}

/// An append-only log of entries ordered by identifier.
#[derive(Debug, Default)]
pub struct Stream {
    entries: BTreeMap<EntryId, Fields>,
    last_id: EntryId,
}

const ERROR_INVALID_ID: &str = "ERR Invalid stream ID specified as stream command argument";

impl EntryId {
    /// The smallest identifier. Never assigned to an entry.
    pub const MIN: EntryId = EntryId { ms: 0, seq: 0 };

    /// The largest identifier.
    pub const MAX: EntryId = EntryId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(ms: u64, seq: u64) -> EntryId {
        EntryId { ms, seq }
    }

    /// Parses `<ms>-<seq>` or `<ms>`. A missing sequence takes `default_seq`.
    pub(crate) fn parse_with_default(src: &str, default_seq: u64) -> Result<EntryId, crate::Error> {
        match src.split_once('-') {
            Some((ms, seq)) => Ok(EntryId {
                ms: parse_u64(ms)?,
                seq: parse_u64(seq)?,
            }),
            None => Ok(EntryId {
                ms: parse_u64(src)?,
                seq: default_seq,
            }),
        }
    }

    /// Parses the lower bound of a range. `-` is the minimum.
    pub(crate) fn parse_range_start(src: &str) -> Result<EntryId, crate::Error> {
        match src {
            "-" => Ok(EntryId::MIN),
            "+" => Ok(EntryId::MAX),
            _ => EntryId::parse_with_default(src, 0),
        }
    }

    /// Parses the upper bound of a range. `+` is the maximum.
    pub(crate) fn parse_range_end(src: &str) -> Result<EntryId, crate::Error> {
        match src {
            "-" => Ok(EntryId::MIN),
            "+" => Ok(EntryId::MAX),
            _ => EntryId::parse_with_default(src, u64::MAX),
        }
    }

    /// Returns the identifier directly following `self`, if any.
    fn successor(self) -> Option<EntryId> {
        match self.seq.checked_add(1) {
            Some(seq) => Some(EntryId { ms: self.ms, seq }),
            None => self.ms.checked_add(1).map(|ms| EntryId { ms, seq: 0 }),
        }
    }
}

fn parse_u64(src: &str) -> Result<u64, crate::Error> {
    use atoi::atoi;

    // `atoi` stops at the first non digit, so the whole input is checked first.
    if src.is_empty() || !src.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ERROR_INVALID_ID.into());
    }

    atoi::<u64>(src.as_bytes()).ok_or_else(|| ERROR_INVALID_ID.into())
}

impl FromStr for EntryId {
    type Err = crate::Error;

    fn from_str(src: &str) -> Result<EntryId, crate::Error> {
        EntryId::parse_with_default(src, 0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}-{}", self.ms, self.seq)
    }
}

impl IdSpec {
    pub(crate) fn parse(src: &str) -> Result<IdSpec, crate::Error> {
        if src == "*" {
            return Ok(IdSpec::Auto);
        }

        match src.split_once('-') {
            Some((ms, "*")) => Ok(IdSpec::AutoSeq(parse_u64(ms)?)),
            _ => Ok(IdSpec::Explicit(EntryId::parse_with_default(src, 0)?)),
        }
    }
}

impl fmt::Display for IdSpec {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdSpec::Auto => "*".fmt(fmt),
            IdSpec::AutoSeq(ms) => write!(fmt, "{}-*", ms),
            IdSpec::Explicit(id) => id.fmt(fmt),
        }
    }
}

impl Entry {
    /// Encodes the entry as `[id, [field, value, ...]]`.
    pub(crate) fn into_frame(self) -> Frame {
        let mut fields = Frame::array();

        for (name, value) in self.fields {
            fields.push_bulk(Bytes::from(name.into_bytes()));
            fields.push_bulk(value);
        }

        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from(self.id.to_string().into_bytes()));
        frame.push(fields);
        frame
    }

    /// Decodes an entry encoded by `into_frame`.
    pub(crate) fn from_frame(frame: Frame) -> crate::Result<Entry> {
        let mut parts = match frame {
            Frame::Array(parts) if parts.len() == 2 => parts.into_iter(),
            frame => return Err(frame.to_error()),
        };

        let id = match parts.next() {
            Some(Frame::Bulk(id)) => std::str::from_utf8(&id)?.parse::<EntryId>()?,
            Some(Frame::Simple(id)) => id.parse::<EntryId>()?,
            Some(frame) => return Err(frame.to_error()),
            None => return Err("protocol error: missing entry id".into()),
        };

        let values = match parts.next() {
            Some(Frame::Array(values)) if values.len() % 2 == 0 => values,
            Some(frame) => return Err(frame.to_error()),
            None => return Err("protocol error: missing entry fields".into()),
        };

        let mut fields = Vec::with_capacity(values.len() / 2);
        let mut values = values.into_iter();

        while let (Some(name), Some(value)) = (values.next(), values.next()) {
            let name = match name {
                Frame::Bulk(name) => String::from_utf8(name.to_vec())?,
                Frame::Simple(name) => name,
                frame => return Err(frame.to_error()),
            };

            let value = match value {
                Frame::Bulk(value) => value,
                Frame::Simple(value) => Bytes::from(value.into_bytes()),
                frame => return Err(frame.to_error()),
            };

            fields.push((name, value));
        }

        Ok(Entry { id, fields })
    }
}

impl Stream {
    pub fn new() -> Stream {
        Stream::default()
    }

    /// Number of entries in the stream.
    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identifier of the most recent entry, `0-0` for an empty stream.
    pub fn last_id(&self) -> EntryId {
        self.last_id
    }

    /// Appends `fields` using the current wall clock for generated identifiers.
    pub fn append(&mut self, id: IdSpec, fields: Fields) -> Result<EntryId, StreamError> {
        self.append_at(id, fields, now_ms())
    }

    /// Appends `fields`, treating `now_ms` as the current time.
    ///
    /// Generated identifiers never go backwards, even if `now_ms` does.
    pub fn append_at(
        &mut self,
        id_spec: IdSpec,
        fields: Fields,
        now_ms: u64,
    ) -> Result<EntryId, StreamError> {
        if fields.is_empty() {
            return Err(StreamError::NoFields);
        }

        let last = self.last_id;

        let id = match id_spec {
            IdSpec::Auto => {
                if now_ms > last.ms {
                    EntryId::new(now_ms, 0)
                } else {
                    last.successor().ok_or(StreamError::Exhausted)?
                }
            }
            IdSpec::AutoSeq(ms) => {
                if ms == last.ms && !self.is_empty() {
                    let seq = last.seq.checked_add(1).ok_or(StreamError::NotIncreasing)?;
                    EntryId::new(ms, seq)
                } else if ms == 0 {
                    EntryId::new(0, 1)
                } else {
                    EntryId::new(ms, 0)
                }
            }
            IdSpec::Explicit(id) => {
                if id == EntryId::MIN {
                    return Err(StreamError::ZeroId);
                }
                id
            }
        };

        if id <= last {
            return Err(StreamError::NotIncreasing);
        }

        self.entries.insert(id, fields);
        self.last_id = id;

        Ok(id)
    }

    /// Entries with an identifier strictly greater than `after`.
    pub fn read_after(&self, after: EntryId, count: Option<u64>) -> Vec<Entry> {
        let iter = self
            .entries
            .range((Bound::Excluded(after), Bound::Unbounded))
            .map(|(id, fields)| Entry {
                id: *id,
                fields: fields.clone(),
            });

        take(iter, count)
    }

    /// Entries with an identifier in `[start, end]`.
    pub fn range(&self, start: EntryId, end: EntryId, count: Option<u64>) -> Vec<Entry> {
        if start > end {
            return vec![];
        }

        let iter = self.entries.range(start..=end).map(|(id, fields)| Entry {
            id: *id,
            fields: fields.clone(),
        });

        take(iter, count)
    }
}

fn take(iter: impl Iterator<Item = Entry>, count: Option<u64>) -> Vec<Entry> {
    match count {
        Some(count) => iter.take(count as usize).collect(),
        None => iter.collect(),
    }
}

/// Milliseconds since the Unix epoch.
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl std::error::Error for StreamError {}

impl fmt::Display for StreamError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::ZeroId => "ERR The ID specified in XADD must be greater than 0-0".fmt(fmt),
            StreamError::NotIncreasing => {
                "ERR The ID specified in XADD is equal or smaller than the target stream top item"
                    .fmt(fmt)
            }
            StreamError::Exhausted => {
                "ERR The stream has exhausted the last possible ID, unable to add more items"
                    .fmt(fmt)
            }
            StreamError::NoFields => "ERR wrong number of arguments for 'xadd' command".fmt(fmt),
        }
    }
}
