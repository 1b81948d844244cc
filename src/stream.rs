//! Append-only stream values and their ordered identifiers.
use crate::{Error, Result};
use bytes::Bytes;
use std::fmt;

/// Identifier of a stream entry.
///
/// Ordering is lexicographic over `(ms, seq)`; a stream stores its entries in
/// strictly increasing id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    /// The smallest id. Also the id `0-0`, which `XADD` refuses to assign.
    pub const MIN: StreamId = StreamId { ms: 0, seq: 0 };
    /// The largest id, used as the open end of a range.
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(ms: u64, seq: u64) -> Self {
        StreamId { ms, seq }
    }

    /// Parse an explicit `<ms>-<seq>` id.
    pub(crate) fn parse(s: &str) -> Result<Self> {
        let (ms, seq) = s.split_once('-').ok_or_else(invalid_id)?;
        Ok(StreamId {
            ms: ms.parse().map_err(|_| invalid_id())?,
            seq: seq.parse().map_err(|_| invalid_id())?,
        })
    }

    /// Parse the start bound of an `XRANGE`: `-` is the minimum, a bare
    /// `<ms>` means `(ms, 0)`.
    pub(crate) fn parse_range_start(s: &str) -> Result<Self> {
        match s {
            "-" => Ok(StreamId::MIN),
            _ => Self::parse_partial(s, 0),
        }
    }

    /// Parse the end bound of an `XRANGE`: `+` is the maximum, a bare
    /// `<ms>` means the whole millisecond, `(ms, ∞)`.
    pub(crate) fn parse_range_end(s: &str) -> Result<Self> {
        match s {
            "+" => Ok(StreamId::MAX),
            _ => Self::parse_partial(s, u64::MAX),
        }
    }

    /// Parse the last-seen id of an `XREAD` request; a bare `<ms>` means
    /// `(ms, 0)`.
    pub(crate) fn parse_last_seen(s: &str) -> Result<Self> {
        Self::parse_partial(s, 0)
    }

    fn parse_partial(s: &str, default_seq: u64) -> Result<Self> {
        match s.split_once('-') {
            Some(_) => Self::parse(s),
            None => Ok(StreamId {
                ms: s.parse().map_err(|_| invalid_id())?,
                seq: default_seq,
            }),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

fn invalid_id() -> Error {
    Error::Command("Invalid stream ID specified as stream command argument".to_string())
}

/// How `XADD` chooses the id of a new entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IdSpec {
    /// `*`: take the current wall clock, sequence auto-assigned.
    Auto,
    /// `<ms>-*`: explicit timestamp, sequence auto-assigned.
    AutoSeq(u64),
    /// `<ms>-<seq>`: fully explicit.
    Explicit(StreamId),
}

impl IdSpec {
    pub(crate) fn parse(s: &str) -> Result<Self> {
        if s == "*" {
            return Ok(IdSpec::Auto);
        }
        match s.split_once('-') {
            Some((ms, "*")) => Ok(IdSpec::AutoSeq(ms.parse().map_err(|_| invalid_id())?)),
            _ => Ok(IdSpec::Explicit(StreamId::parse(s)?)),
        }
    }
}

impl fmt::Display for IdSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdSpec::Auto => write!(f, "*"),
            IdSpec::AutoSeq(ms) => write!(f, "{ms}-*"),
            IdSpec::Explicit(id) => write!(f, "{id}"),
        }
    }
}

/// A single stream entry: id plus ordered field/value pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Vec<(Bytes, Bytes)>,
}

/// An append-only sequence of entries with strictly increasing ids.
///
/// Entries are kept in a vector ordered by id, so appends go at the tail and
/// range lookups binary-search.
#[derive(Debug, Default)]
pub(crate) struct Stream {
    entries: Vec<StreamEntry>,
}

impl Stream {
    pub(crate) fn new() -> Self {
        Stream {
            entries: Vec::new(),
        }
    }

    /// Id of the newest entry.
    ///
    /// An empty stream reports `0-0`: sequence assignment and validation
    /// treat that as the top item, which is what makes `0-*` on a fresh
    /// stream yield `0-1`.
    fn last_id(&self) -> StreamId {
        self.entries.last().map(|e| e.id).unwrap_or(StreamId::MIN)
    }

    /// Append an entry, choosing its id according to `spec`.
    ///
    /// `now_ms` is the current unix-epoch wall clock in milliseconds, used by
    /// the `*` form.
    pub(crate) fn add(
        &mut self,
        spec: IdSpec,
        fields: Vec<(Bytes, Bytes)>,
        now_ms: u64,
    ) -> Result<StreamId> {
        let last = self.last_id();
        let id = match spec {
            IdSpec::Auto => {
                if now_ms > last.ms {
                    StreamId::new(now_ms, 0)
                } else {
                    // clock at or behind the newest entry: stay on its
                    // millisecond and bump the sequence
                    StreamId::new(last.ms, last.seq + 1)
                }
            }
            IdSpec::AutoSeq(ms) => {
                if ms > last.ms {
                    StreamId::new(ms, 0)
                } else if ms == last.ms {
                    StreamId::new(ms, last.seq + 1)
                } else {
                    return Err(top_item_error());
                }
            }
            IdSpec::Explicit(id) => {
                if id == StreamId::MIN {
                    return Err(Error::Command(
                        "The ID specified in XADD must be greater than 0-0".to_string(),
                    ));
                }
                if id <= last {
                    return Err(top_item_error());
                }
                id
            }
        };

        self.entries.push(StreamEntry { id, fields });
        Ok(id)
    }

    /// Entries whose id lies in the inclusive interval `[start, end]`.
    pub(crate) fn range(&self, start: StreamId, end: StreamId) -> Vec<StreamEntry> {
        let from = self.entries.partition_point(|e| e.id < start);
        let to = self.entries.partition_point(|e| e.id <= end);
        if from >= to {
            return Vec::new();
        }
        self.entries[from..to].to_vec()
    }

    /// Entries whose id is strictly greater than `after`.
    pub(crate) fn entries_after(&self, after: StreamId) -> Vec<StreamEntry> {
        let from = self.entries.partition_point(|e| e.id <= after);
        self.entries[from..].to_vec()
    }
}

fn top_item_error() -> Error {
    Error::Command(
        "The ID specified in XADD is equal or smaller than the target stream top item".to_string(),
    )
}
