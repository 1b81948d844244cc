//! Implement the `XRANGE` command.
use super::{stream_entry_frame, Command};
use crate::{parse::Parse, stream::StreamId, ConnectionStream, Frame, Result};
use bytes::Bytes;
use tracing::debug;

/// Return the entries of the stream at `key` whose ids lie in the closed
/// interval `[start, end]`.
///
/// Bounds are ids, bare millisecond values (`start` rounds down to
/// `(ms, 0)`, `end` up to the whole millisecond) or the sentinels `-` and
/// `+`. An absent key yields an empty array.
#[derive(Debug, PartialEq, Eq)]
pub struct XrangeCmd {
    key: String,
    start: StreamId,
    end: StreamId,
}

impl XrangeCmd {
    /// Creates a new [`XrangeCmd`] command; bounds take the wire syntax.
    pub fn new(key: impl ToString, start: &str, end: &str) -> Result<Self> {
        Ok(Self {
            key: key.to_string(),
            start: StreamId::parse_range_start(start)?,
            end: StreamId::parse_range_end(end)?,
        })
    }
}

impl Command for XrangeCmd {
    fn parse_frames(parse: &mut Parse) -> Result<Self>
    where
        Self: Sized,
    {
        let key = parse.next_string()?;
        let start = StreamId::parse_range_start(&parse.next_string()?)?;
        let end = StreamId::parse_range_end(&parse.next_string()?)?;
        Ok(Self { key, start, end })
    }

    #[tracing::instrument(skip_all)]
    async fn apply<S: ConnectionStream>(
        self,
        db: &crate::Db,
        dst: &mut crate::Connection<S>,
        _shutdown: &mut crate::ShutdownSignal,
    ) -> Result<()> {
        let response = match db.xrange(&self.key, self.start, self.end) {
            Ok(entries) => Frame::Array(entries.into_iter().map(stream_entry_frame).collect()),
            Err(err) => err.into_reply()?,
        };

        debug!(?response);

        dst.write_frame(&response).await?;

        Ok(())
    }

    fn into_frame(self) -> Result<Frame> {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("xrange"))?;
        frame.push_bulk(Bytes::from(self.key))?;
        frame.push_bulk(Bytes::from(self.start.to_string()))?;
        frame.push_bulk(Bytes::from(self.end.to_string()))?;
        Ok(frame)
    }
}
