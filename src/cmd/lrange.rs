//! Implement the `LRANGE` command.
use super::Command;
use crate::{parse::Parse, ConnectionStream, Frame, Result};
use bytes::Bytes;
use tracing::debug;

/// Return the inclusive slice `[start..=stop]` of the list at `key`.
///
/// Indices follow Redis semantics: negatives count from the tail (`-1` is
/// the last element) and out-of-range bounds are clamped. An absent key or
/// an inverted interval yields an empty array.
#[derive(Debug, PartialEq, Eq)]
pub struct LrangeCmd {
    key: String,
    start: i64,
    stop: i64,
}

impl LrangeCmd {
    /// Creates a new [`LrangeCmd`] command.
    pub fn new(key: impl ToString, start: i64, stop: i64) -> Self {
        Self {
            key: key.to_string(),
            start,
            stop,
        }
    }
}

impl Command for LrangeCmd {
    fn parse_frames(parse: &mut Parse) -> Result<Self>
    where
        Self: Sized,
    {
        let key = parse.next_string()?;
        let start = parse.next_int()?;
        let stop = parse.next_int()?;
        Ok(Self { key, start, stop })
    }

    #[tracing::instrument(skip_all)]
    async fn apply<S: ConnectionStream>(
        self,
        db: &crate::Db,
        dst: &mut crate::Connection<S>,
        _shutdown: &mut crate::ShutdownSignal,
    ) -> Result<()> {
        let response = match db.lrange(&self.key, self.start, self.stop) {
            Ok(values) => Frame::Array(values.into_iter().map(Frame::BulkString).collect()),
            Err(err) => err.into_reply()?,
        };

        debug!(?response);

        dst.write_frame(&response).await?;

        Ok(())
    }

    fn into_frame(self) -> Result<Frame> {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("lrange"))?;
        frame.push_bulk(Bytes::from(self.key))?;
        frame.push_bulk(Bytes::from(self.start.to_string()))?;
        frame.push_bulk(Bytes::from(self.stop.to_string()))?;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CommandVariant;
    use std::io::Cursor;

    #[test]
    fn test_parse_lrange() {
        let src = b"*4\r\n$6\r\nLRANGE\r\n$1\r\nk\r\n$1\r\n0\r\n$2\r\n-1\r\n";
        let mut src = Cursor::new(&src[..]);
        let frame = Frame::parse(&mut src).unwrap();
        let CommandVariant::Lrange(cmd) = CommandVariant::from_frame(frame).unwrap() else {
            panic!("unexpected command");
        };
        assert_eq!(cmd, LrangeCmd::new("k", 0, -1));
    }

    #[test]
    fn test_lrange_rejects_non_integer_index() {
        let src = b"*4\r\n$6\r\nLRANGE\r\n$1\r\nk\r\n$1\r\nx\r\n$1\r\n1\r\n";
        let mut src = Cursor::new(&src[..]);
        let frame = Frame::parse(&mut src).unwrap();
        let err = CommandVariant::from_frame(frame).unwrap_err();
        assert_eq!(
            err.into_reply().unwrap(),
            Frame::SimpleError("ERR value is not an integer or out of range".to_string())
        );
    }
}
