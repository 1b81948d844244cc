//! Implement the `LPOP` command.
use super::Command;
use crate::{parse::Parse, ConnectionStream, Error, Frame, Result};
use bytes::Bytes;
use tracing::debug;

/// Remove and return elements from the head of the list at `key`.
///
/// Without a count, pops a single element and replies with a bulk string
/// (null bulk when there is nothing to pop). With a count `n`, pops up to
/// `n` elements and replies with an array; when nothing can be popped the
/// reply is a null array.
#[derive(Debug, PartialEq, Eq)]
pub struct LpopCmd {
    key: String,
    count: Option<i64>,
}

impl LpopCmd {
    /// Creates a new [`LpopCmd`] command.
    pub fn new(key: impl ToString, count: Option<i64>) -> Self {
        Self {
            key: key.to_string(),
            count,
        }
    }
}

impl Command for LpopCmd {
    fn parse_frames(parse: &mut Parse) -> Result<Self>
    where
        Self: Sized,
    {
        let key = parse.next_string()?;
        let count = match parse.next_int() {
            Ok(count) if count < 0 => {
                return Err(Error::Command(
                    "value is out of range, must be positive".to_string(),
                ))
            }
            Ok(count) => Some(count),
            Err(Error::EndOfStream) => None,
            Err(err) => return Err(err),
        };
        Ok(Self { key, count })
    }

    #[tracing::instrument(skip_all)]
    async fn apply<S: ConnectionStream>(
        self,
        db: &crate::Db,
        dst: &mut crate::Connection<S>,
        _shutdown: &mut crate::ShutdownSignal,
    ) -> Result<()> {
        let wanted = self.count.unwrap_or(1) as usize;
        let response = match db.lpop(&self.key, wanted) {
            Ok(popped) => match self.count {
                // no count: single bulk or null bulk
                None => match popped.and_then(|mut values| values.pop()) {
                    Some(value) => Frame::BulkString(value),
                    None => Frame::NullBulkString,
                },
                // count given: array of what was popped, null array when
                // nothing could be
                Some(_) => match popped {
                    Some(values) if values.is_empty() && wanted > 0 => Frame::NullArray,
                    Some(values) => {
                        Frame::Array(values.into_iter().map(Frame::BulkString).collect())
                    }
                    None => Frame::NullArray,
                },
            },
            Err(err) => err.into_reply()?,
        };

        debug!(?response);

        dst.write_frame(&response).await?;

        Ok(())
    }

    fn into_frame(self) -> Result<Frame> {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("lpop"))?;
        frame.push_bulk(Bytes::from(self.key))?;
        if let Some(count) = self.count {
            frame.push_bulk(Bytes::from(count.to_string()))?;
        }
        Ok(frame)
    }
}
