//! Implementation of the `GET` command.
use super::Command;
use crate::{parse::Parse, ConnectionStream, Frame, Result};
use bytes::Bytes;
use tracing::debug;

/// Get the string `value` for a given `key`.
///
/// If the key does not exist, or its value has expired, a null bulk string
/// is returned. A key holding a list or stream is a `WRONGTYPE` error.
#[derive(Debug)]
pub struct GetCmd {
    key: String,
}

impl GetCmd {
    /// Creates a new [`GetCmd`] command.
    pub fn new(key: impl ToString) -> Self {
        Self {
            key: key.to_string(),
        }
    }

    /// Returns a reference to the key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Command for GetCmd {
    fn parse_frames(parse: &mut Parse) -> Result<Self>
    where
        Self: Sized,
    {
        let key = parse.next_string()?;
        Ok(Self { key })
    }

    #[tracing::instrument(skip_all)]
    async fn apply<S: ConnectionStream>(
        self,
        db: &crate::Db,
        dst: &mut crate::Connection<S>,
        _shutdown: &mut crate::ShutdownSignal,
    ) -> Result<()> {
        let response = match db.get(&self.key) {
            Ok(Some(value)) => Frame::BulkString(value),
            Ok(None) => Frame::NullBulkString,
            Err(err) => err.into_reply()?,
        };

        debug!(?response);

        dst.write_frame(&response).await?;

        Ok(())
    }

    fn into_frame(self) -> Result<Frame> {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("get"))?;
        frame.push_bulk(Bytes::from(self.key))?;
        Ok(frame)
    }
}
