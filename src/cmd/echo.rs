//! Implementation of the `ECHO` command.
use super::Command;
use crate::{parse::Parse, ConnectionStream, Frame, Result};
use bytes::Bytes;
use tracing::debug;

/// Returns the given message as a bulk string.
#[derive(Debug, PartialEq, Eq)]
pub struct EchoCmd {
    msg: Bytes,
}

impl EchoCmd {
    /// Creates a new [`EchoCmd`] command.
    pub fn new(msg: Bytes) -> Self {
        Self { msg }
    }
}

impl Command for EchoCmd {
    fn parse_frames(parse: &mut Parse) -> Result<Self>
    where
        Self: Sized,
    {
        let msg = parse.next_bytes()?;
        Ok(Self { msg })
    }

    #[tracing::instrument(skip_all)]
    async fn apply<S: ConnectionStream>(
        self,
        _db: &crate::Db,
        dst: &mut crate::Connection<S>,
        _shutdown: &mut crate::ShutdownSignal,
    ) -> Result<()> {
        let response = Frame::BulkString(self.msg);

        debug!(?response);

        dst.write_frame(&response).await?;

        Ok(())
    }

    fn into_frame(self) -> Result<Frame> {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("echo"))?;
        frame.push_bulk(self.msg)?;
        Ok(frame)
    }
}
