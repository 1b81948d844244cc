//! Implementation of the `PING` command.
use super::Command;
use crate::{ConnectionStream, Frame};
use bytes::Bytes;
use tracing::debug;

/// Pings the server, which responds with either `PONG` or a provided custom message.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PingCmd {
    msg: Option<Bytes>,
}

impl PingCmd {
    /// Creates a new [`PingCmd`] command.
    pub fn new(msg: Option<Bytes>) -> Self {
        Self { msg }
    }
}

impl Command for PingCmd {
    fn parse_frames(parse: &mut super::Parse) -> crate::Result<Self>
    where
        Self: Sized,
    {
        match parse.next_bytes() {
            Ok(msg) => Ok(Self::new(Some(msg))),
            Err(crate::Error::EndOfStream) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    #[tracing::instrument(skip_all)]
    async fn apply<S: ConnectionStream>(
        self,
        _db: &crate::Db,
        dst: &mut crate::Connection<S>,
        _shutdown: &mut crate::ShutdownSignal,
    ) -> crate::Result<()> {
        let response = match self.msg {
            None => Frame::SimpleString("PONG".to_string()),
            Some(msg) => Frame::BulkString(msg),
        };

        debug!(?response);

        dst.write_frame(&response).await?;

        Ok(())
    }

    fn into_frame(self) -> crate::Result<Frame> {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("ping"))?;
        if let Some(msg) = self.msg {
            frame.push_bulk(msg)?;
        }
        Ok(frame)
    }
}
