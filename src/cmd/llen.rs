//! Implement the `LLEN` command.
use super::Command;
use crate::{parse::Parse, ConnectionStream, Frame, Result};
use bytes::Bytes;
use tracing::debug;

/// Return the length of the list at `key`; zero if the key is absent.
#[derive(Debug, PartialEq, Eq)]
pub struct LlenCmd {
    key: String,
}

impl LlenCmd {
    /// Creates a new [`LlenCmd`] command.
    pub fn new(key: impl ToString) -> Self {
        Self {
            key: key.to_string(),
        }
    }
}

impl Command for LlenCmd {
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
        let response = match db.llen(&self.key) {
            Ok(len) => Frame::Integer(len as i64),
            Err(err) => err.into_reply()?,
        };

        debug!(?response);

        dst.write_frame(&response).await?;

        Ok(())
    }

    fn into_frame(self) -> Result<Frame> {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("llen"))?;
        frame.push_bulk(Bytes::from(self.key))?;
        Ok(frame)
    }
}
