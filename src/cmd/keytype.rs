//! Implement the `TYPE` command.
use super::Command;
use crate::{parse::Parse, ConnectionStream, Frame, Result};
use bytes::Bytes;
use tracing::debug;

/// Report the kind of the value at `key`: `string`, `list`, `stream` or
/// `none` when the key is absent (or its string value has expired).
#[derive(Debug, PartialEq, Eq)]
pub struct TypeCmd {
    key: String,
}

impl TypeCmd {
    /// Creates a new [`TypeCmd`] command.
    pub fn new(key: impl ToString) -> Self {
        Self {
            key: key.to_string(),
        }
    }
}

impl Command for TypeCmd {
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
        let response = Frame::SimpleString(db.key_type(&self.key).to_string());

        debug!(?response);

        dst.write_frame(&response).await?;

        Ok(())
    }

    fn into_frame(self) -> Result<Frame> {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("type"))?;
        frame.push_bulk(Bytes::from(self.key))?;
        Ok(frame)
    }
}
