//! Implement the `XADD` command.
use super::Command;
use crate::{
    parse::Parse,
    stream::IdSpec,
    ConnectionStream, Error, Frame, Result,
};
use bytes::Bytes;
use tracing::debug;

/// Append an entry to the stream at `key`, creating the stream on first use.
///
/// The id argument is `*` (wall clock, auto sequence), `<ms>-*` (explicit
/// timestamp, auto sequence) or `<ms>-<seq>`. Assigned ids are strictly
/// increasing; `0-0` is never assigned. The reply is the chosen id as a bulk
/// string.
#[derive(Debug, PartialEq, Eq)]
pub struct XaddCmd {
    key: String,
    id: IdSpec,
    fields: Vec<(Bytes, Bytes)>,
}

impl XaddCmd {
    /// Creates a new [`XaddCmd`] command; `id` takes the wire syntax
    /// (`*`, `<ms>-*` or `<ms>-<seq>`).
    pub fn new(key: impl ToString, id: &str, fields: Vec<(Bytes, Bytes)>) -> Result<Self> {
        Ok(Self {
            key: key.to_string(),
            id: IdSpec::parse(id)?,
            fields,
        })
    }
}

impl Command for XaddCmd {
    fn parse_frames(parse: &mut Parse) -> Result<Self>
    where
        Self: Sized,
    {
        let key = parse.next_string()?;
        let id = IdSpec::parse(&parse.next_string()?)?;

        let mut fields = Vec::new();
        loop {
            match parse.next_bytes() {
                Ok(name) => {
                    let value = parse.next_bytes()?;
                    fields.push((name, value));
                }
                Err(Error::EndOfStream) => break,
                Err(err) => return Err(err),
            }
        }
        if fields.is_empty() {
            // at least one field/value pair is required
            return Err(Error::EndOfStream);
        }

        // the `id` field name carries the entry id on the wire and is never
        // part of the stored body
        fields.retain(|(name, _)| name.as_ref() != b"id");

        Ok(Self { key, id, fields })
    }

    #[tracing::instrument(skip_all)]
    async fn apply<S: ConnectionStream>(
        self,
        db: &crate::Db,
        dst: &mut crate::Connection<S>,
        _shutdown: &mut crate::ShutdownSignal,
    ) -> Result<()> {
        let response = match db.xadd(&self.key, self.id, self.fields) {
            Ok(id) => Frame::BulkString(Bytes::from(id.to_string())),
            Err(err) => err.into_reply()?,
        };

        debug!(?response);

        dst.write_frame(&response).await?;

        Ok(())
    }

    fn into_frame(self) -> Result<Frame> {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("xadd"))?;
        frame.push_bulk(Bytes::from(self.key))?;
        frame.push_bulk(Bytes::from(self.id.to_string()))?;
        for (name, value) in self.fields {
            frame.push_bulk(name)?;
            frame.push_bulk(value)?;
        }
        Ok(frame)
    }
}
