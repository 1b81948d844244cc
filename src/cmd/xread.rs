//! Implement the `XREAD` command.
use super::{stream_entry_frame, Command};
use crate::{parse::Parse, stream::StreamId, ConnectionStream, Error, Frame, Result};
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

/// Read entries strictly newer than a last-seen id from one or more streams.
///
/// ```text
/// XREAD [BLOCK timeout] STREAMS key [key ...] id [id ...]
/// ```
///
/// The reply groups entries per stream as `[key, [entry, ...]]`, omitting
/// streams with nothing new; when every stream is empty the reply is the
/// null array. With `BLOCK`, the command suspends until one of the streams
/// grows past its last-seen id or the timeout (seconds, fractions permitted,
/// `0` = forever) elapses.
#[derive(Debug, PartialEq, Eq)]
pub struct XreadCmd {
    /// `None`: non-blocking. `Some(None)`: block forever. `Some(Some(d))`:
    /// block with a deadline.
    block: Option<Option<Duration>>,
    queries: Vec<(String, StreamId)>,
}

impl XreadCmd {
    /// Creates a new [`XreadCmd`] command; ids take the wire syntax.
    pub fn new(
        block: Option<Option<Duration>>,
        queries: &[(&str, &str)],
    ) -> Result<Self> {
        let queries = queries
            .iter()
            .map(|(key, id)| Ok((key.to_string(), StreamId::parse_last_seen(id)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { block, queries })
    }
}

impl Command for XreadCmd {
    fn parse_frames(parse: &mut Parse) -> Result<Self>
    where
        Self: Sized,
    {
        let mut block = None;

        let mut word = parse.next_string()?;
        if word.eq_ignore_ascii_case("block") {
            let secs = parse.next_timeout_secs()?;
            block = Some((secs > 0.0).then(|| Duration::from_secs_f64(secs)));
            word = parse.next_string()?;
        }

        if !word.eq_ignore_ascii_case("streams") {
            return Err(Error::Command("syntax error".to_string()));
        }

        let mut args = Vec::new();
        loop {
            match parse.next_string() {
                Ok(arg) => args.push(arg),
                Err(Error::EndOfStream) => break,
                Err(err) => return Err(err),
            }
        }

        // the argument list is half keys, half ids, in matching order
        if args.is_empty() || args.len() % 2 != 0 {
            return Err(Error::Command(
                "Unbalanced XREAD list of streams: for each stream key an ID or '$' must be specified"
                    .to_string(),
            ));
        }

        let (keys, ids) = args.split_at(args.len() / 2);
        let queries = keys
            .iter()
            .zip(ids)
            .map(|(key, id)| Ok((key.clone(), StreamId::parse_last_seen(id)?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { block, queries })
    }

    /// Apply the command, suspending when `BLOCK` was given and nothing is
    /// new yet.
    ///
    /// Like `BLPOP`, a suspended read is cancelled by the peer hanging up or
    /// by server shutdown.
    #[tracing::instrument(skip_all)]
    async fn apply<S: ConnectionStream>(
        self,
        db: &crate::Db,
        dst: &mut crate::Connection<S>,
        shutdown: &mut crate::ShutdownSignal,
    ) -> Result<()> {
        match self.block {
            None => {
                let response = reply_frame(db.xread(&self.queries));
                let response = match response {
                    Ok(frame) => frame,
                    Err(err) => err.into_reply()?,
                };
                debug!(?response);
                dst.write_frame(&response).await?;
            }
            Some(timeout) => {
                tokio::select! {
                    res = db.xread_blocking(self.queries, timeout) => {
                        let response = match reply_frame(res) {
                            Ok(frame) => frame,
                            Err(err) => err.into_reply()?,
                        };
                        debug!(?response);
                        dst.write_frame(&response).await?;
                    }
                    res = dst.peer_closed() => {
                        debug!("peer went away while blocked on streams");
                        res?;
                    }
                    _ = shutdown.wait() => {}
                }
            }
        }

        Ok(())
    }

    fn into_frame(self) -> Result<Frame> {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("xread"))?;
        if let Some(timeout) = self.block {
            frame.push_bulk(Bytes::from("block"))?;
            let secs = timeout.map(|t| t.as_secs_f64()).unwrap_or(0.0);
            frame.push_bulk(Bytes::from(secs.to_string()))?;
        }
        frame.push_bulk(Bytes::from("streams"))?;
        for (key, _) in &self.queries {
            frame.push_bulk(Bytes::from(key.clone()))?;
        }
        for (_, id) in &self.queries {
            frame.push_bulk(Bytes::from(id.to_string()))?;
        }
        Ok(frame)
    }
}

/// Build the reply: per-stream groups, or the null array when every group
/// came back empty (including a blocking read that timed out).
fn reply_frame(
    result: Result<Vec<(String, Vec<crate::stream::StreamEntry>)>>,
) -> Result<Frame> {
    let groups = result?;
    if groups.is_empty() {
        return Ok(Frame::NullArray);
    }
    Ok(Frame::Array(
        groups
            .into_iter()
            .map(|(key, entries)| {
                Frame::Array(vec![
                    Frame::BulkString(Bytes::from(key)),
                    Frame::Array(entries.into_iter().map(stream_entry_frame).collect()),
                ])
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CommandVariant;
    use std::io::Cursor;

    fn xread_from(bytes: &[u8]) -> Result<XreadCmd> {
        let mut src = Cursor::new(bytes);
        let frame = Frame::parse(&mut src).unwrap();
        match CommandVariant::from_frame(frame)? {
            CommandVariant::Xread(cmd) => Ok(cmd),
            cmd => panic!("unexpected command {cmd:?}"),
        }
    }

    #[test]
    fn test_parse_xread() {
        let cmd = xread_from(
            b"*6\r\n$5\r\nXREAD\r\n$7\r\nSTREAMS\r\n$2\r\ns1\r\n$2\r\ns2\r\n$3\r\n1-1\r\n$1\r\n5\r\n",
        )
        .unwrap();
        assert_eq!(cmd.block, None);
        assert_eq!(
            cmd.queries,
            vec![
                ("s1".to_string(), StreamId::new(1, 1)),
                ("s2".to_string(), StreamId::new(5, 0)),
            ]
        );
    }

    #[test]
    fn test_parse_xread_block() {
        let cmd = xread_from(
            b"*6\r\n$5\r\nXREAD\r\n$5\r\nBLOCK\r\n$3\r\n1.5\r\n$7\r\nSTREAMS\r\n$1\r\ns\r\n$3\r\n0-0\r\n",
        )
        .unwrap();
        assert_eq!(cmd.block, Some(Some(Duration::from_millis(1500))));

        let cmd = xread_from(
            b"*6\r\n$5\r\nXREAD\r\n$5\r\nBLOCK\r\n$1\r\n0\r\n$7\r\nSTREAMS\r\n$1\r\ns\r\n$3\r\n0-0\r\n",
        )
        .unwrap();
        // zero blocks forever
        assert_eq!(cmd.block, Some(None));
    }

    #[test]
    fn test_xread_requires_balanced_lists() {
        let err = xread_from(
            b"*5\r\n$5\r\nXREAD\r\n$7\r\nSTREAMS\r\n$2\r\ns1\r\n$2\r\ns2\r\n$3\r\n0-0\r\n",
        )
        .unwrap_err();
        let reply = err.into_reply().unwrap();
        let Frame::SimpleError(msg) = reply else {
            panic!("expected an error reply");
        };
        assert!(msg.starts_with("ERR Unbalanced XREAD"));
    }

    #[test]
    fn test_xread_requires_streams_keyword() {
        let err =
            xread_from(b"*3\r\n$5\r\nXREAD\r\n$1\r\ns\r\n$3\r\n0-0\r\n").unwrap_err();
        assert_eq!(
            err.into_reply().unwrap(),
            Frame::SimpleError("ERR syntax error".to_string())
        );
    }
}
