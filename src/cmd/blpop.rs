//! Implement the `BLPOP` command.
use super::Command;
use crate::{parse::Parse, ConnectionStream, Frame, Result};
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

/// Pop from the head of the list at `key`, blocking until an element is
/// available or the timeout elapses.
///
/// The timeout is in seconds, fractions permitted; `0` waits forever. A
/// successful pop replies with the two-element array `[key, element]`; a
/// timeout replies with the null array.
///
/// Waiters on the same key are served in FIFO order of arrival, one element
/// per waiter, and producers hand elements over directly, so a push with
/// multiple values can satisfy several blocked clients at once.
#[derive(Debug, PartialEq, Eq)]
pub struct BlpopCmd {
    key: String,
    timeout: Option<Duration>,
}

impl BlpopCmd {
    /// Creates a new [`BlpopCmd`] command. `timeout` of `None` waits forever.
    pub fn new(key: impl ToString, timeout: Option<Duration>) -> Self {
        Self {
            key: key.to_string(),
            timeout,
        }
    }
}

impl Command for BlpopCmd {
    fn parse_frames(parse: &mut Parse) -> Result<Self>
    where
        Self: Sized,
    {
        let key = parse.next_string()?;
        let secs = parse.next_timeout_secs()?;
        let timeout = (secs > 0.0).then(|| Duration::from_secs_f64(secs));
        Ok(Self { key, timeout })
    }

    /// Apply the command, suspending until an element arrives.
    ///
    /// While suspended the handler keeps an eye on the connection: a peer
    /// that hangs up cancels the wait (frames pipelined in the meantime stay
    /// buffered), and a server shutdown abandons it without a reply.
    #[tracing::instrument(skip_all)]
    async fn apply<S: ConnectionStream>(
        self,
        db: &crate::Db,
        dst: &mut crate::Connection<S>,
        shutdown: &mut crate::ShutdownSignal,
    ) -> Result<()> {
        tokio::select! {
            res = db.blpop(&self.key, self.timeout) => {
                let response = match res {
                    Ok(Some(element)) => Frame::Array(vec![
                        Frame::BulkString(Bytes::from(self.key)),
                        Frame::BulkString(element),
                    ]),
                    Ok(None) => Frame::NullArray,
                    Err(err) => err.into_reply()?,
                };

                debug!(?response);

                dst.write_frame(&response).await?;
            }
            res = dst.peer_closed() => {
                debug!("peer went away while blocked on a list");
                res?;
            }
            _ = shutdown.wait() => {}
        }

        Ok(())
    }

    fn into_frame(self) -> Result<Frame> {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("blpop"))?;
        frame.push_bulk(Bytes::from(self.key))?;
        let secs = self.timeout.map(|t| t.as_secs_f64()).unwrap_or(0.0);
        frame.push_bulk(Bytes::from(secs.to_string()))?;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CommandVariant;
    use std::io::Cursor;

    fn blpop_from(bytes: &[u8]) -> Result<BlpopCmd> {
        let mut src = Cursor::new(bytes);
        let frame = Frame::parse(&mut src).unwrap();
        match CommandVariant::from_frame(frame)? {
            CommandVariant::Blpop(cmd) => Ok(cmd),
            cmd => panic!("unexpected command {cmd:?}"),
        }
    }

    #[test]
    fn test_parse_blpop() {
        let cmd = blpop_from(b"*3\r\n$5\r\nBLPOP\r\n$1\r\nk\r\n$3\r\n0.5\r\n").unwrap();
        assert_eq!(cmd, BlpopCmd::new("k", Some(Duration::from_millis(500))));

        // zero means wait forever
        let cmd = blpop_from(b"*3\r\n$5\r\nBLPOP\r\n$1\r\nk\r\n$1\r\n0\r\n").unwrap();
        assert_eq!(cmd, BlpopCmd::new("k", None));
    }

    #[test]
    fn test_blpop_rejects_bad_timeouts() {
        let err = blpop_from(b"*3\r\n$5\r\nBLPOP\r\n$1\r\nk\r\n$3\r\nabc\r\n").unwrap_err();
        assert_eq!(
            err.into_reply().unwrap(),
            Frame::SimpleError("ERR timeout is not a float or out of range".to_string())
        );

        let err = blpop_from(b"*3\r\n$5\r\nBLPOP\r\n$1\r\nk\r\n$2\r\n-1\r\n").unwrap_err();
        assert_eq!(
            err.into_reply().unwrap(),
            Frame::SimpleError("ERR timeout is negative".to_string())
        );
    }
}
