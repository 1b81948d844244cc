//! Implement the `RPUSH` and `LPUSH` commands.
//!
//! Both create the list when the key is absent and reply with the resulting
//! length. `RPUSH` appends its arguments in order; `LPUSH` prepends them one
//! by one, so `LPUSH k a b c` leaves the list starting `c, b, a`. A push also
//! hands elements to any `BLPOP` waiters queued on the key.
use super::Command;
use crate::{parse::Parse, ConnectionStream, Error, Frame, Result};
use bytes::Bytes;
use tracing::debug;

/// Append one or more values to the tail of the list at `key`.
#[derive(Debug, PartialEq, Eq)]
pub struct RpushCmd {
    key: String,
    values: Vec<Bytes>,
}

/// Prepend one or more values to the head of the list at `key`.
#[derive(Debug, PartialEq, Eq)]
pub struct LpushCmd {
    key: String,
    values: Vec<Bytes>,
}

impl RpushCmd {
    /// Creates a new [`RpushCmd`] command.
    pub fn new(key: impl ToString, values: Vec<Bytes>) -> Self {
        Self {
            key: key.to_string(),
            values,
        }
    }
}

impl LpushCmd {
    /// Creates a new [`LpushCmd`] command.
    pub fn new(key: impl ToString, values: Vec<Bytes>) -> Self {
        Self {
            key: key.to_string(),
            values,
        }
    }
}

/// Shared argument shape: a key followed by one or more values.
fn parse_key_and_values(parse: &mut Parse) -> Result<(String, Vec<Bytes>)> {
    let key = parse.next_string()?;
    let mut values = Vec::new();
    loop {
        match parse.next_bytes() {
            Ok(value) => values.push(value),
            Err(Error::EndOfStream) => break,
            Err(err) => return Err(err),
        }
    }
    if values.is_empty() {
        // at least one value is required
        return Err(Error::EndOfStream);
    }
    Ok((key, values))
}

impl Command for RpushCmd {
    fn parse_frames(parse: &mut Parse) -> Result<Self>
    where
        Self: Sized,
    {
        let (key, values) = parse_key_and_values(parse)?;
        Ok(Self { key, values })
    }

    #[tracing::instrument(skip_all)]
    async fn apply<S: ConnectionStream>(
        self,
        db: &crate::Db,
        dst: &mut crate::Connection<S>,
        _shutdown: &mut crate::ShutdownSignal,
    ) -> Result<()> {
        let response = match db.rpush(&self.key, self.values) {
            Ok(len) => Frame::Integer(len as i64),
            Err(err) => err.into_reply()?,
        };

        debug!(?response);

        dst.write_frame(&response).await?;

        Ok(())
    }

    fn into_frame(self) -> Result<Frame> {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("rpush"))?;
        frame.push_bulk(Bytes::from(self.key))?;
        for value in self.values {
            frame.push_bulk(value)?;
        }
        Ok(frame)
    }
}

impl Command for LpushCmd {
    fn parse_frames(parse: &mut Parse) -> Result<Self>
    where
        Self: Sized,
    {
        let (key, values) = parse_key_and_values(parse)?;
        Ok(Self { key, values })
    }

    #[tracing::instrument(skip_all)]
    async fn apply<S: ConnectionStream>(
        self,
        db: &crate::Db,
        dst: &mut crate::Connection<S>,
        _shutdown: &mut crate::ShutdownSignal,
    ) -> Result<()> {
        let response = match db.lpush(&self.key, self.values) {
            Ok(len) => Frame::Integer(len as i64),
            Err(err) => err.into_reply()?,
        };

        debug!(?response);

        dst.write_frame(&response).await?;

        Ok(())
    }

    fn into_frame(self) -> Result<Frame> {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("lpush"))?;
        frame.push_bulk(Bytes::from(self.key))?;
        for value in self.values {
            frame.push_bulk(value)?;
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CommandVariant;
    use std::io::Cursor;

    #[test]
    fn test_parse_rpush() {
        let src = b"*4\r\n$5\r\nRPUSH\r\n$1\r\nk\r\n$1\r\na\r\n$1\r\nb\r\n";
        let mut src = Cursor::new(&src[..]);
        let frame = Frame::parse(&mut src).unwrap();
        let CommandVariant::Rpush(cmd) = CommandVariant::from_frame(frame).unwrap() else {
            panic!("unexpected command");
        };
        assert_eq!(
            cmd,
            RpushCmd::new("k", vec![Bytes::from("a"), Bytes::from("b")])
        );
    }

    #[test]
    fn test_push_requires_a_value() {
        let src = b"*2\r\n$5\r\nLPUSH\r\n$1\r\nk\r\n";
        let mut src = Cursor::new(&src[..]);
        let frame = Frame::parse(&mut src).unwrap();
        let err = CommandVariant::from_frame(frame).unwrap_err();
        assert_eq!(
            err.into_reply().unwrap(),
            Frame::SimpleError("ERR wrong number of arguments for 'lpush' command".to_string())
        );
    }
}
