//! Implement the `SET` command.
use super::Command;
use crate::{ConnectionStream, Error, Frame, Result};
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

/// Set `key` to hold the string `value`.
///
/// If `key` already holds a value, it is overwritten, regardless of its type.
/// Any previous time to live associated with the key is discarded on successful
/// SET operation.
///
/// # Options
///
/// Currently, the following options are supported:
///
/// * EX `seconds` -- Set the specified expire time, in seconds.
/// * PX `milliseconds` -- Set the specified expire time, in milliseconds.
///
/// A non-positive expire time is accepted and denotes a deadline that has
/// already passed: the next read observes the key as absent.
#[derive(Debug, PartialEq, Eq)]
pub struct SetCmd {
    /// The lookup key.
    key: String,
    /// The value to be stored.
    value: Bytes,
    /// When to expire the key.
    expire: Option<Duration>,
}

impl SetCmd {
    /// Create a new `Set` command which sets `key` to `value`.
    ///
    /// If `expire` is `Some`, the value should expire after the specified
    /// duration.
    pub fn new(key: impl ToString, value: Bytes, expire: Option<Duration>) -> Self {
        Self {
            key: key.to_string(),
            value,
            expire,
        }
    }

    /// Get the key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the value.
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Get the expire duration.
    pub fn expire(&self) -> Option<Duration> {
        self.expire
    }
}

impl Command for SetCmd {
    /// Parse a `SetCmd` instance from a received frame.
    ///
    /// The `SET` string has already been consumed.
    ///
    /// # Format
    ///
    /// Expects an array frame containing at least 3 entries.
    ///
    /// ```text
    /// SET key value [EX seconds|PX milliseconds]
    /// ```
    fn parse_frames(parse: &mut crate::parse::Parse) -> Result<Self>
    where
        Self: Sized,
    {
        let key = parse.next_string()?;
        let value = parse.next_bytes()?;
        // The expiration is optional. If nothing else follows,
        // then it is `None`.
        let mut expire = None;

        // Attempt to parse another string.
        match parse.next_string() {
            Ok(s) if s.eq_ignore_ascii_case("EX") => {
                // The expiration is specified in seconds.
                let secs = parse.next_int()?;
                expire = Some(expiry_duration(secs, 1_000));
            }
            Ok(s) if s.eq_ignore_ascii_case("PX") => {
                // The expiration is specified in milliseconds.
                let ms = parse.next_int()?;
                expire = Some(expiry_duration(ms, 1));
            }
            // Any other option is rejected; the connection stays usable.
            Ok(_) => return Err(Error::Command("syntax error".to_string())),
            // The `Error::EndOfStream` error indicates there is no further data to
            // parse. In this case, it is a normal run time situation and
            // indicates there are no specified `SET` options.
            Err(Error::EndOfStream) => {}
            // All other errors are bubbled up.
            Err(err) => return Err(err),
        }

        Ok(Self { key, value, expire })
    }

    /// Apply the `SetCmd` command to the specified `Db` instance.
    ///
    /// The response is written to `dst`. This is called by the server in order
    /// to execute a received command.
    #[tracing::instrument(skip_all)]
    async fn apply<S: ConnectionStream>(
        self,
        db: &crate::Db,
        dst: &mut crate::Connection<S>,
        _shutdown: &mut crate::ShutdownSignal,
    ) -> Result<()> {
        db.set(self.key, self.value, self.expire);
        let response = Frame::SimpleString("OK".to_string());
        debug!(?response);
        dst.write_frame(&response).await?;
        Ok(())
    }

    /// Converts the command into an equivalent `Frame`.
    ///
    /// This is called by the client when encoding a `Set` command to send to
    /// the server.
    fn into_frame(self) -> Result<Frame> {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("set"))?;
        frame.push_bulk(Bytes::from(self.key))?;
        frame.push_bulk(self.value)?;
        if let Some(ms) = self.expire {
            // Expirations can be specified in two ways:
            // `SET key value EX` seconds
            // `SET key value PX` milliseconds
            // Prefer the seconds form when it is exact.
            if ms.subsec_millis() == 0 {
                frame.push_bulk(Bytes::from("ex"))?;
                frame.push_int(ms.as_secs() as i64)?;
            } else {
                frame.push_bulk(Bytes::from("px"))?;
                frame.push_int(ms.as_millis() as i64)?;
            }
        }
        Ok(frame)
    }
}

/// Expiration argument to a duration; a non-positive argument becomes an
/// already-elapsed deadline.
fn expiry_duration(n: i64, unit_ms: u64) -> Duration {
    if n <= 0 {
        Duration::ZERO
    } else {
        Duration::from_millis((n as u64).saturating_mul(unit_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CommandVariant;
    use std::io::Cursor;

    fn set_from(bytes: &[u8]) -> Result<SetCmd> {
        let mut src = Cursor::new(bytes);
        let frame = Frame::parse(&mut src).expect("well-formed frame");
        match CommandVariant::from_frame(frame)? {
            CommandVariant::Set(cmd) => Ok(cmd),
            cmd => panic!("unexpected command {cmd:?}"),
        }
    }

    #[test]
    fn test_plain_set() {
        let cmd = set_from(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n").unwrap();
        assert_eq!(cmd.key(), "foo");
        assert_eq!(cmd.value(), &Bytes::from("bar"));
        assert_eq!(cmd.expire(), None);
    }

    #[test]
    fn test_set_with_px() {
        let cmd =
            set_from(b"*5\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n$2\r\nPX\r\n$3\r\n100\r\n")
                .unwrap();
        assert_eq!(cmd.expire(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_set_with_lowercase_ex() {
        let cmd =
            set_from(b"*5\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n$2\r\nex\r\n$2\r\n50\r\n")
                .unwrap();
        assert_eq!(cmd.expire(), Some(Duration::from_secs(50)));
    }

    #[test]
    fn test_set_with_negative_expiration() {
        let cmd =
            set_from(b"*5\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n$2\r\nEX\r\n$2\r\n-5\r\n")
                .unwrap();
        assert_eq!(cmd.expire(), Some(Duration::ZERO));
    }

    #[test]
    fn test_set_with_unknown_option() {
        let err =
            set_from(b"*5\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n$2\r\nXX\r\n$2\r\n10\r\n")
                .unwrap_err();
        assert_eq!(
            err.into_reply().unwrap(),
            Frame::SimpleError("ERR syntax error".to_string())
        );
    }

    #[test]
    fn test_set_with_non_integer_expiration() {
        let err =
            set_from(b"*5\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n$2\r\nPX\r\n$3\r\nabc\r\n")
                .unwrap_err();
        assert_eq!(
            err.into_reply().unwrap(),
            Frame::SimpleError("ERR value is not an integer or out of range".to_string())
        );
    }
}
