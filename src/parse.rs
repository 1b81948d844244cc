use crate::{Error, Frame, Result};
use bytes::Bytes;

/// Utility for extracting the pieces of a command frame.
///
/// A request arrives as an array frame; the verb has been consumed by the
/// dispatcher and each command pulls its arguments off this cursor in order.
#[derive(Debug)]
pub(crate) struct Parse {
    parts: std::vec::IntoIter<Frame>,
}

impl Parse {
    pub(crate) fn new(frame: Frame) -> Result<Parse> {
        let array = match frame {
            Frame::Array(array) => array,
            frame => {
                return Err(Error::Protocol(format!(
                    "expected array frame, got {frame:?}"
                )))
            }
        };

        Ok(Parse {
            parts: array.into_iter(),
        })
    }

    fn next(&mut self) -> Result<Frame> {
        self.parts.next().ok_or(Error::EndOfStream)
    }

    pub(crate) fn next_string(&mut self) -> Result<String> {
        match self.next()? {
            Frame::SimpleString(s) => Ok(s),
            Frame::BulkString(data) => std::str::from_utf8(&data[..])
                .map(|s| s.to_string())
                .map_err(|e| Error::Protocol(e.to_string())),
            frame => Err(Error::Protocol(format!(
                "expected simple frame or bulk frame, got {frame:?}"
            ))),
        }
    }

    pub(crate) fn next_bytes(&mut self) -> Result<Bytes> {
        match self.next()? {
            Frame::SimpleString(s) => Ok(Bytes::from(s.into_bytes())),
            Frame::BulkString(data) => Ok(data),
            frame => Err(Error::Protocol(format!(
                "expected simple frame or bulk frame, got {frame:?}"
            ))),
        }
    }

    /// Extract the next entry as a signed decimal integer.
    pub(crate) fn next_int(&mut self) -> Result<i64> {
        use atoi::atoi;

        fn not_an_int() -> Error {
            Error::Command("value is not an integer or out of range".to_string())
        }

        match self.next()? {
            Frame::Integer(v) => Ok(v),
            Frame::SimpleString(data) => atoi::<i64>(data.as_bytes()).ok_or_else(not_an_int),
            Frame::BulkString(data) => atoi::<i64>(&data).ok_or_else(not_an_int),
            frame => Err(Error::Protocol(format!(
                "expected int frame, got {frame:?}"
            ))),
        }
    }

    /// Extract the next entry as a blocking timeout in seconds.
    ///
    /// Fractions are permitted; zero means wait forever.
    pub(crate) fn next_timeout_secs(&mut self) -> Result<f64> {
        let raw = self.next_string()?;
        let secs: f64 = raw
            .parse()
            .map_err(|_| Error::Command("timeout is not a float or out of range".to_string()))?;
        if !secs.is_finite() {
            return Err(Error::Command(
                "timeout is not a float or out of range".to_string(),
            ));
        }
        if secs < 0.0 {
            return Err(Error::Command("timeout is negative".to_string()));
        }
        Ok(secs)
    }

    pub(crate) fn finish(&mut self) -> Result<()> {
        if self.parts.next().is_none() {
            Ok(())
        } else {
            Err(Error::Protocol("expected end of frame".to_string()))
        }
    }
}
