use crate::frame::Frame;
use thiserror::Error;

/// Reply sent when a command addresses a key holding another kind of value.
pub(crate) const WRONGTYPE_MSG: &str =
    "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Not enough buffered bytes to decode a full frame.
    #[error("incomplete frame")]
    IncompleteFrame,
    /// Malformed RESP framing. Fatal for the connection.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Recoverable command failure, reported to the client as `-ERR` and
    /// leaving the connection usable.
    #[error("{0}")]
    Command(String),
    /// A command found a key of the wrong kind. Reported as `-WRONGTYPE`.
    #[error("operation against a key holding the wrong kind of value")]
    WrongType,
    /// Attempting to extract a value failed due to the frame being fully consumed.
    #[error("end of stream error")]
    EndOfStream,
    #[error(transparent)]
    Conversion(#[from] std::num::TryFromIntError),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
    /// The server sent a reply the client did not expect.
    #[error("unexpected response: {0}")]
    Response(String),
}

impl Error {
    /// Convert a recoverable error into the reply frame the peer should see.
    ///
    /// Fatal errors are handed back to the caller untouched.
    pub(crate) fn into_reply(self) -> crate::Result<Frame> {
        match self {
            Error::Command(msg) => Ok(Frame::SimpleError(format!("ERR {msg}"))),
            Error::WrongType => Ok(Frame::SimpleError(WRONGTYPE_MSG.to_string())),
            err => Err(err),
        }
    }

    /// `true` for errors that leave the connection usable.
    pub(crate) fn is_recoverable(&self) -> bool {
        matches!(self, Error::Command(_) | Error::WrongType)
    }
}
