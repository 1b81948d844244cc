use crate::{Error, Result};
use bytes::{Buf, Bytes};
use std::io::Cursor;

/// Largest bulk string payload the decoder will accept.
pub(crate) const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// A frame in Redis Serialization Protocol (RESP).
///
/// See: <https://redis.io/docs/latest/develop/reference/protocol-spec/>
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    SimpleString(String),
    SimpleError(String),
    Integer(i64),
    BulkString(Bytes),
    Array(Vec<Frame>),
    NullBulkString,
    NullArray,
}

impl Frame {
    /// Validate that one complete frame starts at the cursor, advancing the
    /// cursor past it.
    ///
    /// Returns `Error::IncompleteFrame` if the buffer is short; the caller
    /// reads more bytes and retries. Anything else is a protocol error.
    pub fn check(src: &mut Cursor<&[u8]>) -> Result<()> {
        match get_u8(src)? {
            b'+' | b'-' => {
                get_line(src)?;
                Ok(())
            }
            b':' => {
                let _ = get_decimal(src)?;
                Ok(())
            }
            b'$' => match get_decimal(src)? {
                -1 => Ok(()),
                len => {
                    let len = bulk_len(len)?;
                    // payload plus trailing '\r\n'
                    skip(src, len + 2)
                }
            },
            b'*' => match get_decimal(src)? {
                -1 => Ok(()),
                len if len < 0 => Err(Error::Protocol(format!("invalid array length `{len}`"))),
                len => {
                    for _ in 0..len {
                        Frame::check(src)?;
                    }
                    Ok(())
                }
            },
            actual => Err(Error::Protocol(format!("invalid frame byte `{actual}`"))),
        }
    }

    /// Decode one frame that has already been `check`ed.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Frame> {
        // The first byte of the frame indicates the data type.
        match get_u8(src)? {
            b'+' => {
                let line = get_line(src)?.to_vec();
                let string = String::from_utf8(line)?;
                Ok(Frame::SimpleString(string))
            }
            b'-' => {
                let line = get_line(src)?.to_vec();
                let string = String::from_utf8(line)?;
                Ok(Frame::SimpleError(string))
            }
            b':' => Ok(Frame::Integer(get_decimal(src)?)),
            b'$' => match get_decimal(src)? {
                -1 => Ok(Frame::NullBulkString),
                len => {
                    let len = bulk_len(len)?;
                    let n = len + 2;
                    if src.remaining() < n {
                        return Err(Error::IncompleteFrame);
                    }
                    let data = Bytes::copy_from_slice(&src.chunk()[..len]);
                    if &src.chunk()[len..n] != b"\r\n" {
                        return Err(Error::Protocol(
                            "bulk string not terminated by CRLF".to_string(),
                        ));
                    }
                    skip(src, n)?;
                    Ok(Frame::BulkString(data))
                }
            },
            b'*' => match get_decimal(src)? {
                -1 => Ok(Frame::NullArray),
                len if len < 0 => Err(Error::Protocol(format!("invalid array length `{len}`"))),
                len => {
                    let len: usize = len.try_into()?;
                    let mut out = Vec::with_capacity(len);
                    for _ in 0..len {
                        out.push(Frame::parse(src)?);
                    }
                    Ok(Frame::Array(out))
                }
            },
            first_byte => Err(Error::Protocol(format!(
                "first byte was not a valid RESP data type `{first_byte}`"
            ))),
        }
    }

    pub(crate) fn array() -> Self {
        Frame::Array(vec![])
    }

    pub(crate) fn push_bulk(&mut self, bytes: Bytes) -> Result<()> {
        match self {
            Frame::Array(vec) => {
                vec.push(Frame::BulkString(bytes));
                Ok(())
            }
            ty => Err(Error::Protocol(format!(
                "cannot push to non-array frame type, type was {:?}",
                ty
            ))),
        }
    }

    pub(crate) fn push_int(&mut self, value: i64) -> Result<()> {
        match self {
            Frame::Array(vec) => {
                vec.push(Frame::Integer(value));
                Ok(())
            }
            ty => Err(Error::Protocol(format!(
                "cannot push to non-array frame type, type was {:?}",
                ty
            ))),
        }
    }
}

/// Validate a decoded `$` length: non-negative (the -1 null is handled by the
/// caller) and within the per-frame cap.
fn bulk_len(len: i64) -> Result<usize> {
    let len: usize = len
        .try_into()
        .map_err(|_| Error::Protocol(format!("invalid bulk string length `{len}`")))?;
    if len > MAX_BULK_LEN {
        return Err(Error::Protocol(format!(
            "bulk string length `{len}` exceeds the {MAX_BULK_LEN} byte cap"
        )));
    }
    Ok(len)
}

fn get_u8(src: &mut Cursor<&[u8]>) -> Result<u8> {
    if !src.has_remaining() {
        return Err(Error::IncompleteFrame);
    }
    Ok(src.get_u8())
}

fn skip(src: &mut Cursor<&[u8]>, n: usize) -> Result<()> {
    if src.remaining() < n {
        return Err(Error::IncompleteFrame);
    }
    src.advance(n);
    Ok(())
}

fn get_decimal(src: &mut Cursor<&[u8]>) -> Result<i64> {
    use atoi::atoi;

    let line = get_line(src)?;

    atoi(line).ok_or_else(|| Error::Protocol("invalid frame format".into()))
}

fn get_line<'a>(src: &'a mut Cursor<&[u8]>) -> Result<&'a [u8]> {
    let start = src.position() as usize;
    let end = src.get_ref().len().saturating_sub(1);

    for i in start..end {
        if src.get_ref()[i] == b'\r' && src.get_ref()[i + 1] == b'\n' {
            src.set_position((i + 2) as u64);
            return Ok(&src.get_ref()[start..i]);
        }
    }
    Err(Error::IncompleteFrame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_data_types() {
        let frames: &[&[u8]] = &[
            b"+OK\r\n",
            b"-ERR unknown command 'foobar'\r\n",
            b":1000\r\n",
            b"$6\r\nfoobar\r\n",
            b"$0\r\n\r\n",
            b"$-1\r\n",
            b"*2\r\n+OK\r\n$6\r\nfoobar\r\n",
            b"*1\r\n+OK\r\n",
            b"*-1\r\n",
            b"*0\r\n",
        ];
        for frame in frames {
            match_frame(frame);
        }
    }

    /// This function is used to ensure that parse contains every variant of [`Frame`].
    fn match_frame(src: &[u8]) {
        let mut buf = Cursor::new(src);
        let frame = Frame::parse(&mut buf).unwrap();
        // A match statement without a catch-all arm will fail to compile if a variant is missing.
        match frame {
            Frame::SimpleString(_) => (),
            Frame::SimpleError(_) => (),
            Frame::Integer(_) => (),
            Frame::BulkString(_) => (),
            Frame::Array(_) => (),
            Frame::NullBulkString => (),
            Frame::NullArray => (),
        }
    }

    #[test]
    fn test_simple_string() {
        let mut buf = Cursor::new(b"+OK\r\n".as_slice());
        let frame = Frame::parse(&mut buf).unwrap();
        assert_eq!(frame, Frame::SimpleString("OK".to_string()));
    }

    #[test]
    fn test_simple_error() {
        let mut buf = Cursor::new(b"-ERR unknown command 'foobar'\r\n".as_slice());
        let frame = Frame::parse(&mut buf).unwrap();
        assert_eq!(
            frame,
            Frame::SimpleError("ERR unknown command 'foobar'".to_string())
        );
    }

    #[test]
    fn test_integer() {
        let mut buf = Cursor::new(b":1000\r\n".as_slice());
        let frame = Frame::parse(&mut buf).unwrap();
        assert_eq!(frame, Frame::Integer(1000));

        let mut buf = Cursor::new(b":-1\r\n".as_slice());
        let frame = Frame::parse(&mut buf).unwrap();
        assert_eq!(frame, Frame::Integer(-1));

        let mut buf = Cursor::new(b":+9223372036854775807\r\n".as_slice());
        let frame = Frame::parse(&mut buf).unwrap();
        assert_eq!(frame, Frame::Integer(i64::MAX));
    }

    #[test]
    fn test_bulk_string() {
        let mut buf = Cursor::new(b"$6\r\nfoobar\r\n".as_slice());
        let frame = Frame::parse(&mut buf).unwrap();
        assert_eq!(frame, Frame::BulkString(Bytes::from("foobar")));

        let mut buf = Cursor::new(b"$0\r\n\r\n".as_slice());
        let frame = Frame::parse(&mut buf).unwrap();
        assert_eq!(frame, Frame::BulkString(Bytes::from("")));
    }

    #[test]
    fn test_bulk_string_is_binary_safe() {
        let mut buf = Cursor::new(b"$8\r\nfoo\r\nbar\r\n".as_slice());
        let frame = Frame::parse(&mut buf).unwrap();
        assert_eq!(frame, Frame::BulkString(Bytes::from_static(b"foo\r\nbar")));
    }

    #[test]
    fn test_null_bulk_string() {
        let mut buf = Cursor::new(b"$-1\r\n".as_slice());
        let frame = Frame::parse(&mut buf).unwrap();
        assert_eq!(frame, Frame::NullBulkString);
    }

    #[test]
    fn test_array() {
        let mut buf = Cursor::new(b"*2\r\n+OK\r\n$6\r\nfoobar\r\n".as_slice());
        let frame = Frame::parse(&mut buf).unwrap();
        assert_eq!(
            frame,
            Frame::Array(vec![
                Frame::SimpleString("OK".to_string()),
                Frame::BulkString(Bytes::from("foobar")),
            ])
        );

        // a short array is incomplete, not malformed
        let mut buf = Cursor::new(b"*3\r\n+OK\r\n".as_slice());
        assert!(matches!(
            Frame::parse(&mut buf),
            Err(Error::IncompleteFrame)
        ));
    }

    #[test]
    fn test_null_array() {
        let mut buf = Cursor::new(b"*-1\r\n".as_slice());
        let frame = Frame::parse(&mut buf).unwrap();
        assert_eq!(frame, Frame::NullArray);
    }

    #[test]
    fn test_empty_array() {
        let mut buf = Cursor::new(b"*0\r\n".as_slice());
        let frame = Frame::parse(&mut buf).unwrap();
        assert_eq!(frame, Frame::array());
    }

    #[test]
    fn test_recursive_array() {
        let mut buf = Cursor::new(b"*2\r\n*2\r\n+OK\r\n$6\r\nfoobar\r\n$3\r\nbaz\r\n".as_slice());
        let frame = Frame::parse(&mut buf).unwrap();
        assert_eq!(
            frame,
            Frame::Array(vec![
                Frame::Array(vec![
                    Frame::SimpleString("OK".to_string()),
                    Frame::BulkString(Bytes::from("foobar")),
                ]),
                Frame::BulkString(Bytes::from("baz")),
            ])
        );
    }

    #[test]
    fn test_invalid_frame() {
        let mut buf = Cursor::new(b"invalid frame\r\n".as_slice());
        assert!(matches!(Frame::parse(&mut buf), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_non_digit_length() {
        let mut buf = Cursor::new(b"$abc\r\nxyz\r\n".as_slice());
        assert!(matches!(Frame::parse(&mut buf), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_negative_length_other_than_null() {
        let mut buf = Cursor::new(b"$-2\r\n".as_slice());
        assert!(matches!(Frame::parse(&mut buf), Err(Error::Protocol(_))));

        let mut buf = Cursor::new(b"*-2\r\n".as_slice());
        assert!(matches!(Frame::parse(&mut buf), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_wrong_bulk_terminator() {
        let mut buf = Cursor::new(b"$3\r\nfooXY".as_slice());
        assert!(matches!(Frame::parse(&mut buf), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_incomplete_frame() {
        let mut buf = Cursor::new(b"$6\r\nfoo".as_slice());
        assert!(matches!(
            Frame::parse(&mut buf),
            Err(Error::IncompleteFrame)
        ));

        let mut buf = Cursor::new(b"+OK".as_slice());
        assert!(matches!(
            Frame::check(&mut buf),
            Err(Error::IncompleteFrame)
        ));
    }
}
