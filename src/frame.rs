//! Provides a type representing a Redis protocol frame.
//!
//! Only the RESP2 types needed by the stream commands are supported. The
//! protocol can be found at <https://redis.io/topics/protocol>

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::convert::TryInto;
use std::fmt;
use std::io::Cursor;
use std::num::TryFromIntError;
use std::string::FromUtf8Error;

/// A frame in the Redis protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(u64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
}

#[derive(Debug)]
pub enum Error {
    /// Not enough data is available to decode a whole frame.
    Incomplete,
    /// Invalid message encoding.
    Other(crate::Error),
}

const ERROR_INVALID_FRAME: &str = "protocol error: invalid frame format";

impl Frame {
    /// Returns an empty array frame.
    pub(crate) fn array() -> Frame {
        Frame::Array(vec![])
    }

    /// Pushes a "bulk" frame into the array.
    ///
    /// # Panics
    ///
    /// Panics if `self` is not an array.
    pub(crate) fn push_bulk(&mut self, bytes: Bytes) {
        self.push(Frame::Bulk(bytes));
    }

    /// Pushes any frame into the array, arrays included.
    ///
    /// # Panics
    ///
    /// Panics if `self` is not an array.
    pub(crate) fn push(&mut self, frame: Frame) {
        match self {
            Frame::Array(vec) => vec.push(frame),
            _ => panic!("not an array frame"),
        }
    }

    /// Checks if an entire message can be decoded from `src`.
    pub fn check(src: &mut Cursor<&[u8]>) -> Result<(), Error> {
        match eat_u8(src)? {
            // "+OK\r\n"
            b'+' => {
                eat_line(src)?;
                Ok(())
            }
            // "-Error message\r\n"
            b'-' => {
                eat_line(src)?;
                Ok(())
            }
            // ":1000\r\n"
            b':' => {
                eat_decimal(src)?;
                Ok(())
            }
            // "$-1\r\n" (Null)
            // "$6\r\nfoobar\r\n"
            b'$' => {
                if b'-' == peek_u8(src)? {
                    // skip '-1\r\n'
                    skip(src, 4)
                } else {
                    let len: usize = eat_decimal(src)?.try_into()?;
                    let n = bulk_len(len)?;

                    // skip the number of bytes + 2 (\r\n)
                    skip(src, n)
                }
            }
            // "*-1\r\n" (Null)
            // "*2\r\n$2\r\nid\r\n*0\r\n"
            b'*' => {
                if b'-' == peek_u8(src)? {
                    return skip(src, 4);
                }

                let len = eat_decimal(src)?;

                for _ in 0..len {
                    Frame::check(src)?;
                }

                Ok(())
            }
            other => Err(format!("protocol error: invalid frame type `{}`", other).into()),
        }
    }

    /// Parses the message into a `Frame`.
    ///
    /// The message should be validated with `check()` before calling this function.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Frame, Error> {
        match eat_u8(src)? {
            b'+' => {
                let line = eat_line(src)?.to_vec();
                let string = String::from_utf8(line)?;

                Ok(Frame::Simple(string))
            }
            b'-' => {
                let line = eat_line(src)?.to_vec();
                let string = String::from_utf8(line)?;

                Ok(Frame::Error(string))
            }
            b':' => {
                let int = eat_decimal(src)?;
                Ok(Frame::Integer(int))
            }
            b'$' => {
                if b'-' == peek_u8(src)? {
                    eat_null(src)
                } else {
                    let len: usize = eat_decimal(src)?.try_into()?;
                    let n = bulk_len(len)?;

                    if src.remaining() < n {
                        return Err(Error::Incomplete);
                    }

                    let data = Bytes::copy_from_slice(&src.chunk()[..len]);

                    skip(src, n)?;

                    Ok(Frame::Bulk(data))
                }
            }
            b'*' => {
                if b'-' == peek_u8(src)? {
                    return eat_null(src);
                }

                let len: usize = eat_decimal(src)?.try_into()?;
                let mut out = Vec::with_capacity(len);

                for _ in 0..len {
                    out.push(Frame::parse(src)?);
                }

                Ok(Frame::Array(out))
            }
            other => Err(format!("protocol error: invalid frame type `{}`", other).into()),
        }
    }

    /// Encodes the frame into `dst`. Nested arrays are supported.
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(val) => {
                dst.put_u8(b'+');
                dst.put_slice(val.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Frame::Error(val) => {
                dst.put_u8(b'-');
                dst.put_slice(val.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Frame::Integer(val) => {
                dst.put_u8(b':');
                put_decimal(dst, *val);
            }
            Frame::Bulk(val) => {
                dst.put_u8(b'$');
                put_decimal(dst, val.len() as u64);
                dst.put_slice(val);
                dst.put_slice(b"\r\n");
            }
            Frame::Null => dst.put_slice(b"$-1\r\n"),
            Frame::Array(val) => {
                dst.put_u8(b'*');
                put_decimal(dst, val.len() as u64);

                for entry in val {
                    entry.encode(dst);
                }
            }
        }
    }

    pub(crate) fn to_error(&self) -> crate::Error {
        format!("unexpected frame: {}", self).into()
    }
}

impl PartialEq<&str> for Frame {
    fn eq(&self, other: &&str) -> bool {
        match self {
            Frame::Simple(s) => s.eq(other),
            Frame::Bulk(s) => s.eq(other),
            _ => false,
        }
    }
}

fn put_decimal(dst: &mut BytesMut, val: u64) {
    dst.put_slice(val.to_string().as_bytes());
    dst.put_slice(b"\r\n");
}

fn peek_u8(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }

    Ok(src.chunk()[0])
}

fn eat_u8(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }

    Ok(src.get_u8())
}

fn eat_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let end = src.get_ref().len().saturating_sub(1);

    for i in start..end {
        if src.get_ref()[i] == b'\r' && src.get_ref()[i + 1] == b'\n' {
            // found a line, update the position to be **after** the \n
            src.set_position((i + 2) as u64);

            return Ok(&src.get_ref()[start..i]);
        }
    }

    Err(Error::Incomplete)
}

/// Length of a bulk payload plus its trailing `\r\n`.
fn bulk_len(len: usize) -> Result<usize, Error> {
    len.checked_add(2).ok_or_else(|| ERROR_INVALID_FRAME.into())
}

fn eat_null(src: &mut Cursor<&[u8]>) -> Result<Frame, Error> {
    let line = eat_line(src)?;

    if line != b"-1" {
        return Err(ERROR_INVALID_FRAME.into());
    }

    Ok(Frame::Null)
}

fn skip(src: &mut Cursor<&[u8]>, n: usize) -> Result<(), Error> {
    if src.remaining() < n {
        return Err(Error::Incomplete);
    }

    src.advance(n);
    Ok(())
}

fn eat_decimal(src: &mut Cursor<&[u8]>) -> Result<u64, Error> {
    use atoi::atoi;

    let line = eat_line(src)?;

    atoi::<u64>(line).ok_or_else(|| ERROR_INVALID_FRAME.into())
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Incomplete => "stream ended early".fmt(fmt),
            Error::Other(err) => err.fmt(fmt),
        }
    }
}

impl From<String> for Error {
    fn from(src: String) -> Error {
        Error::Other(src.into())
    }
}

impl From<&str> for Error {
    fn from(src: &str) -> Error {
        src.to_string().into()
    }
}

impl From<FromUtf8Error> for Error {
    fn from(_src: FromUtf8Error) -> Error {
        ERROR_INVALID_FRAME.into()
    }
}

impl From<TryFromIntError> for Error {
    fn from(_src: TryFromIntError) -> Error {
        ERROR_INVALID_FRAME.into()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use std::str;

        match self {
            Frame::Simple(response) => response.fmt(fmt),
            Frame::Error(msg) => write!(fmt, "error: {}", msg),
            Frame::Integer(num) => num.fmt(fmt),
            Frame::Bulk(msg) => match str::from_utf8(msg) {
                Ok(string) => string.fmt(fmt),
                Err(_) => write!(fmt, "{:?}", msg),
            },
            Frame::Null => "(nil)".fmt(fmt),
            Frame::Array(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(fmt, " ")?;
                    }
                    part.fmt(fmt)?;
                }

                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(src: &[u8]) -> Result<Frame, Error> {
        let mut buf = Cursor::new(src);
        Frame::check(&mut buf)?;
        buf.set_position(0);
        Frame::parse(&mut buf)
    }

    #[test]
    fn decode_xadd_request() {
        let frame = decode(b"*5\r\n$4\r\nXADD\r\n$1\r\ns\r\n$1\r\n*\r\n$4\r\nuser\r\n$4\r\njuan\r\n")
            .unwrap();

        match frame {
            Frame::Array(parts) => {
                assert_eq!(parts.len(), 5);
                assert!(parts[0] == "XADD");
                assert!(parts[4] == "juan");
            }
            frame => panic!("unexpected frame {:?}", frame),
        }
    }

    #[test]
    fn decode_nested_arrays_and_nulls() {
        let frame = decode(b"*2\r\n$3\r\n1-0\r\n*2\r\n$1\r\na\r\n$1\r\nb\r\n").unwrap();
        assert_eq!(frame.to_string(), "1-0 a b");

        assert_eq!(decode(b"$-1\r\n").unwrap(), Frame::Null);
        assert_eq!(decode(b"*-1\r\n").unwrap(), Frame::Null);
        assert_eq!(decode(b":3\r\n").unwrap(), Frame::Integer(3));
    }

    #[test]
    fn partial_frames_are_incomplete() {
        assert!(matches!(decode(b"*2\r\n$3\r\n1-0\r\n"), Err(Error::Incomplete)));
        assert!(matches!(decode(b"$5\r\nab"), Err(Error::Incomplete)));
        assert!(matches!(decode(b""), Err(Error::Incomplete)));
    }

    #[test]
    fn invalid_type_byte_is_an_error() {
        assert!(matches!(decode(b"?oops\r\n"), Err(Error::Other(_))));
    }

    #[test]
    fn oversized_bulk_length_is_an_error() {
        assert!(matches!(
            decode(b"*1\r\n$18446744073709551615\r\nab\r\n"),
            Err(Error::Other(_))
        ));

        let mut buf = Cursor::new(&b"$18446744073709551615\r\nab\r\n"[..]);
        assert!(matches!(Frame::parse(&mut buf), Err(Error::Other(_))));
    }

    #[test]
    fn encode_then_decode_nested_reply() {
        let mut entry = Frame::array();
        entry.push_bulk(Bytes::from_static(b"5-1"));
        let mut fields = Frame::array();
        fields.push_bulk(Bytes::from_static(b"user"));
        fields.push_bulk(Bytes::from_static(b"maria"));
        entry.push(fields);

        let mut reply = Frame::array();
        reply.push(entry);

        let mut buf = BytesMut::new();
        reply.encode(&mut buf);

        assert_eq!(
            &buf[..],
            &b"*1\r\n*2\r\n$3\r\n5-1\r\n*2\r\n$4\r\nuser\r\n$5\r\nmaria\r\n"[..]
        );
        assert_eq!(decode(&buf).unwrap(), reply);
    }
}
