use crate::frame::{self, Frame};

use bytes::{Buf, BytesMut};
use std::io::{self, Cursor};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

/// Send and receive `Frame`s from a remote peer.
#[derive(Debug)]
pub struct Connection {
    /// The `TcpStream`. It uses `BufWriter` for write level buffering.
    stream: BufWriter<TcpStream>,
    /// The internal buffer for reading frames.
    buffer: BytesMut,
    /// Scratch buffer a frame is encoded into before being written.
    out: BytesMut,
}

impl Connection {
    /// Create a new `Connection`.
    pub fn new(socket: TcpStream) -> Connection {
        Connection {
            stream: BufWriter::new(socket),
            buffer: BytesMut::with_capacity(4 * 1024),
            out: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Tries to parse a frame from the buffer.
    ///
    /// If the buffer contains enough data, the frame is returned and the data removed from the
    /// buffer. If not enough data has been buffered yet, `Ok(None)` is returned. If the buffered
    /// data does not represent a valid frame, `Err` is returned.
    fn parse_frame(&mut self) -> crate::Result<Option<Frame>> {
        use frame::Error::Incomplete;

        let mut buf = Cursor::new(&self.buffer[..]);

        // Check if enough data has been buffered to parse a single frame.
        match Frame::check(&mut buf) {
            Ok(_) => {
                // remember the length of the frame.
                let len = buf.position() as usize;

                // reset the position to zero.
                buf.set_position(0);

                // parse the frame from the buffer.
                let frame = Frame::parse(&mut buf)?;

                // remove the parsed data from the buffer.
                self.buffer.advance(len);

                Ok(Some(frame))
            }
            // There is not enough data present in the read buffer to parse a single frame.
            Err(Incomplete) => Ok(None),
            // An error was encountered while parsing the frame.
            Err(e) => Err(e.into()),
        }
    }

    /// Read a single `Frame` value from the underlying stream.
    ///
    /// On success, the received frame is returned. If the `TcpStream` is closed in a way that
    /// doesn't break a frame in half, `None` is returned. Otherwise, an error is returned.
    pub async fn read_frame(&mut self) -> crate::Result<Option<Frame>> {
        loop {
            // Attempt to read a frame from the buffered data.
            // If enough data has been buffered, the frame is returned.
            if let Some(frame) = self.parse_frame()? {
                return Ok(Some(frame));
            }

            // There is not enough buffered data to read a frame. Attempt to
            // read more data from the socket.
            //
            // `0` indicates "end of stream".
            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                if self.buffer.is_empty() {
                    // `TcpStream` is closed in a way that doesn't break a frame in half.
                    return Ok(None);
                } else {
                    // `TcpStream` is closed unexpectedly.
                    return Err("connection reset by peer".into());
                }
            }
        }
    }

    /// Write a single `Frame` value to the underlying stream.
    pub async fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        // Arrays are encoded recursively into the scratch buffer first.
        self.out.clear();
        frame.encode(&mut self.out);

        self.stream.write_all(&self.out).await?;

        // ensure the encoded frame is written to the socket.
        self.stream.flush().await
    }
}
