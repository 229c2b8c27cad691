//! Stream client implementation.
//!
//! Speaks RESP, so it works against an `instream` server as well as against a
//! real Redis server.

use crate::cmd::{Ping, ReadFrom, XAdd, XLen, XRange, XRead};
use crate::stream::{Entry, EntryId, Fields, IdSpec};
use crate::{Connection, Frame};

use async_stream::try_stream;
use bytes::Bytes;
use std::convert::TryFrom;
use std::io::{Error, ErrorKind};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::Duration;
use tokio_stream::Stream;
use tracing::{debug, instrument};

/// Established connection with a stream server.
pub struct Client {
    connection: Connection,
}

/// Establish a connection with the server located at `addr`.
pub async fn connect<T: ToSocketAddrs>(addr: T) -> crate::Result<Client> {
    let socket = TcpStream::connect(addr).await?;

    let connection = Connection::new(socket);

    Ok(Client { connection })
}

impl Client {
    /// Checks that the server is alive. Returns `PONG` or the echoed `msg`.
    #[instrument(skip(self))]
    pub async fn ping(&mut self, msg: Option<Bytes>) -> crate::Result<Bytes> {
        let frame = Ping::new(msg).into_frame();

        debug!(request = ?frame);

        self.connection.write_frame(&frame).await?;

        match self.read_response().await? {
            Frame::Simple(value) => Ok(value.into()),
            Frame::Bulk(value) => Ok(value),
            frame => Err(frame.to_error()),
        }
    }

    /// Appends `fields` to the stream `key` with a generated identifier.
    #[instrument(skip(self))]
    pub async fn xadd(&mut self, key: &str, fields: Fields) -> crate::Result<EntryId> {
        self.xadd_with_id(key, IdSpec::Auto, fields).await
    }

    /// Appends `fields` to the stream `key` using the given identifier policy.
    #[instrument(skip(self))]
    pub async fn xadd_with_id(
        &mut self,
        key: &str,
        id: IdSpec,
        fields: Fields,
    ) -> crate::Result<EntryId> {
        let frame = XAdd::new(key, id, fields).into_frame();

        debug!(request = ?frame);

        self.connection.write_frame(&frame).await?;

        match self.read_response().await? {
            Frame::Bulk(id) => Ok(std::str::from_utf8(&id)?.parse::<EntryId>()?),
            Frame::Simple(id) => id.parse(),
            frame => Err(frame.to_error()),
        }
    }

    /// Reads at most `count` entries of `key` with an identifier greater than `after`.
    ///
    /// A missing stream reads as empty.
    #[instrument(skip(self))]
    pub async fn xread(
        &mut self,
        key: &str,
        after: EntryId,
        count: Option<u64>,
    ) -> crate::Result<Vec<Entry>> {
        let cmd = XRead::new(vec![(key.to_string(), ReadFrom::After(after))], count, None);
        self.xread_cmd(key, cmd).await
    }

    /// Like `xread`, but waits up to `timeout` for an entry to be appended when
    /// none is available. A zero `timeout` waits forever.
    #[instrument(skip(self))]
    pub async fn xread_blocking(
        &mut self,
        key: &str,
        after: EntryId,
        count: Option<u64>,
        timeout: Duration,
    ) -> crate::Result<Vec<Entry>> {
        let cmd = XRead::new(
            vec![(key.to_string(), ReadFrom::After(after))],
            count,
            Some(timeout),
        );
        self.xread_cmd(key, cmd).await
    }

    async fn xread_cmd(&mut self, key: &str, cmd: XRead) -> crate::Result<Vec<Entry>> {
        let frame = cmd.into_frame();

        debug!(request = ?frame);

        self.connection.write_frame(&frame).await?;

        let streams = match self.read_response().await? {
            // Nothing new, or the block timed out.
            Frame::Null => return Ok(vec![]),
            Frame::Array(streams) => streams,
            frame => return Err(frame.to_error()),
        };

        let mut out = vec![];

        for stream in streams {
            match stream {
                Frame::Array(parts) => match <[Frame; 2]>::try_from(parts) {
                    Ok([name, Frame::Array(entries)]) if name == key => {
                        for entry in entries {
                            out.push(Entry::from_frame(entry)?);
                        }
                    }
                    Ok([name, entries]) => {
                        return Err(Frame::Array(vec![name, entries]).to_error())
                    }
                    Err(parts) => return Err(Frame::Array(parts).to_error()),
                },
                frame => return Err(frame.to_error()),
            }
        }

        Ok(out)
    }

    /// Returns the entries of `key` with an identifier in `[start, end]`.
    ///
    /// `EntryId::MIN` and `EntryId::MAX` stand for the whole stream.
    #[instrument(skip(self))]
    pub async fn xrange(
        &mut self,
        key: &str,
        start: EntryId,
        end: EntryId,
        count: Option<u64>,
    ) -> crate::Result<Vec<Entry>> {
        let frame = XRange::new(key, start, end, count).into_frame();

        debug!(request = ?frame);

        self.connection.write_frame(&frame).await?;

        match self.read_response().await? {
            Frame::Array(entries) => entries.into_iter().map(Entry::from_frame).collect(),
            Frame::Null => Ok(vec![]),
            frame => Err(frame.to_error()),
        }
    }

    /// Returns the number of entries in `key`.
    #[instrument(skip(self))]
    pub async fn xlen(&mut self, key: &str) -> crate::Result<u64> {
        let frame = XLen::new(key).into_frame();

        debug!(request = ?frame);

        self.connection.write_frame(&frame).await?;

        match self.read_response().await? {
            Frame::Integer(len) => Ok(len),
            frame => Err(frame.to_error()),
        }
    }

    /// Converts the client into a `Stream` yielding every entry of `key` after
    /// `after`, waiting for new appends once the existing entries are consumed.
    pub fn tail(mut self, key: &str, after: EntryId) -> impl Stream<Item = crate::Result<Entry>> {
        let key = key.to_string();

        try_stream! {
            let mut last = after;

            loop {
                let entries = self
                    .xread_blocking(&key, last, None, Duration::from_millis(0))
                    .await?;

                for entry in entries {
                    last = entry.id;
                    yield entry;
                }
            }
        }
    }

    async fn read_response(&mut self) -> crate::Result<Frame> {
        let response = self.connection.read_frame().await?;

        debug!(?response);

        match response {
            Some(Frame::Error(msg)) => Err(msg.into()),
            Some(frame) => Ok(frame),
            // `None` here indicates the server has closed the connection without sending a frame.
            None => {
                let err = Error::new(ErrorKind::ConnectionReset, "connection reset by server");

                Err(err.into())
            }
        }
    }
}
