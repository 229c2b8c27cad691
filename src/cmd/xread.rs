use crate::stream::{Entry, EntryId};
use crate::{Connection, Db, Frame, Parse, ParseError, Shutdown};

use async_stream::stream;
use bytes::Bytes;
use std::future;
use tokio::sync::broadcast;
use tokio::time::{self, Duration, Instant};
use tokio_stream::StreamExt;
use tracing::{debug, instrument};

/// Reads entries newer than the given identifier from one or more streams.
///
/// With `BLOCK`, the command waits for an append to one of the streams when
/// nothing is available yet. A timeout of zero waits forever.
///
/// # Format
///
/// ```text
/// XREAD [COUNT count] [BLOCK milliseconds] STREAMS key [key ...] id [id ...]
/// ```
#[derive(Debug)]
pub struct XRead {
    streams: Vec<(String, ReadFrom)>,
    count: Option<u64>,
    block: Option<Duration>,
}

/// Where reading starts in a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFrom {
    /// Entries strictly after this identifier.
    After(EntryId),
    /// `$`, only entries appended after the command was received.
    Last,
}

impl XRead {
    pub fn new(streams: Vec<(String, ReadFrom)>, count: Option<u64>, block: Option<Duration>) -> XRead {
        XRead {
            streams,
            count,
            block,
        }
    }

    pub fn streams(&self) -> &[(String, ReadFrom)] {
        &self.streams
    }

    pub(crate) fn parse_frames(parse: &mut Parse) -> crate::Result<XRead> {
        let mut count = None;
        let mut block = None;

        loop {
            let option = match parse.next_string() {
                Ok(option) => option.to_uppercase(),
                Err(ParseError::EndOfStream) => return Err("ERR syntax error".into()),
                Err(err) => return Err(err.into()),
            };

            match &option[..] {
                // `COUNT 0` means no limit.
                "COUNT" => count = Some(parse.next_int()?).filter(|n| *n > 0),
                "BLOCK" => block = Some(Duration::from_millis(parse.next_int()?)),
                "STREAMS" => break,
                _ => return Err("ERR syntax error".into()),
            }
        }

        let remaining = parse.remaining();

        if remaining == 0 || remaining % 2 != 0 {
            return Err("ERR Unbalanced 'xread' list of streams: for each stream key an ID or '$' must be specified.".into());
        }

        let mut keys = Vec::with_capacity(remaining / 2);
        for _ in 0..remaining / 2 {
            keys.push(parse.next_string()?);
        }

        let mut streams = Vec::with_capacity(keys.len());
        for key in keys {
            let from = match &parse.next_string()?[..] {
                "$" => ReadFrom::Last,
                id => ReadFrom::After(id.parse::<EntryId>()?),
            };
            streams.push((key, from));
        }

        Ok(XRead {
            streams,
            count,
            block,
        })
    }

    /// Apply the `XRead` command to the specified `Db` instance and write the response to `dst`.
    ///
    /// A blocked read returns early, without a reply, when the server shuts down.
    #[instrument(skip(self, db, dst, shutdown))]
    pub(crate) async fn apply(
        self,
        db: &Db,
        dst: &mut Connection,
        shutdown: &mut Shutdown,
    ) -> crate::Result<()> {
        // `$` is resolved once, entries appended from now on are all "new".
        let streams: Vec<(String, EntryId)> = self
            .streams
            .into_iter()
            .map(|(key, from)| {
                let after = match from {
                    ReadFrom::After(id) => id,
                    ReadFrom::Last => db.last_id(&key),
                };
                (key, after)
            })
            .collect();

        // Subscribe before the first read so an append in between is not lost.
        let appends = db.subscribe_appends();

        let found = read_streams(db, &streams, self.count);

        let block = match self.block {
            Some(block) if found.is_empty() => block,
            _ => return write_response(dst, found).await,
        };

        let deadline = if block == Duration::from_millis(0) {
            None
        } else {
            Some(Instant::now() + block)
        };

        let keys: Vec<String> = streams.iter().map(|(key, _)| key.clone()).collect();
        let mut appends = Box::pin(appended_to(appends, keys));

        loop {
            let timeout = async {
                match deadline {
                    Some(when) => time::sleep_until(when).await,
                    None => future::pending().await,
                }
            };

            tokio::select! {
                _ = appends.next() => {
                    let found = read_streams(db, &streams, self.count);

                    if !found.is_empty() {
                        return write_response(dst, found).await;
                    }
                }
                _ = timeout => {
                    return write_response(dst, vec![]).await;
                }
                _ = shutdown.recv() => {
                    return Ok(());
                }
            }
        }
    }

    pub(crate) fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("xread".as_bytes()));

        if let Some(count) = self.count {
            frame.push_bulk(Bytes::from("COUNT".as_bytes()));
            frame.push_bulk(Bytes::from(count.to_string()));
        }

        if let Some(block) = self.block {
            frame.push_bulk(Bytes::from("BLOCK".as_bytes()));
            frame.push_bulk(Bytes::from(block.as_millis().to_string()));
        }

        frame.push_bulk(Bytes::from("STREAMS".as_bytes()));

        let (keys, ids): (Vec<_>, Vec<_>) = self.streams.into_iter().unzip();

        for key in keys {
            frame.push_bulk(Bytes::from(key.into_bytes()));
        }

        for id in ids {
            let id = match id {
                ReadFrom::After(id) => id.to_string(),
                ReadFrom::Last => "$".to_string(),
            };
            frame.push_bulk(Bytes::from(id));
        }

        frame
    }
}

/// Reads every stream, keeping only the ones with new entries.
fn read_streams(db: &Db, streams: &[(String, EntryId)], count: Option<u64>) -> Vec<(String, Vec<Entry>)> {
    streams
        .iter()
        .map(|(key, after)| (key.clone(), db.read_after(key, *after, count)))
        .filter(|(_, entries)| !entries.is_empty())
        .collect()
}

/// Yields once for every append to one of `keys`.
fn appended_to(
    mut rx: broadcast::Receiver<String>,
    keys: Vec<String>,
) -> impl tokio_stream::Stream<Item = ()> {
    stream! {
        loop {
            match rx.recv().await {
                Ok(key) if keys.contains(&key) => yield (),
                Ok(_) => {}
                // Some appends were missed, one of them may be ours.
                Err(broadcast::error::RecvError::Lagged(_)) => yield (),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Writes `[[key, [entry, ...]], ...]`, or a null reply when nothing was found.
async fn write_response(dst: &mut Connection, found: Vec<(String, Vec<Entry>)>) -> crate::Result<()> {
    let response = if found.is_empty() {
        Frame::Null
    } else {
        let mut response = Frame::array();

        for (key, entries) in found {
            let mut items = Frame::array();
            for entry in entries {
                items.push(entry.into_frame());
            }

            let mut stream = Frame::array();
            stream.push_bulk(Bytes::from(key.into_bytes()));
            stream.push(items);

            response.push(stream);
        }

        response
    };

    debug!(?response);

    dst.write_frame(&response).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(parts: &[&str]) -> crate::Result<XRead> {
        let frame = Frame::Array(
            parts
                .iter()
                .map(|part| Frame::Bulk(Bytes::from(part.to_string())))
                .collect(),
        );

        let mut parse = Parse::new(frame)?;
        parse.next_string()?;
        XRead::parse_frames(&mut parse)
    }

    #[test]
    fn parse_options_and_streams() {
        let cmd = parse(&["XREAD", "COUNT", "10", "BLOCK", "250", "STREAMS", "a", "b", "0-0", "$"])
            .unwrap();

        assert_eq!(cmd.count, Some(10));
        assert_eq!(cmd.block, Some(Duration::from_millis(250)));
        assert_eq!(
            cmd.streams(),
            &[
                ("a".to_string(), ReadFrom::After(EntryId::MIN)),
                ("b".to_string(), ReadFrom::Last),
            ]
        );
    }

    #[test]
    fn count_zero_is_unlimited() {
        let cmd = parse(&["xread", "count", "0", "streams", "a", "5"]).unwrap();

        assert_eq!(cmd.count, None);
        assert_eq!(cmd.streams(), &[("a".to_string(), ReadFrom::After(EntryId::new(5, 0)))]);
    }

    #[test]
    fn unbalanced_streams_are_rejected() {
        assert!(parse(&["XREAD", "STREAMS", "a", "b", "0-0"]).is_err());
        assert!(parse(&["XREAD", "STREAMS"]).is_err());
        assert!(parse(&["XREAD", "COUNT", "1"]).is_err());
        assert!(parse(&["XREAD", "BOGUS", "STREAMS", "a", "0"]).is_err());
    }

    #[test]
    fn into_frame_round_trips_through_parse() {
        let cmd = XRead::new(
            vec![("user_activity".to_string(), ReadFrom::After(EntryId::new(7, 2)))],
            Some(3),
            None,
        );

        let mut parse = Parse::new(cmd.into_frame()).unwrap();
        assert_eq!(parse.next_string().unwrap(), "xread");

        let cmd = XRead::parse_frames(&mut parse).unwrap();
        assert_eq!(cmd.count, Some(3));
        assert_eq!(cmd.block, None);
        assert_eq!(
            cmd.streams(),
            &[("user_activity".to_string(), ReadFrom::After(EntryId::new(7, 2)))]
        );
    }
}
