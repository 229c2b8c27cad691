use crate::stream::EntryId;
use crate::{Connection, Db, Frame, Parse, ParseError};

use bytes::Bytes;
use tracing::{debug, instrument};

/// Returns the entries of a stream with an identifier in `[start, end]`.
///
/// `-` and `+` stand for the smallest and the greatest identifier. A bare
/// millisecond value covers every sequence number of that millisecond.
///
/// # Format
///
/// ```text
/// XRANGE key start end [COUNT count]
/// ```
#[derive(Debug)]
pub struct XRange {
    key: String,
    start: EntryId,
    end: EntryId,
    count: Option<u64>,
}

impl XRange {
    pub fn new(key: impl ToString, start: EntryId, end: EntryId, count: Option<u64>) -> XRange {
        XRange {
            key: key.to_string(),
            start,
            end,
            count,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn parse_frames(parse: &mut Parse) -> crate::Result<XRange> {
        let key = parse.next_string()?;
        let start = EntryId::parse_range_start(&parse.next_string()?)?;
        let end = EntryId::parse_range_end(&parse.next_string()?)?;

        let count = match parse.next_string() {
            Ok(s) if s.to_uppercase() == "COUNT" => Some(parse.next_int()?),
            Ok(_) => return Err("ERR syntax error".into()),
            Err(ParseError::EndOfStream) => None,
            Err(err) => return Err(err.into()),
        };

        Ok(XRange {
            key,
            start,
            end,
            count,
        })
    }

    #[instrument(skip(self, db, dst))]
    pub(crate) async fn apply(self, db: &Db, dst: &mut Connection) -> crate::Result<()> {
        let entries = db.range(&self.key, self.start, self.end, self.count);

        let mut response = Frame::array();
        for entry in entries {
            response.push(entry.into_frame());
        }

        debug!(?response);

        dst.write_frame(&response).await?;

        Ok(())
    }

    pub(crate) fn into_frame(self) -> Frame {
        // The lowest bound goes out as `0-0`, only the open end needs `+`.
        let start = self.start.to_string();
        let end = match self.end {
            EntryId::MAX => "+".to_string(),
            id => id.to_string(),
        };

        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("xrange".as_bytes()));
        frame.push_bulk(Bytes::from(self.key.into_bytes()));
        frame.push_bulk(Bytes::from(start));
        frame.push_bulk(Bytes::from(end));

        if let Some(count) = self.count {
            frame.push_bulk(Bytes::from("COUNT".as_bytes()));
            frame.push_bulk(Bytes::from(count.to_string()));
        }

        frame
    }
}
