use crate::stream::{Fields, IdSpec};
use crate::{Connection, Db, Frame, Parse, ParseError};

use bytes::Bytes;
use tracing::{debug, instrument};

/// Appends an entry to the stream stored at key.
///
/// The stream is created if it does not exist. The reply is the identifier of
/// the new entry.
///
/// # Format
///
/// ```text
/// XADD key <* | ms-* | ms-seq> field value [field value ...]
/// ```
#[derive(Debug)]
pub struct XAdd {
    key: String,
    id: IdSpec,
    fields: Fields,
}

impl XAdd {
    pub fn new(key: impl ToString, id: IdSpec, fields: Fields) -> XAdd {
        XAdd {
            key: key.to_string(),
            id,
            fields,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn id(&self) -> IdSpec {
        self.id
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub(crate) fn parse_frames(parse: &mut Parse) -> crate::Result<XAdd> {
        let key = parse.next_string()?;
        let id = IdSpec::parse(&parse.next_string()?)?;

        let mut fields = vec![];

        loop {
            match parse.next_string() {
                Ok(name) => {
                    // A field without its value fails with `EndOfStream`.
                    let value = parse.next_bytes()?;
                    fields.push((name, value));
                }
                Err(ParseError::EndOfStream) => break,
                Err(err) => return Err(err.into()),
            }
        }

        if fields.is_empty() {
            return Err("ERR wrong number of arguments for 'xadd' command".into());
        }

        Ok(XAdd { key, id, fields })
    }

    /// Apply the `XAdd` command to the specified `Db` instance and write the response to `dst`.
    #[instrument(skip(self, db, dst))]
    pub(crate) async fn apply(self, db: &Db, dst: &mut Connection) -> crate::Result<()> {
        let response = match db.append(&self.key, self.id, self.fields) {
            Ok(id) => Frame::Bulk(Bytes::from(id.to_string())),
            Err(err) => Frame::Error(err.to_string()),
        };

        debug!(?response);

        dst.write_frame(&response).await?;

        Ok(())
    }

    pub(crate) fn into_frame(self) -> Frame {
        let mut frame = Frame::array();
        frame.push_bulk(Bytes::from("xadd".as_bytes()));
        frame.push_bulk(Bytes::from(self.key.into_bytes()));
        frame.push_bulk(Bytes::from(self.id.to_string()));

        for (name, value) in self.fields {
            frame.push_bulk(Bytes::from(name.into_bytes()));
            frame.push_bulk(value);
        }

        frame
    }
}
