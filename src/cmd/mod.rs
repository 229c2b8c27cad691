//! Stream commands implementation.

mod ping;
pub use ping::Ping;

mod xadd;
pub use xadd::XAdd;

mod xlen;
pub use xlen::XLen;

mod xrange;
pub use xrange::XRange;

mod xread;
pub use xread::{ReadFrom, XRead};

mod unknown;
pub use unknown::Unknown;

use crate::{Connection, Db, Frame, Parse, Shutdown};

/// Supported commands.
#[derive(Debug)]
pub enum Command {
    Ping(Ping),
    XAdd(XAdd),
    XLen(XLen),
    XRange(XRange),
    XRead(XRead),
    Unknown(Unknown),
}

impl Command {
    /// Parse a command from a received frame.
    ///
    /// The frame must be the array variant and represent a supported command.
    pub fn from_frame(frame: Frame) -> crate::Result<Command> {
        let mut parse = Parse::new(frame)?;

        // All commands begin with the command name as a string. The name is read and
        // converted to lowercase in order to do case insensitive matching.
        let command_name = parse.next_string()?.to_lowercase();

        let command = match &command_name[..] {
            "ping" => Command::Ping(Ping::parse_frames(&mut parse)?),
            "xadd" => Command::XAdd(XAdd::parse_frames(&mut parse)?),
            "xlen" => Command::XLen(XLen::parse_frames(&mut parse)?),
            "xrange" => Command::XRange(XRange::parse_frames(&mut parse)?),
            "xread" => Command::XRead(XRead::parse_frames(&mut parse)?),
            _ => return Ok(Command::Unknown(Unknown::new(command_name))),
        };

        // Check if there is any remaining unconsumed fields in the `Parse`.
        parse.finish()?;

        Ok(command)
    }

    /// Apply the command to the specified `Db` instance and write the response to `dst`.
    pub(crate) async fn apply(
        self,
        db: &Db,
        dst: &mut Connection,
        shutdown: &mut Shutdown,
    ) -> crate::Result<()> {
        use Command::*;

        match self {
            Ping(cmd) => cmd.apply(dst).await,
            XAdd(cmd) => cmd.apply(db, dst).await,
            XLen(cmd) => cmd.apply(db, dst).await,
            XRange(cmd) => cmd.apply(db, dst).await,
            XRead(cmd) => cmd.apply(db, dst, shutdown).await,
            Unknown(cmd) => cmd.apply(dst).await,
        }
    }

    /// Returns the command name.
    pub(crate) fn get_name(&self) -> &str {
        match self {
            Command::Ping(_) => "ping",
            Command::XAdd(_) => "xadd",
            Command::XLen(_) => "xlen",
            Command::XRange(_) => "xrange",
            Command::XRead(_) => "xread",
            Command::Unknown(cmd) => cmd.get_name(),
        }
    }
}
