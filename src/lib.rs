//! A small append-only stream store speaking the Redis protocol, with a client
//! and a demo exercising the stream commands.
//!
//! The major components are:
//!
//! * `server`: accepts connections and applies stream commands to an in-memory store.
//!
//! * `client`: an async client with one method per stream command. It also
//!   works against a real Redis server.
//!
//! * `cmd`: `XADD`, `XREAD`, `XRANGE`, `XLEN` and `PING`.
//!
//! * `stream`: entry identifiers and the append-only log itself.
//!
//! * `activity`: the user activity demo run by the `instream-activity` binary.

pub mod activity;

pub mod client;
pub use client::{connect, Client};

pub mod cmd;
pub use cmd::Command;

mod connection;
pub use connection::Connection;

pub mod frame;
pub use frame::Frame;

mod db;
use db::Db;

mod parse;
use parse::{Parse, ParseError};

pub mod server;

mod shutdown;
use shutdown::Shutdown;

pub mod stream;
pub use stream::{Entry, EntryId, Fields, IdSpec};

/// Default port that the server listens on.
pub const DEFAULT_PORT: u16 = 6379;

/// Error returned by most functions.
///
/// Covers both an unreachable server and a failed operation. Callers decide
/// whether to abort; nothing in this crate retries.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// A specialized `Result` type for stream operations.
pub type Result<T> = std::result::Result<T, Error>;
