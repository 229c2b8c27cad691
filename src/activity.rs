//! User activity demo.
//!
//! Appends a fixed batch of three events to the `user_activity` stream, reads
//! them back from the beginning, fetches the same entries through an explicit
//! range and reports the stream length. Each step writes a short summary.
//! The first error aborts the run; whatever was written so far stays written.

use crate::{Client, Entry, EntryId, Fields};

use bytes::Bytes;
use std::io::Write;
use tracing::info;

/// Stream the demo writes to.
pub const STREAM: &str = "user_activity";

/// Maximum number of entries fetched by the read step.
pub const READ_LIMIT: u64 = 10;

/// The events appended by the demo, in order.
pub fn events() -> Vec<Fields> {
    vec![
        fields(&[("user", "juan"), ("event", "login")]),
        fields(&[("user", "maria"), ("event", "compra"), ("item", "laptop")]),
        fields(&[("user", "carlos"), ("event", "logout")]),
    ]
}

fn fields(pairs: &[(&str, &str)]) -> Fields {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), Bytes::copy_from_slice(value.as_bytes())))
        .collect()
}

/// Runs the four steps in order against `client`.
pub async fn run(client: &mut Client, out: &mut impl Write) -> crate::Result<()> {
    add_events(client, out).await?;
    read_events(client, out).await?;
    range_events(client, out).await?;
    stream_length(client, out).await?;

    Ok(())
}

/// Appends the demo events. Returns their identifiers.
pub async fn add_events(client: &mut Client, out: &mut impl Write) -> crate::Result<Vec<EntryId>> {
    let events = events();
    let mut ids = Vec::with_capacity(events.len());

    for event in events {
        ids.push(client.xadd(STREAM, event).await?);
    }

    info!(stream = STREAM, count = ids.len(), "events added");
    writeln!(out, "{} events added to stream '{}'.", ids.len(), STREAM)?;

    Ok(ids)
}

/// Reads every entry from the start of the stream.
pub async fn read_events(client: &mut Client, out: &mut impl Write) -> crate::Result<Vec<Entry>> {
    let entries = client.xread(STREAM, EntryId::MIN, Some(READ_LIMIT)).await?;

    writeln!(out, "\nEvents read:")?;
    write_entries(out, &entries)?;

    Ok(entries)
}

/// Fetches the whole stream through an explicit `0-0 .. +` range.
pub async fn range_events(client: &mut Client, out: &mut impl Write) -> crate::Result<Vec<Entry>> {
    let entries = client.xrange(STREAM, EntryId::MIN, EntryId::MAX, None).await?;

    writeln!(out, "\nEvents in range:")?;
    write_entries(out, &entries)?;

    Ok(entries)
}

pub async fn stream_length(client: &mut Client, out: &mut impl Write) -> crate::Result<u64> {
    let len = client.xlen(STREAM).await?;

    writeln!(out, "\nLength of stream '{}': {}", STREAM, len)?;

    Ok(len)
}

fn write_entries(out: &mut impl Write, entries: &[Entry]) -> std::io::Result<()> {
    for entry in entries {
        writeln!(out, "ID: {}, Data: {}", entry.id, format_fields(&entry.fields))?;
    }

    Ok(())
}

/// Renders fields as `{name: value, ...}` in their stored order.
pub fn format_fields(fields: &Fields) -> String {
    let pairs: Vec<String> = fields
        .iter()
        .map(|(name, value)| format!("{}: {}", name, String::from_utf8_lossy(value)))
        .collect();

    format!("{{{}}}", pairs.join(", "))
}
