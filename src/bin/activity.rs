//! User activity demo.
//!
//! Connects to the store at `INSTREAM_ADDR` (default `127.0.0.1:6379`) and
//! runs the four stream steps. Any error is printed on stderr and the process
//! exits with status 1.

use instream::activity;

use std::env;
use std::io;
use std::process;
use tracing::debug;

const DEFAULT_ADDR: &str = "127.0.0.1:6379";

#[tokio::main(flavor = "current_thread")]
pub async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(err) = run().await {
        eprintln!("error: {}", err);
        process::exit(1);
    }
}

async fn run() -> instream::Result<()> {
    let addr = env::var("INSTREAM_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    debug!(%addr, "connecting");

    let mut client = instream::connect(&addr).await?;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    activity::run(&mut client, &mut out).await
}
