//! instream server.
//!
//! Entry point of the server. Parses the command line, binds the listener and
//! runs until ctrl-c.

use instream::{server, DEFAULT_PORT};

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "instream-server", version, about = "In-memory stream store speaking RESP")]
struct Cli {
    /// Port to listen on.
    #[arg(long, env = "INSTREAM_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
pub async fn main() -> instream::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let listener = TcpListener::bind(&format!("127.0.0.1:{}", cli.port)).await?;

    server::run(listener, signal::ctrl_c()).await
}
