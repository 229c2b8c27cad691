//! Stream server implementation.
//!
//! Provides an async `run` function that listens for inbound connections,
//! spawning a task per connection.

use crate::{Command, Connection, Db, Frame, Shutdown};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::{self, Duration};
use tracing::{debug, error, info, instrument};

/// Server listener state.
#[derive(Debug)]
struct Listener {
    /// Shared stream store.
    ///
    /// This is a wrapper around an `Arc`, which allows `db` to be cloned and
    /// passed into the per connection state.
    db: Db,

    /// TCP listener.
    listener: TcpListener,

    /// Limit the max number of connections.
    limit_connections: Arc<Semaphore>,

    /// Broadcast a shutdown signal to all active connections.
    notify_shutdown: broadcast::Sender<()>,

    /// Used as part of the graceful shutdown process to wait for client
    /// connections to complete processing.
    shutdown_complete_tx: mpsc::Sender<()>,
    shutdown_complete_rx: mpsc::Receiver<()>,
}

/// Per-connection handler. Reads requests from `connection` and applies the commands to the `db`.
#[derive(Debug)]
struct Handler {
    db: Db,

    /// The TCP connection.
    connection: Connection,

    /// Address of the remote peer.
    peer: SocketAddr,

    /// Max connection semaphore.
    ///
    /// When the handler is dropped, a permit is returned to this semaphore.
    limit_connections: Arc<Semaphore>,

    /// Listen for shutdown notifications.
    shutdown: Shutdown,

    /// Not used directly. Dropped with the handler to signal completion.
    _shutdown_complete: mpsc::Sender<()>,
}

/// Maximum number of concurrent connections the server will accept.
const MAX_CONNECTIONS: usize = 250;

/// Run the server.
///
/// Accepts connections from the supplied listener. For each inbound connection,
/// a task is spawned to handle that connection. The server runs until the `shutdown`
/// future completes, at which point the server shuts down gracefully.
pub async fn run(listener: TcpListener, shutdown: impl Future) -> crate::Result<()> {
    let (notify_shutdown, _) = broadcast::channel(1);
    let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel(1);

    let mut server = Listener {
        listener,
        db: Db::new(),
        limit_connections: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        notify_shutdown,
        shutdown_complete_tx,
        shutdown_complete_rx,
    };

    tokio::select! {
        res = server.run() => {
            if let Err(err) = res {
                error!(cause = %err, "failed to accept");
            }
        }
        _ = shutdown => {
            info!("shutting down");
        }
    }

    let Listener {
        mut shutdown_complete_rx,
        shutdown_complete_tx,
        notify_shutdown,
        ..
    } = server;

    // Dropping `notify_shutdown` wakes every handler, including blocked `XREAD`s.
    drop(notify_shutdown);
    // Drop the final `Sender` so `Receiver` can complete.
    drop(shutdown_complete_tx);

    // Wait for all active connections to finish processing.
    let _ = shutdown_complete_rx.recv().await;

    Ok(())
}

impl Listener {
    /// Run the server.
    async fn run(&mut self) -> crate::Result<()> {
        info!(addr = ?self.listener.local_addr().ok(), "accepting inbound connections");

        loop {
            // Wait for a permit to become available.
            //
            // `acquire()` only returns `Err` once the semaphore is closed, and it
            // is never closed.
            self.limit_connections.acquire().await?.forget();

            // Accept a new socket.
            let (socket, peer) = self.accept().await?;

            let mut handler = Handler {
                db: self.db.clone(),
                connection: Connection::new(socket),
                peer,
                limit_connections: self.limit_connections.clone(),
                shutdown: Shutdown::new(self.notify_shutdown.subscribe()),
                _shutdown_complete: self.shutdown_complete_tx.clone(),
            };

            // Spawn a new task to process the connection.
            tokio::spawn(async move {
                if let Err(err) = handler.run().await {
                    error!(cause = ?err, peer = %handler.peer, "connection error");
                }
            });
        }
    }

    /// Accepts an inbound connection.
    ///
    /// Errors are handled by an exponential backoff strategy starting at one
    /// second. After the wait reaches 64 seconds the error is returned.
    async fn accept(&mut self) -> crate::Result<(TcpStream, SocketAddr)> {
        let mut backoff = 1;

        // Try to accept a few times.
        loop {
            match self.listener.accept().await {
                Ok(accepted) => return Ok(accepted),
                Err(err) => {
                    if backoff > 64 {
                        // Failed too many times. Return the error.
                        return Err(err.into());
                    }
                }
            }

            // Pause execution until the backoff period elapses.
            time::sleep(Duration::from_secs(backoff)).await;

            // Double the backoff.
            backoff *= 2;
        }
    }
}

impl Handler {
    /// Process a single connection.
    ///
    /// Requests that fail to parse as a command are answered with an error
    /// frame. Frames that are not valid RESP close the connection.
    #[instrument(skip(self))]
    async fn run(&mut self) -> crate::Result<()> {
        // Read new request frames until the shutdown signal has been received.
        while !self.shutdown.is_shutdown() {
            let maybe_frame = tokio::select! {
                res = self.connection.read_frame() => res?,
                _ = self.shutdown.recv() => {
                    return Ok(());
                }
            };

            // If `None` is returned then the peer has closed the socket.
            // There is no further work to do and the task can be terminated.
            let frame = match maybe_frame {
                Some(frame) => frame,
                None => return Ok(()),
            };

            // Convert the frame into a command. A bad command gets an error
            // reply and the connection keeps going.
            let cmd = match Command::from_frame(frame) {
                Ok(cmd) => cmd,
                Err(err) => {
                    debug!(cause = %err, "invalid command");
                    self.connection.write_frame(&error_frame(&err)).await?;
                    continue;
                }
            };

            debug!(name = cmd.get_name(), ?cmd);

            cmd.apply(&self.db, &mut self.connection, &mut self.shutdown)
                .await?;
        }

        Ok(())
    }
}

/// Turns a command parse error into an error reply. Replies always carry an
/// error code, `ERR` unless the message has one.
fn error_frame(err: &crate::Error) -> Frame {
    let msg = err.to_string();

    if msg.starts_with("ERR ") {
        Frame::Error(msg)
    } else {
        Frame::Error(format!("ERR {}", msg))
    }
}

impl Drop for Handler {
    fn drop(&mut self) {
        // Add a permit back to the semaphore.
        self.limit_connections.add_permits(1);
    }
}
