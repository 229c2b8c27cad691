use tokio::sync::broadcast;

/// Listens for the server shutdown signal.
///
/// Handlers and blocked reads stop once the signal has been received.
#[derive(Debug)]
pub(crate) struct Shutdown {
    /// Whether the shutdown signal has been received.
    shutdown: bool,
    /// The receive half of the channel used to listen for shutdown.
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub(crate) fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            shutdown: false,
            notify,
        }
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Waits for the shutdown notice. Returns immediately once it was received.
    pub(crate) async fn recv(&mut self) {
        if self.shutdown {
            return;
        }

        // Ignore "lag error" as only one value is ever sent. A dropped sender
        // means shutdown as well.
        let _ = self.notify.recv().await;

        self.shutdown = true;
    }
}
