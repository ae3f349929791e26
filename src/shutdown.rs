use tokio::sync::broadcast;

/// Broadcasts a single shutdown signal to the HTTP server and background workers.
///
/// ```no_run
/// use parcel_intake::shutdown::ShutdownCoordinator;
///
/// # async fn example() {
/// let coordinator = ShutdownCoordinator::new();
/// let mut shutdown_rx = coordinator.subscribe();
///
/// tokio::spawn(async move {
///     let _ = shutdown_rx.recv().await;
///     // stop accepting work
/// });
///
/// coordinator.wait_for_signal().await;
/// # }
/// ```
#[derive(Clone)]
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(10);
        Self { shutdown_tx }
    }

    /// Receiver that yields once shutdown is triggered
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub fn has_subscribers(&self) -> bool {
        self.shutdown_tx.receiver_count() > 0
    }

    /// Future resolving once shutdown has been triggered, for warp's graceful shutdown
    pub fn signalled(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.subscribe();
        async move {
            let _ = rx.recv().await;
        }
    }

    /// Wait for Ctrl-C, then broadcast shutdown.
    pub async fn wait_for_signal(&self) {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C, shutting down");
        }
        tracing::info!("Shutdown signal received");
        self.shutdown();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
