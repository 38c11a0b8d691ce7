/// Signal handling for graceful shutdown.
///
/// SIGINT (Ctrl-C) and SIGTERM both flip a shared shutdown flag once.
/// Long-running loops (heartbeat, supervise, serve) watch the flag and exit
/// cleanly; a container runtime stops containers with SIGTERM.
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

/// Receiving side of the shutdown flag.
pub type Shutdown = watch::Receiver<bool>;

pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

impl ShutdownSignal {
    /// A signal that only fires when `trigger` is called.
    pub fn manual() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Install SIGINT/SIGTERM handlers that trigger shutdown.
    pub fn install() -> std::io::Result<Self> {
        let shutdown = Self::manual();
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let tx = shutdown.tx.clone();

        tokio::spawn(async move {
            let name = tokio::select! {
                _ = sigint.recv() => "SIGINT",
                _ = sigterm.recv() => "SIGTERM",
            };
            tracing::info!(signal = name, "shutdown requested");
            tx.send_replace(true);
        });

        Ok(shutdown)
    }

    /// New receiver for the shutdown flag.
    pub fn subscribe(&self) -> Shutdown {
        self.tx.subscribe()
    }

    /// Request shutdown.
    #[cfg(test)]
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Resolve once shutdown has been requested.
///
/// Also resolves if the sender is gone, since nobody can request shutdown anymore.
pub async fn wait_for(shutdown: &mut Shutdown) {
    if *shutdown.borrow() {
        return;
    }
    while shutdown.changed().await.is_ok() {
        if *shutdown.borrow() {
            return;
        }
    }
}
