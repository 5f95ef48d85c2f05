use tokio_util::sync::CancellationToken;

/// Process-wide cancellation source; cloned tokens reach every long-lived
/// task, including the follower.
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for Ctrl+C (SIGINT) and cancels the token.
pub async fn wait_ctrl_c(shutdown: &Shutdown) {
    let _ = tokio::signal::ctrl_c().await;
    shutdown.cancel();
}

/// Wait for SIGTERM on Unix. On non-Unix this only completes on cancellation.
#[cfg(unix)]
pub async fn wait_sigterm(shutdown: &Shutdown) {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
            shutdown.cancel();
        }
        Err(_) => {
            shutdown.token().cancelled().await;
        }
    }
}

#[cfg(not(unix))]
pub async fn wait_sigterm(shutdown: &Shutdown) {
    shutdown.token().cancelled().await;
}
