use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::client::CheckpointClient;

/// Ask the client to stop delivering messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The client acknowledged the close request.
    Closed,
    /// The close request returned an error.
    CloseFailed,
    /// The close request did not finish within the close timeout.
    CloseTimedOut,
    /// We never got a signal to act on, so nothing was closed.
    SignalFailed,
}

/// Waits for an interrupt and turns it into exactly one close request.
pub struct ShutdownCoordinator {
    client: Arc<dyn CheckpointClient>,
    close_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(client: Arc<dyn CheckpointClient>, close_timeout: Duration) -> Self {
        Self {
            client,
            close_timeout,
        }
    }

    /// Wait for `interrupt`, then close the client.
    ///
    /// Close failures are logged and never retried: once the client stops
    /// delivering, the processing loop ends on its own when the message
    /// stream runs dry.
    pub async fn run<F>(self, interrupt: F) -> ShutdownOutcome
    where
        F: Future<Output = io::Result<ShutdownRequest>>,
    {
        let request = match interrupt.await {
            Ok(request) => request,
            Err(e) => {
                error!("failed to listen for shutdown signals: {}", e);
                return ShutdownOutcome::SignalFailed;
            }
        };

        self.handle(request).await
    }

    async fn handle(&self, _request: ShutdownRequest) -> ShutdownOutcome {
        info!("shutdown requested, closing consumer");

        match tokio::time::timeout(self.close_timeout, self.client.close()).await {
            Ok(Ok(())) => {
                info!("consumer closed, draining remaining messages");
                ShutdownOutcome::Closed
            }
            Ok(Err(e)) => {
                error!("error closing the consumer: {}", e);
                ShutdownOutcome::CloseFailed
            }
            Err(_) => {
                error!(timeout = ?self.close_timeout, "timed out closing the consumer");
                ShutdownOutcome::CloseTimedOut
            }
        }
    }
}

/// Resolve on the first SIGINT or SIGTERM.
#[cfg(unix)]
pub async fn wait_for_interrupt() -> io::Result<ShutdownRequest> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("received SIGINT");
        }
        _ = sigterm.recv() => info!("received SIGTERM"),
    }

    Ok(ShutdownRequest)
}

#[cfg(not(unix))]
pub async fn wait_for_interrupt() -> io::Result<ShutdownRequest> {
    tokio::signal::ctrl_c().await?;
    info!("received ctrl-c");

    Ok(ShutdownRequest)
}
