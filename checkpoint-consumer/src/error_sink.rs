use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::client::ClientError;
use crate::metrics::CLIENT_ERRORS;

/// Log every error the client reports until the error stream ends, and
/// return how many there were.
///
/// This is strictly an observer: it shares nothing with the processing loop,
/// so a burst of errors never holds up message delivery.
pub async fn drain_errors(mut errors: mpsc::UnboundedReceiver<ClientError>) -> u64 {
    let mut drained = 0;

    while let Some(err) = errors.recv().await {
        drained += 1;
        metrics::counter!(CLIENT_ERRORS).increment(1);
        warn!(error = %err, "consumer client reported an error");
    }

    info!(drained, "client error stream closed");
    drained
}
