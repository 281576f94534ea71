use std::sync::Arc;
use std::time::Duration;

use fileswap_api::blob::discard_record_blobs;
use fileswap_api::{BlobSink, SwapEngine, SwapError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Background task that removes expired swaps.
///
/// Runs on an interval until `shutdown` is cancelled, sweeps records past
/// their `expires_at`, and deletes the blobs they referenced.
pub async fn run_sweep_loop(
    engine: Arc<SwapEngine>,
    blobs: Arc<dyn BlobSink>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Sweep task stopping");
                return;
            }
            _ = interval.tick() => {}
        }

        match sweep_once(&engine, blobs.as_ref()).await {
            Ok(count) => {
                if count > 0 {
                    info!("Sweep: removed {} expired swaps", count);
                }
            }
            Err(e) => {
                warn!("Sweep error: {}", e);
            }
        }
    }
}

pub async fn sweep_once(engine: &SwapEngine, blobs: &dyn BlobSink) -> Result<usize, SwapError> {
    let expired = engine.sweep_expired().await?;
    for record in &expired {
        debug!("Swap {} expired at {}", record.id, record.expires_at.to_rfc3339());
        discard_record_blobs(blobs, record).await;
    }
    Ok(expired.len())
}
