//! Poll loop: fetches batches of due messages and feeds them to the
//! delivery executor, one at a time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::delivery::DeliveryExecutor;

/// Maximum messages fetched per poll cycle.
pub const BATCH_LIMIT: u32 = 50;

/// Run a single poll cycle. Returns the number of messages processed.
///
/// A failed fetch degrades to an empty batch (logged, no crash). Messages
/// are processed strictly sequentially so only one SMTP connection is open
/// at a time; one message's failure never stops the batch.
pub async fn run_once(executor: &DeliveryExecutor) -> usize {
    let batch = match executor.store().fetch_due_messages(BATCH_LIMIT).await {
        Ok(batch) => batch,
        Err(e) => {
            error!("Error fetching due messages: {e}");
            return 0;
        }
    };

    if batch.is_empty() {
        debug!("No due messages");
        return 0;
    }

    info!(count = batch.len(), "Due messages found");
    for message in &batch {
        let outcome = executor.process(message).await;
        debug!(id = %message.id, ?outcome, "Message processed");
    }
    batch.len()
}

/// Spawn the long-running poll loop: one cycle immediately, then one per
/// interval tick. Returns a `JoinHandle` and a shutdown flag; set the flag
/// to stop polling after the current cycle.
pub fn spawn_poll_loop(
    executor: Arc<DeliveryExecutor>,
    interval_secs: u64,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!("Poll loop started, polling every {interval_secs}s");

        let mut tick = tokio::time::interval(Duration::from_secs(interval_secs));

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Poll loop shutting down");
                return;
            }

            run_once(&executor).await;
        }
    });

    (handle, shutdown_flag)
}
