use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use genflow_events::{BroadcastError, FanOut, InstanceId, UpdateBroadcaster};

/// Feeds job updates published by other instances into the local hubs.
pub struct UpdateBridge;

#[derive(Debug)]
pub struct BridgeHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<u64>,
}

impl BridgeHandle {
    /// Stop forwarding. Returns how many remote updates were delivered locally.
    pub async fn stop(self) -> u64 {
        let _ = self.shutdown.send(true);
        self.join.await.unwrap_or_else(|e| {
            warn!(error = %e, "update bridge task failed");
            0
        })
    }
}

impl UpdateBridge {
    /// Subscribe to `broadcaster` and forward everything not sent by `instance`.
    pub fn spawn(
        broadcaster: Arc<dyn UpdateBroadcaster>,
        fanout: FanOut,
        instance: InstanceId,
    ) -> Result<BridgeHandle, BroadcastError> {
        let mut subscription = broadcaster.subscribe()?;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut forwarded = 0u64;
            loop {
                let message = tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    message = subscription.recv() => message,
                };
                let Some(message) = message else {
                    warn!("broadcast transport closed; update bridge stopping");
                    break;
                };
                if message.is_from(instance) {
                    continue;
                }

                debug!(
                    job_id = %message.update.job_id,
                    origin = %message.origin,
                    "remote job update"
                );
                fanout.publish_job_update(message.update);
                forwarded += 1;
            }
            forwarded
        });

        info!(instance = %instance, "update bridge started");
        Ok(BridgeHandle {
            shutdown: shutdown_tx,
            join,
        })
    }
}
