//! Single exit point for job state changes.

use std::sync::Arc;

use tracing::warn;

use genflow_events::{
    BroadcastMessage, FanOut, FanOutReport, InstanceId, JobUpdate, UpdateBroadcaster,
};
use genflow_jobs::Job;

/// Publishes every job change to the local hubs and, when configured, to
/// other instances. Neither path ever blocks or fails the caller.
#[derive(Clone)]
pub struct UpdatePublisher {
    fanout: FanOut,
    broadcaster: Option<Arc<dyn UpdateBroadcaster>>,
    instance: InstanceId,
}

impl core::fmt::Debug for UpdatePublisher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UpdatePublisher")
            .field("instance", &self.instance)
            .field("broadcasting", &self.broadcaster.is_some())
            .finish()
    }
}

impl UpdatePublisher {
    pub fn new(fanout: FanOut, instance: InstanceId) -> Self {
        Self {
            fanout,
            broadcaster: None,
            instance,
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn UpdateBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn fanout(&self) -> &FanOut {
        &self.fanout
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub fn publish(&self, job: &Job) -> FanOutReport {
        let update = JobUpdate::from(job);

        if let Some(broadcaster) = &self.broadcaster {
            let message = BroadcastMessage::new(self.instance, update.clone());
            if let Err(e) = broadcaster.publish(&message) {
                warn!(
                    job_id = %job.id,
                    tenant_id = %job.tenant_id,
                    error = %e,
                    "broadcast of job update failed"
                );
            }
        }

        self.fanout.publish_job_update(update)
    }
}
