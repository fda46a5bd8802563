//! Cross-instance relay contract for job updates.
//!
//! Each instance publishes the updates it produced, tagged with its own
//! [`InstanceId`], and subscribes to everyone's. Receivers drop messages
//! carrying their own origin so nothing is delivered twice locally.
//! Delivery is best-effort and unordered across instances.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::update::JobUpdate;

/// Identity of one running process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub origin: InstanceId,
    pub update: JobUpdate,
}

impl BroadcastMessage {
    pub fn new(origin: InstanceId, update: JobUpdate) -> Self {
        Self { origin, update }
    }

    pub fn is_from(&self, instance: InstanceId) -> bool {
        self.origin == instance
    }
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast transport error: {0}")]
    Transport(String),

    #[error("broadcast payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("broadcaster lock poisoned")]
    Poisoned,
}

/// Receiving half of a broadcaster subscription.
#[derive(Debug)]
pub struct BroadcastSubscription {
    receiver: mpsc::UnboundedReceiver<BroadcastMessage>,
}

impl BroadcastSubscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<BroadcastMessage>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message; `None` once the transport has closed.
    pub async fn recv(&mut self) -> Option<BroadcastMessage> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<BroadcastMessage> {
        self.receiver.try_recv().ok()
    }
}

/// Transport between instances (Redis pub/sub in production, in-memory in tests).
pub trait UpdateBroadcaster: Send + Sync {
    fn publish(&self, message: &BroadcastMessage) -> Result<(), BroadcastError>;

    fn subscribe(&self) -> Result<BroadcastSubscription, BroadcastError>;
}

impl<B> UpdateBroadcaster for Arc<B>
where
    B: UpdateBroadcaster + ?Sized,
{
    fn publish(&self, message: &BroadcastMessage) -> Result<(), BroadcastError> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Result<BroadcastSubscription, BroadcastError> {
        (**self).subscribe()
    }
}

/// Single-process broadcaster. Shared between simulated instances in tests.
#[derive(Debug, Default)]
pub struct InMemoryBroadcaster {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<BroadcastMessage>>>,
}

impl InMemoryBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UpdateBroadcaster for InMemoryBroadcaster {
    fn publish(&self, message: &BroadcastMessage) -> Result<(), BroadcastError> {
        let mut subs = self
            .subscribers
            .lock()
            .map_err(|_| BroadcastError::Poisoned)?;
        subs.retain(|tx| tx.send(message.clone()).is_ok());
        Ok(())
    }

    fn subscribe(&self) -> Result<BroadcastSubscription, BroadcastError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .map_err(|_| BroadcastError::Poisoned)?
            .push(tx);
        Ok(BroadcastSubscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use genflow_core::TenantId;
    use genflow_jobs::{Job, JobKind};

    fn message(origin: InstanceId) -> BroadcastMessage {
        let job = Job::new(TenantId::new(), JobKind::Text, "hi", Utc::now());
        BroadcastMessage::new(origin, JobUpdate::from(&job))
    }

    #[tokio::test]
    async fn every_subscriber_gets_a_copy() {
        let bus = InMemoryBroadcaster::new();
        let mut a = bus.subscribe().unwrap();
        let mut b = bus.subscribe().unwrap();

        let msg = message(InstanceId::new());
        bus.publish(&msg).unwrap();

        assert_eq!(a.recv().await, Some(msg.clone()));
        assert_eq!(b.recv().await, Some(msg));
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let bus = InMemoryBroadcaster::new();
        let gone = bus.subscribe().unwrap();
        drop(gone);
        bus.publish(&message(InstanceId::new())).unwrap();
        assert!(bus.subscribers.lock().unwrap().is_empty());
    }

    #[test]
    fn message_round_trips_through_json() {
        let origin = InstanceId::new();
        let msg = message(origin);
        let wire = serde_json::to_string(&msg).unwrap();
        let back: BroadcastMessage = serde_json::from_str(&wire).unwrap();
        assert!(back.is_from(origin));
        assert!(!back.is_from(InstanceId::new()));
        assert_eq!(back, msg);
    }
}
