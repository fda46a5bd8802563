//! Redis pub/sub transport for job updates between instances.
//!
//! Pub/sub is not durable: an instance that is offline misses updates. That is
//! acceptable here since clients re-read job state over REST on reconnect.

use std::sync::mpsc as std_mpsc;
use std::sync::{Mutex, PoisonError};
use std::thread;

use redis::Commands;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use genflow_events::{BroadcastError, BroadcastMessage, BroadcastSubscription, UpdateBroadcaster};

pub const DEFAULT_CHANNEL: &str = "genflow:job-updates";

fn transport(e: impl core::fmt::Display) -> BroadcastError {
    BroadcastError::Transport(e.to_string())
}

/// Publishing hands the payload to a background thread, so callers never wait
/// on the network.
#[derive(Debug)]
pub struct RedisPubSubBroadcaster {
    client: redis::Client,
    channel: String,
    outbox: Mutex<std_mpsc::Sender<String>>,
}

impl RedisPubSubBroadcaster {
    pub fn new(
        redis_url: impl AsRef<str>,
        channel: impl Into<String>,
    ) -> Result<Self, BroadcastError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(transport)?;
        let channel = channel.into();
        let (tx, rx) = std_mpsc::channel::<String>();

        let publisher = client.clone();
        let target = channel.clone();
        thread::Builder::new()
            .name("genflow-broadcast".into())
            .spawn(move || publish_loop(publisher, target, rx))
            .map_err(transport)?;

        Ok(Self {
            client,
            channel,
            outbox: Mutex::new(tx),
        })
    }
}

fn publish_loop(client: redis::Client, channel: String, rx: std_mpsc::Receiver<String>) {
    let mut conn: Option<redis::Connection> = None;
    for payload in rx {
        if conn.is_none() {
            conn = client
                .get_connection()
                .map_err(|e| warn!(error = %e, "redis connection for broadcast failed"))
                .ok();
        }
        let Some(c) = conn.as_mut() else {
            continue;
        };
        let sent: redis::RedisResult<i64> = c.publish(&channel, payload);
        if let Err(e) = sent {
            warn!(error = %e, "redis publish failed; reconnecting on next update");
            conn = None;
        }
    }
    debug!("broadcast publisher stopped");
}

impl UpdateBroadcaster for RedisPubSubBroadcaster {
    fn publish(&self, message: &BroadcastMessage) -> Result<(), BroadcastError> {
        let payload = serde_json::to_string(message)?;
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(payload)
            .map_err(transport)
    }

    fn subscribe(&self) -> Result<BroadcastSubscription, BroadcastError> {
        let mut conn = self.client.get_connection().map_err(transport)?;
        let channel = self.channel.clone();
        let (tx, rx) = mpsc::unbounded_channel();

        thread::Builder::new()
            .name("genflow-broadcast-sub".into())
            .spawn(move || {
                let mut pubsub = conn.as_pubsub();
                if let Err(e) = pubsub.subscribe(&channel) {
                    warn!(error = %e, channel = %channel, "redis subscribe failed");
                    return;
                }
                loop {
                    let msg = match pubsub.get_message() {
                        Ok(m) => m,
                        Err(e) => {
                            warn!(error = %e, "redis subscription closed");
                            return;
                        }
                    };
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(_) => continue,
                    };
                    let message: BroadcastMessage = match serde_json::from_str(&payload) {
                        Ok(m) => m,
                        Err(e) => {
                            debug!(error = %e, "ignoring malformed broadcast payload");
                            continue;
                        }
                    };
                    if tx.send(message).is_err() {
                        return;
                    }
                }
            })
            .map_err(transport)?;

        Ok(BroadcastSubscription::new(rx))
    }
}
