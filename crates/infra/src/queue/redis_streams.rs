//! Redis Streams broker: one stream per lane, one consumer group shared by
//! all workers. Unacknowledged entries stay in the group's pending list, which
//! is where at-least-once redelivery comes from.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::Commands;
use redis::streams::{StreamReadOptions, StreamReadReply};
use tokio::time::Instant;
use tracing::{instrument, warn};

use super::{Delivery, Lane, QueueError, Task, TaskQueue};

const DEFAULT_PREFIX: &str = "genflow:tasks";
const DEFAULT_GROUP: &str = "genflow-workers";
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct RedisStreamsTaskQueue {
    client: Arc<redis::Client>,
    prefix: String,
    group: String,
    consumer: String,
    max_deliveries: Option<u32>,
}

fn unavailable(e: impl core::fmt::Display) -> QueueError {
    QueueError::Unavailable(e.to_string())
}

impl RedisStreamsTaskQueue {
    pub fn new(
        redis_url: impl AsRef<str>,
        consumer: impl Into<String>,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(unavailable)?;
        Ok(Self {
            client: Arc::new(client),
            prefix: DEFAULT_PREFIX.to_string(),
            group: DEFAULT_GROUP.to_string(),
            consumer: consumer.into(),
            max_deliveries: None,
        })
    }

    pub fn with_max_deliveries(mut self, max: Option<u32>) -> Self {
        self.max_deliveries = max.filter(|m| *m > 0);
        self
    }

    fn stream_key(&self, lane: Lane) -> String {
        format!("{}:{}", self.prefix, lane.as_str())
    }

    fn dead_letter_key(&self) -> String {
        format!("{}:dlq", self.prefix)
    }

    /// Create the consumer group on every lane stream. Existing groups are left alone.
    pub fn ensure_groups(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_connection().map_err(unavailable)?;
        for lane in Lane::ALL {
            let created: redis::RedisResult<()> =
                conn.xgroup_create_mkstream(self.stream_key(lane), &self.group, "0");
            if let Err(e) = created {
                if e.code() != Some("BUSYGROUP") {
                    return Err(unavailable(e));
                }
            }
        }
        Ok(())
    }

    fn add_sync(&self, key: &str, task: &Task) -> Result<(), QueueError> {
        let body = serde_json::to_string(task).map_err(|e| QueueError::Payload(e.to_string()))?;
        let mut conn = self.client.get_connection().map_err(unavailable)?;
        let _: String = conn.xadd(key, "*", &[("task", body)]).map_err(unavailable)?;
        Ok(())
    }

    /// One non-blocking read per lane, highest priority first.
    fn read_one_sync(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.client.get_connection().map_err(unavailable)?;
        let opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1);

        for lane in Lane::ALL {
            let key = self.stream_key(lane);
            let reply: StreamReadReply = conn
                .xread_options(&[&key], &[">"], &opts)
                .map_err(unavailable)?;

            let Some(entry) = reply.keys.into_iter().flat_map(|k| k.ids).next() else {
                continue;
            };

            let receipt = format!("{}|{}", lane.as_str(), entry.id);
            let task = entry
                .get::<String>("task")
                .ok_or_else(|| QueueError::Payload(format!("entry {} has no task field", entry.id)))
                .and_then(|body| {
                    serde_json::from_str::<Task>(&body)
                        .map_err(|e| QueueError::Payload(e.to_string()))
                });

            return match task {
                Ok(task) => Ok(Some(Delivery { receipt, task })),
                Err(e) => {
                    // Unparseable entries are acknowledged and dropped.
                    warn!(receipt = %receipt, error = %e, "dropping malformed stream entry");
                    let _: redis::RedisResult<u64> = conn.xack(&key, &self.group, &[&entry.id]);
                    Err(e)
                }
            };
        }
        Ok(None)
    }

    fn ack_sync(&self, receipt: &str) -> Result<(), QueueError> {
        let (lane, id) = receipt
            .split_once('|')
            .and_then(|(lane, id)| Lane::parse(lane).map(|l| (l, id)))
            .ok_or_else(|| QueueError::UnknownDelivery(receipt.to_string()))?;
        let mut conn = self.client.get_connection().map_err(unavailable)?;
        let acked: u64 = conn
            .xack(self.stream_key(lane), &self.group, &[id])
            .map_err(unavailable)?;
        if acked == 0 {
            return Err(QueueError::UnknownDelivery(receipt.to_string()));
        }
        Ok(())
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(RedisStreamsTaskQueue) -> Result<T, QueueError> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || f(this))
            .await
            .map_err(unavailable)?
    }
}

#[async_trait]
impl TaskQueue for RedisStreamsTaskQueue {
    #[instrument(skip(self, task), fields(kind = %task.kind, lane = task.lane.as_str()), err)]
    async fn enqueue(&self, task: Task) -> Result<(), QueueError> {
        self.blocking(move |q| q.add_sync(&q.stream_key(task.lane), &task))
            .await
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(delivery) = self.blocking(|q| q.read_one_sync()).await? {
                return Ok(Some(delivery));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let receipt = delivery.receipt.clone();
        self.blocking(move |q| q.ack_sync(&receipt)).await
    }

    #[instrument(
        skip(self, delivery),
        fields(receipt = %delivery.receipt, attempt = delivery.task.attempt),
        err
    )]
    async fn requeue(&self, delivery: Delivery) -> Result<(), QueueError> {
        self.blocking(move |q| {
            let mut task = delivery.task;
            task.attempt += 1;
            let target = if q.max_deliveries.is_some_and(|max| task.attempt >= max) {
                warn!(kind = %task.kind, attempts = task.attempt, "task dead-lettered");
                q.dead_letter_key()
            } else {
                q.stream_key(task.lane)
            };
            q.add_sync(&target, &task)?;
            q.ack_sync(&delivery.receipt)
        })
        .await
    }
}
