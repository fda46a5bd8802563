use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{Delivery, Lane, QueueError, Task, TaskQueue};

#[derive(Debug, Default)]
struct State {
    critical: VecDeque<Task>,
    default: VecDeque<Task>,
    low: VecDeque<Task>,
    in_flight: HashMap<String, Task>,
    dead: VecDeque<Task>,
}

/// Dead letters kept for inspection; the oldest is dropped past this.
pub const DEAD_LETTER_CAP: usize = 1024;

impl State {
    fn lane(&mut self, lane: Lane) -> &mut VecDeque<Task> {
        match lane {
            Lane::Critical => &mut self.critical,
            Lane::Default => &mut self.default,
            Lane::Low => &mut self.low,
        }
    }

    fn pop(&mut self) -> Option<Task> {
        Lane::ALL.into_iter().find_map(|lane| self.lane(lane).pop_front())
    }
}

/// Process-local broker with strict lane priority.
///
/// No durability: tasks live only as long as the process. A delivery that is
/// never acked or requeued stays in flight; there is no visibility timeout
/// that hands it to another consumer. The Redis broker keeps such entries in
/// the consumer group's pending list instead.
#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    state: Mutex<State>,
    notify: Notify,
    max_deliveries: Option<u32>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dead-letter a task once it has been delivered `max` times.
    pub fn with_max_deliveries(mut self, max: Option<u32>) -> Self {
        self.max_deliveries = max.filter(|m| *m > 0);
        self
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::Unavailable("queue lock poisoned".into()))
    }

    fn try_pop(&self) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.state()?;
        Ok(state.pop().map(|task| {
            let receipt = Uuid::now_v7().to_string();
            state.in_flight.insert(receipt.clone(), task.clone());
            Delivery { receipt, task }
        }))
    }

    pub fn pending(&self, lane: Lane) -> usize {
        self.state().map(|mut s| s.lane(lane).len()).unwrap_or(0)
    }

    pub fn in_flight(&self) -> usize {
        self.state().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    pub fn dead_letters(&self) -> Vec<Task> {
        self.state()
            .map(|s| s.dead.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    #[instrument(skip(self, task), fields(kind = %task.kind, lane = task.lane.as_str()), err)]
    async fn enqueue(&self, task: Task) -> Result<(), QueueError> {
        let lane = task.lane;
        self.state()?.lane(lane).push_back(task);
        self.notify.notify_one();
        debug!("task enqueued");
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            if let Some(delivery) = self.try_pop()? {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.state()?
            .in_flight
            .remove(&delivery.receipt)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.receipt.clone()))
    }

    #[instrument(
        skip(self, delivery),
        fields(receipt = %delivery.receipt, attempt = delivery.task.attempt),
        err
    )]
    async fn requeue(&self, delivery: Delivery) -> Result<(), QueueError> {
        let mut state = self.state()?;
        let mut task = state
            .in_flight
            .remove(&delivery.receipt)
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.receipt.clone()))?;
        task.attempt += 1;

        if self.max_deliveries.is_some_and(|max| task.attempt >= max) {
            warn!(kind = %task.kind, attempts = task.attempt, "task dead-lettered");
            if state.dead.len() >= DEAD_LETTER_CAP {
                state.dead.pop_front();
            }
            state.dead.push_back(task);
            return Ok(());
        }

        let lane = task.lane;
        state.lane(lane).push_back(task);
        drop(state);
        self.notify.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ExecuteJobPayload;
    use genflow_core::JobId;
    use std::sync::Arc;

    const NO_WAIT: Duration = Duration::from_millis(0);

    #[tokio::test]
    async fn lanes_are_strictly_prioritised() {
        let q = InMemoryTaskQueue::new();
        let low = Task::execute_job(JobId::new(), Lane::Low);
        let default = Task::execute_job(JobId::new(), Lane::Default);
        let critical = Task::execute_job(JobId::new(), Lane::Critical);
        q.enqueue(low.clone()).await.unwrap();
        q.enqueue(default.clone()).await.unwrap();
        q.enqueue(critical.clone()).await.unwrap();

        let order: Vec<Task> = [
            q.dequeue(NO_WAIT).await.unwrap().unwrap().task,
            q.dequeue(NO_WAIT).await.unwrap().unwrap().task,
            q.dequeue(NO_WAIT).await.unwrap().unwrap().task,
        ]
        .into();
        assert_eq!(order, vec![critical, default, low]);
        assert!(q.dequeue(NO_WAIT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dequeue_waits_for_enqueue() {
        let q = Arc::new(InMemoryTaskQueue::new());
        let consumer = {
            let q = q.clone();
            tokio::spawn(async move { q.dequeue(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        q.enqueue(Task::execute_job(JobId::new(), Lane::Default)).await.unwrap();

        let delivery = consumer.await.unwrap().unwrap();
        assert!(delivery.is_some());
    }

    #[tokio::test]
    async fn ack_removes_in_flight_delivery_once() {
        let q = InMemoryTaskQueue::new();
        q.enqueue(Task::execute_job(JobId::new(), Lane::Default)).await.unwrap();
        let d = q.dequeue(NO_WAIT).await.unwrap().unwrap();
        assert_eq!(q.in_flight(), 1);

        q.ack(&d).await.unwrap();
        assert_eq!(q.in_flight(), 0);
        assert!(matches!(q.ack(&d).await, Err(QueueError::UnknownDelivery(_))));
    }

    #[tokio::test]
    async fn requeue_redelivers_with_attempt_count() {
        let q = InMemoryTaskQueue::new();
        q.enqueue(Task::execute_job(JobId::new(), Lane::Low)).await.unwrap();
        let d = q.dequeue(NO_WAIT).await.unwrap().unwrap();
        q.requeue(d).await.unwrap();

        let again = q.dequeue(NO_WAIT).await.unwrap().unwrap();
        assert_eq!(again.task.attempt, 1);
        assert!(q.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn delivery_cap_dead_letters() {
        let q = InMemoryTaskQueue::new().with_max_deliveries(Some(2));
        q.enqueue(Task::execute_job(JobId::new(), Lane::Default)).await.unwrap();

        let d = q.dequeue(NO_WAIT).await.unwrap().unwrap();
        q.requeue(d).await.unwrap();
        let d = q.dequeue(NO_WAIT).await.unwrap().unwrap();
        q.requeue(d).await.unwrap();

        assert!(q.dequeue(NO_WAIT).await.unwrap().is_none());
        assert_eq!(q.dead_letters().len(), 1);
        assert_eq!(q.dead_letters()[0].attempt, 2);
    }

    #[tokio::test]
    async fn dead_letters_drop_the_oldest_past_the_cap() {
        let q = InMemoryTaskQueue::new().with_max_deliveries(Some(1));
        let first = JobId::new();
        q.enqueue(Task::execute_job(first, Lane::Default)).await.unwrap();
        for _ in 0..DEAD_LETTER_CAP {
            q.enqueue(Task::execute_job(JobId::new(), Lane::Default)).await.unwrap();
        }
        while let Some(d) = q.dequeue(NO_WAIT).await.unwrap() {
            q.requeue(d).await.unwrap();
        }

        let dead = q.dead_letters();
        assert_eq!(dead.len(), DEAD_LETTER_CAP);
        let oldest = ExecuteJobPayload::parse(&dead[0]).unwrap().job_id;
        assert_ne!(oldest, first);
        assert_eq!(q.in_flight(), 0);
    }
}
