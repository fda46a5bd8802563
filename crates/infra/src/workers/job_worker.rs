use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::execution::{ExecutionError, ExecutionOutcome, ExecutionService};
use crate::queue::{Delivery, ExecuteJobPayload, QueueError, TaskQueue};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub name: String,
    pub concurrency: usize,
    pub poll_wait: Duration,
    /// Provider used when neither the job nor its tenant names one.
    pub default_provider: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "genflow-worker".to_string(),
            concurrency: 4,
            poll_wait: Duration::from_secs(1),
            default_provider: None,
        }
    }
}

impl WorkerConfig {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_wait(mut self, wait: Duration) -> Self {
        self.poll_wait = wait;
        self
    }

    pub fn with_default_provider(mut self, provider: Option<String>) -> Self {
        self.default_provider = provider;
        self
    }
}

/// How a single delivery was settled with the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The job reached (or already was in) a terminal state.
    Completed,
    /// Another delivery owns the job.
    Skipped,
    /// Acknowledged without running; retrying cannot help.
    PermanentFailure(String),
    /// Handed back to the broker.
    Retry(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub completed: u64,
    pub skipped: u64,
    pub permanent_failures: u64,
    pub retries: u64,
    pub queue_errors: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Completed => self.completed += 1,
            TaskOutcome::Skipped => self.skipped += 1,
            TaskOutcome::PermanentFailure(_) => self.permanent_failures += 1,
            TaskOutcome::Retry(_) => self.retries += 1,
        }
    }
}

/// Handle to control and join the worker loops.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinSet<()>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    pub fn stats(&self) -> WorkerStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop taking new deliveries and wait for in-flight ones to settle.
    pub async fn shutdown(mut self) -> WorkerStats {
        let _ = self.shutdown.send(true);
        while let Some(joined) = self.join.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker loop panicked");
            }
        }
        self.stats()
    }
}

/// Pulls `job.execute` tasks and runs them through the execution service.
#[derive(Clone)]
pub struct Worker {
    queue: Arc<dyn TaskQueue>,
    execution: Arc<ExecutionService>,
    default_provider: Option<String>,
}

impl Worker {
    pub fn new(queue: Arc<dyn TaskQueue>, execution: Arc<ExecutionService>) -> Self {
        Self {
            queue,
            execution,
            default_provider: None,
        }
    }

    pub fn with_default_provider(mut self, provider: Option<String>) -> Self {
        self.default_provider = provider;
        self
    }

    /// Run one delivery and settle it with the broker.
    pub async fn process(&self, delivery: Delivery) -> TaskOutcome {
        let outcome = self.run(&delivery).await;

        let settled = match &outcome {
            TaskOutcome::Retry(_) => self.queue.requeue(delivery.clone()).await,
            _ => self.queue.ack(&delivery).await,
        };
        if let Err(e) = settled {
            warn!(receipt = %delivery.receipt, error = %e, "failed to settle delivery");
        }
        outcome
    }

    async fn run(&self, delivery: &Delivery) -> TaskOutcome {
        let payload = match ExecuteJobPayload::parse(&delivery.task) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(receipt = %delivery.receipt, error = %e, "dropping undecodable task");
                return TaskOutcome::PermanentFailure(e.to_string());
            }
        };

        match self
            .execution
            .execute_job(payload.job_id, self.default_provider.as_deref())
            .await
        {
            Ok(ExecutionOutcome::Completed(_))
            | Ok(ExecutionOutcome::Failed(_))
            | Ok(ExecutionOutcome::AlreadyTerminal(_)) => TaskOutcome::Completed,
            Ok(ExecutionOutcome::Skipped) => TaskOutcome::Skipped,
            Err(ExecutionError::JobNotFound(id)) => {
                warn!(job_id = %id, "task references unknown job");
                TaskOutcome::PermanentFailure(format!("job not found: {id}"))
            }
            Err(e @ (ExecutionError::Validation(_) | ExecutionError::Transition(_))) => {
                TaskOutcome::PermanentFailure(e.to_string())
            }
            Err(e) => TaskOutcome::Retry(e.to_string()),
        }
    }

    /// Spawn `config.concurrency` loops on the current runtime.
    pub fn spawn(self, config: WorkerConfig) -> WorkerHandle {
        let worker = if config.default_provider.is_some() {
            self.with_default_provider(config.default_provider.clone())
        } else {
            self
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let mut join = JoinSet::new();

        for slot in 0..config.concurrency.max(1) {
            let worker = worker.clone();
            let stats = stats.clone();
            let shutdown = shutdown_rx.clone();
            let name = format!("{}-{slot}", config.name);
            let wait = config.poll_wait;
            join.spawn(async move { worker.run_loop(name, wait, shutdown, stats).await });
        }

        info!(worker = %config.name, concurrency = config.concurrency, "worker started");
        WorkerHandle {
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }

    async fn run_loop(
        self,
        name: String,
        wait: Duration,
        mut shutdown: watch::Receiver<bool>,
        stats: Arc<Mutex<WorkerStats>>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                _ = shutdown.changed() => break,
                next = self.queue.dequeue(wait) => next,
            };

            let outcome = match next {
                Ok(Some(delivery)) => self.process(delivery).await,
                Ok(None) => continue,
                Err(e) => {
                    stats.lock().unwrap_or_else(PoisonError::into_inner).queue_errors += 1;
                    queue_backoff(&name, &e).await;
                    continue;
                }
            };

            debug!(worker = %name, outcome = ?outcome, "delivery settled");
            stats
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record(&outcome);
        }
        debug!(worker = %name, "worker loop stopped");
    }
}

async fn queue_backoff(name: &str, err: &QueueError) {
    warn!(worker = %name, error = %err, "dequeue failed; backing off");
    tokio::time::sleep(Duration::from_millis(500)).await;
}
