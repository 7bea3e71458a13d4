//! The single consumer that owns timestamping state.
//!
//! Three channels feed the queue and are drained in strict priority order:
//! control commands, then timestamp results, then notifications of newly
//! saved records. At most one TSA round trip is in flight at any time; the
//! round trip itself runs on a spawned task so control commands keep being
//! served while it is pending. A failed batch is retried once the retry delay
//! has passed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::archiver::ArchiveSummary;
use super::breaker::FailureBreaker;
use super::maintenance::MaintenanceJob;
use super::store::{RecordStore, Task};
use super::timestamper::{TimestampSucceeded, Timestamper};
use crate::error::{LogError, Result};
use crate::hashchain::HashAlgorithm;
use crate::record::{RecordId, TimestampProof, TimestampRecord};

const CONTROL_CAPACITY: usize = 64;
const RESULT_CAPACITY: usize = 4;
const TASK_CAPACITY: usize = 1024;

pub(crate) enum Control {
    /// Timestamp everything pending; the reply carries the number of records
    /// timestamped before the queue went idle.
    StartTimestamping(Option<oneshot::Sender<Result<usize>>>),
    /// Sent by the queue to itself once the retry delay after a failed batch passes.
    RetryTimestamping,
    StartArchiving(Option<oneshot::Sender<Result<ArchiveSummary>>>),
    StartCleaning(Option<oneshot::Sender<Result<u64>>>),
    Timestamp {
        record_id: RecordId,
        reply: oneshot::Sender<Result<TimestampProof>>,
    },
    Shutdown(oneshot::Sender<()>),
}

pub(crate) enum TaskMessage {
    Saved(RecordId),
}

enum TimestampOutcome {
    Batch {
        record_ids: Vec<RecordId>,
        result: Result<TimestampSucceeded>,
    },
    Single {
        record_id: RecordId,
        result: Result<TimestampSucceeded>,
        reply: oneshot::Sender<Result<TimestampProof>>,
    },
}

/// Counters the queue publishes for status readers.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    pending: AtomicI64,
    in_flight: AtomicBool,
}

impl QueueState {
    pub(crate) fn new(pending: u64) -> Self {
        Self {
            pending: AtomicI64::new(pending as i64),
            in_flight: AtomicBool::new(false),
        }
    }

    pub(crate) fn pending(&self) -> u64 {
        self.pending.load(Ordering::SeqCst).max(0) as u64
    }

    pub(crate) fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }
}

pub(crate) struct QueueDeps {
    pub store: Arc<dyn RecordStore>,
    pub timestamper: Arc<Timestamper>,
    pub breaker: Arc<FailureBreaker>,
    pub state: Arc<QueueState>,
    pub maintenance: mpsc::Sender<MaintenanceJob>,
    pub algorithm: HashAlgorithm,
    pub limit: usize,
    pub retry_delay: Duration,
}

pub(crate) struct QueueHandle {
    pub control: mpsc::Sender<Control>,
    pub tasks: mpsc::Sender<TaskMessage>,
    pub join: JoinHandle<()>,
}

struct TaskQueue {
    deps: QueueDeps,
    control_rx: mpsc::Receiver<Control>,
    results_rx: mpsc::Receiver<TimestampOutcome>,
    results_tx: mpsc::Sender<TimestampOutcome>,
    tasks_rx: mpsc::Receiver<TaskMessage>,
    control_tx: mpsc::WeakSender<Control>,
    in_flight: bool,
    rerun: bool,
    retry_scheduled: bool,
    forced: VecDeque<(RecordId, oneshot::Sender<Result<TimestampProof>>)>,
    waiters: Vec<oneshot::Sender<Result<usize>>>,
    run_count: usize,
    run_error: Option<String>,
}

pub(crate) fn spawn_task_queue(deps: QueueDeps) -> QueueHandle {
    let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
    let (results_tx, results_rx) = mpsc::channel(RESULT_CAPACITY);
    let (tasks_tx, tasks_rx) = mpsc::channel(TASK_CAPACITY);

    let queue = TaskQueue {
        deps,
        control_rx,
        results_rx,
        results_tx,
        tasks_rx,
        control_tx: control_tx.downgrade(),
        in_flight: false,
        rerun: false,
        retry_scheduled: false,
        forced: VecDeque::new(),
        waiters: Vec::new(),
        run_count: 0,
        run_error: None,
    };
    QueueHandle {
        control: control_tx,
        tasks: tasks_tx,
        join: tokio::spawn(queue.run()),
    }
}

impl TaskQueue {
    async fn run(mut self) {
        let mut shutdown_ack = None;
        loop {
            tokio::select! {
                biased;
                command = self.control_rx.recv() => match command {
                    Some(Control::Shutdown(ack)) => {
                        shutdown_ack = Some(ack);
                        break;
                    }
                    Some(command) => self.handle_control(command).await,
                    None => break,
                },
                Some(outcome) = self.results_rx.recv() => self.handle_outcome(outcome).await,
                Some(message) = self.tasks_rx.recv() => self.handle_task(message),
            }
        }

        // Dropping pending replies reports `Shutdown` to their callers.
        self.forced.clear();
        self.waiters.clear();
        debug!("Task queue stopped");
        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
    }

    async fn handle_control(&mut self, command: Control) {
        match command {
            Control::StartTimestamping(reply) => {
                self.waiters.extend(reply);
                self.rerun = true;
                self.schedule_next().await;
            }
            Control::RetryTimestamping => {
                self.retry_scheduled = false;
                debug!("Retrying timestamping after failure");
                self.rerun = true;
                self.schedule_next().await;
            }
            Control::StartArchiving(reply) => self.dispatch(MaintenanceJob::Archive(reply)),
            Control::StartCleaning(reply) => self.dispatch(MaintenanceJob::Clean(reply)),
            Control::Timestamp { record_id, reply } => {
                self.forced.push_back((record_id, reply));
                self.schedule_next().await;
            }
            Control::Shutdown(_) => {}
        }
    }

    fn handle_task(&mut self, message: TaskMessage) {
        match message {
            TaskMessage::Saved(record_id) => {
                let pending = self.deps.state.pending.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(record_id, pending, "Record queued for timestamping");
            }
        }
    }

    async fn handle_outcome(&mut self, outcome: TimestampOutcome) {
        self.set_in_flight(false);
        match outcome {
            TimestampOutcome::Batch { record_ids, result } => {
                let batch_size = record_ids.len();
                match self.attach(result).await {
                    Ok(timestamp) => {
                        self.deps
                            .state
                            .pending
                            .fetch_sub(batch_size as i64, Ordering::SeqCst);
                        self.run_count += batch_size;
                        self.run_error = None;
                        if batch_size >= self.deps.limit {
                            self.rerun = true;
                        }
                        info!(
                            timestamp_record_id = timestamp.id,
                            batch_size, "Timestamp attached to batch"
                        );
                    }
                    Err(e) => {
                        error!(batch_size, error = %e, "Timestamping batch failed");
                        self.run_error = Some(failure_message(&e));
                        self.schedule_retry();
                    }
                }
            }
            TimestampOutcome::Single {
                record_id,
                result,
                reply,
            } => {
                let proof = result
                    .as_ref()
                    .ok()
                    .and_then(|s| s.proofs.first().map(|(_, p)| p.clone()));
                let result = self.attach(result).await.and_then(|timestamp_record| {
                    let hash_chain = proof.ok_or_else(|| {
                        LogError::TimestampFailed("timestamp carries no proof".to_string())
                    })?;
                    Ok(TimestampProof {
                        record_id,
                        timestamp_record,
                        hash_chain,
                    })
                });
                match &result {
                    Ok(proof) => {
                        self.deps.state.pending.fetch_sub(1, Ordering::SeqCst);
                        info!(
                            record_id,
                            timestamp_record_id = proof.timestamp_record.id,
                            "Record timestamped"
                        );
                    }
                    Err(e) => warn!(record_id, error = %e, "Forced timestamping failed"),
                }
                let _ = reply.send(result);
            }
        }
        self.schedule_next().await;
    }

    /// Start the next round trip unless one is in flight.
    ///
    /// Forced single-record requests go first, then a pending batch run. When
    /// nothing is left the waiters of the run are answered.
    async fn schedule_next(&mut self) {
        while !self.in_flight {
            if let Some((record_id, reply)) = self.forced.pop_front() {
                self.start_forced(record_id, reply).await;
                continue;
            }
            if std::mem::take(&mut self.rerun) {
                self.start_batch().await;
                continue;
            }
            self.finish_run();
            break;
        }
    }

    async fn start_batch(&mut self) {
        let tasks = match self.deps.store.pending_tasks(self.deps.limit).await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "Failed to load timestamping tasks");
                self.run_error = Some(failure_message(&e));
                self.schedule_retry();
                return;
            }
        };
        if tasks.is_empty() {
            debug!("No records waiting for a timestamp");
            return;
        }

        let record_ids: Vec<RecordId> = tasks.iter().map(|t| t.record_id).collect();
        debug!(batch_size = tasks.len(), "Starting timestamping batch");
        self.spawn_round_trip(tasks, move |result| TimestampOutcome::Batch {
            record_ids,
            result,
        });
    }

    async fn start_forced(
        &mut self,
        record_id: RecordId,
        reply: oneshot::Sender<Result<TimestampProof>>,
    ) {
        let record = match self.deps.store.get(record_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                let _ = reply.send(Err(LogError::RecordNotFound(record_id)));
                return;
            }
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        if let (Some(timestamp_id), Some(hash_chain)) =
            (record.timestamp_record_id, record.hash_chain.clone())
        {
            debug!(record_id, timestamp_id, "Record already timestamped");
            let result = self
                .load_timestamp(record_id, timestamp_id)
                .await
                .map(|timestamp_record| TimestampProof {
                    record_id,
                    timestamp_record,
                    hash_chain,
                });
            let _ = reply.send(result);
            return;
        }

        let task = Task {
            record_id,
            signature_hash: record.signature_hash,
            created_at: record.time,
        };
        self.spawn_round_trip(vec![task], move |result| TimestampOutcome::Single {
            record_id,
            result,
            reply,
        });
    }

    /// Queue one batch run after the retry delay; a zero delay disables retries.
    fn schedule_retry(&mut self) {
        let delay = self.deps.retry_delay;
        if delay.is_zero() || self.retry_scheduled {
            return;
        }
        self.retry_scheduled = true;
        info!(retry_in_ms = delay.as_millis() as u64, "Timestamping retry scheduled");

        let control = self.control_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(control) = control.upgrade() {
                let _ = control.send(Control::RetryTimestamping).await;
            }
        });
    }

    fn spawn_round_trip<F>(&mut self, tasks: Vec<Task>, wrap: F)
    where
        F: FnOnce(Result<TimestampSucceeded>) -> TimestampOutcome + Send + 'static,
    {
        self.set_in_flight(true);
        let timestamper = self.deps.timestamper.clone();
        let results = self.results_tx.clone();
        let algorithm = self.deps.algorithm;
        tokio::spawn(async move {
            let result = timestamper.timestamp(algorithm, &tasks).await;
            if results.send(wrap(result)).await.is_err() {
                debug!("Task queue stopped before the timestamp result arrived");
            }
        });
    }

    /// Store a round trip's result and feed the outcome to the breaker.
    async fn attach(&self, result: Result<TimestampSucceeded>) -> Result<TimestampRecord> {
        let stored = match result {
            Ok(succeeded) => {
                self.deps
                    .store
                    .attach_timestamp(succeeded.timestamp, succeeded.proofs)
                    .await
            }
            Err(e) => Err(e),
        };
        match &stored {
            Ok(_) => self.deps.breaker.record_success(),
            Err(_) => self.deps.breaker.record_failure(Utc::now()),
        }
        stored
    }

    async fn load_timestamp(
        &self,
        record_id: RecordId,
        timestamp_id: RecordId,
    ) -> Result<TimestampRecord> {
        self.deps
            .store
            .get_timestamp(timestamp_id)
            .await?
            .ok_or_else(|| {
                LogError::StoreFailed(format!(
                    "timestamp record {timestamp_id} of record {record_id} is missing"
                ))
            })
    }

    fn finish_run(&mut self) {
        let count = std::mem::take(&mut self.run_count);
        let error = self.run_error.take();
        for waiter in self.waiters.drain(..) {
            let result = match &error {
                Some(message) => Err(LogError::TimestampFailed(message.clone())),
                None => Ok(count),
            };
            let _ = waiter.send(result);
        }
    }

    fn dispatch(&self, job: MaintenanceJob) {
        let Err(e) = self.deps.maintenance.try_send(job) else {
            return;
        };
        let (job, reason) = match e {
            TrySendError::Full(job) => (job, "maintenance backlog is full"),
            TrySendError::Closed(job) => (job, "maintenance worker stopped"),
        };
        warn!(reason, "Maintenance job rejected");
        match job {
            MaintenanceJob::Archive(Some(reply)) => {
                let _ = reply.send(Err(LogError::ArchiveFailed(reason.to_string())));
            }
            MaintenanceJob::Clean(Some(reply)) => {
                let _ = reply.send(Err(LogError::StoreFailed(reason.to_string())));
            }
            _ => {}
        }
    }

    fn set_in_flight(&mut self, in_flight: bool) {
        self.in_flight = in_flight;
        self.deps.state.in_flight.store(in_flight, Ordering::SeqCst);
    }
}

fn failure_message(error: &LogError) -> String {
    match error {
        LogError::TimestampFailed(message) => message.clone(),
        other => other.to_string(),
    }
}
