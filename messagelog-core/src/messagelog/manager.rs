//! Public entry point of the message log.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::archiver::{ArchiveSummary, LogArchiver};
use super::breaker::{BreakerStatus, FailureBreaker};
use super::cleaner::LogCleaner;
use super::config::LogConfig;
use super::maintenance::spawn_maintenance;
use super::scheduler::spawn_scheduler;
use super::store::RecordStore;
use super::task_queue::{spawn_task_queue, Control, QueueDeps, QueueState, TaskMessage};
use super::timestamper::{Timestamper, TsaStatus, TsaStatusRegistry};
use crate::archive::ArchiveWriter;
use crate::error::{LogError, Result};
use crate::record::{LogMessage, LogRecord, MessageRecord, NewMessageRecord, RecordId, TimestampProof};
use crate::tsp::{TimestampingServices, TsaClient};

const MAINTENANCE_CAPACITY: usize = 8;

/// Collaborators injected into a [`LogManager`].
pub struct LogComponents {
    pub store: Arc<dyn RecordStore>,
    pub tsa_client: Arc<dyn TsaClient>,
    pub services: Arc<dyn TimestampingServices>,
    pub archive_writer: Arc<dyn ArchiveWriter>,
}

/// Health of the message log as reported to operators.
#[derive(Debug, Clone, Serialize)]
pub struct LogStatus {
    pub timestamp_immediately: bool,
    pub breaker: BreakerStatus,
    /// Records logged but not yet timestamped.
    pub pending_tasks: u64,
    pub batch_in_flight: bool,
    pub last_archive: Option<String>,
}

/// Owns the task queue, the maintenance worker and the scheduler.
pub struct LogManager {
    config: LogConfig,
    store: Arc<dyn RecordStore>,
    services: Arc<dyn TimestampingServices>,
    breaker: Arc<FailureBreaker>,
    statuses: Arc<TsaStatusRegistry>,
    queue_state: Arc<QueueState>,
    control: mpsc::Sender<Control>,
    tasks: mpsc::Sender<TaskMessage>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl LogManager {
    /// Start the log engine. Records left untimestamped by a previous run
    /// are picked up by the next batch.
    pub async fn start(config: LogConfig, components: LogComponents) -> Result<Self> {
        let LogComponents {
            store,
            tsa_client,
            services,
            archive_writer,
        } = components;

        let pending = store.count_pending_tasks().await?;
        let breaker = Arc::new(FailureBreaker::new(
            config.acceptable_timestamp_failure_period,
            config.halt_policy,
        ));
        let statuses = Arc::new(TsaStatusRegistry::new());
        let queue_state = Arc::new(QueueState::new(pending));
        let timestamper = Arc::new(Timestamper::new(
            tsa_client,
            services.clone(),
            statuses.clone(),
        ));

        let (maintenance_tx, maintenance_rx) = mpsc::channel(MAINTENANCE_CAPACITY);
        let maintenance = spawn_maintenance(
            LogArchiver::new(
                store.clone(),
                archive_writer,
                config.hash_algorithm,
                config.archive_max_size,
            )
            .with_transfer_command(config.archive_transfer_command.clone()),
            LogCleaner::new(store.clone(), config.keep_records_for),
            maintenance_rx,
        );

        let queue = spawn_task_queue(QueueDeps {
            store: store.clone(),
            timestamper,
            breaker: breaker.clone(),
            state: queue_state.clone(),
            maintenance: maintenance_tx,
            algorithm: config.hash_algorithm,
            limit: config.timestamp_records_limit.max(1),
            retry_delay: config.timestamp_retry_delay,
        });
        let scheduler = spawn_scheduler(&config, queue.control.clone());

        info!(
            pending,
            timestamp_immediately = config.timestamp_immediately,
            algorithm = %config.hash_algorithm,
            "Message log started"
        );

        Ok(Self {
            config,
            store,
            services,
            breaker,
            statuses,
            queue_state,
            control: queue.control,
            tasks: queue.tasks,
            workers: Mutex::new(vec![queue.join, maintenance]),
            scheduler: Mutex::new(Some(scheduler)),
        })
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Save a signed message and queue it for timestamping.
    ///
    /// Returns once the record is committed. In immediate mode the call also
    /// waits for the record's timestamp and fails when timestamping fails; the
    /// record then stays queued. Otherwise the call is refused while the
    /// circuit breaker is open.
    #[instrument(skip(self, message, signature), fields(query_id = %message.query_id))]
    pub async fn log(
        &self,
        message: LogMessage,
        signature: Vec<u8>,
        store_signed_message: bool,
    ) -> Result<MessageRecord> {
        if !self.config.timestamp_immediately {
            self.breaker.check(Utc::now())?;
        }
        if self.services.urls().is_empty() {
            return Err(LogError::TimestampFailed(
                "no timestamping services configured".to_string(),
            ));
        }

        let record = NewMessageRecord::new(
            message,
            signature,
            store_signed_message,
            self.config.hash_algorithm,
            Utc::now(),
        );
        let record = self.store.save(record).await?;
        debug!(record_id = record.id, "Message record saved");

        self.tasks
            .send(TaskMessage::Saved(record.id))
            .await
            .map_err(|_| LogError::Shutdown)?;

        if self.config.timestamp_immediately {
            self.timestamp(record.id).await.map_err(|e| match e {
                LogError::TimestampFailed(_) | LogError::Shutdown => e,
                other => LogError::TimestampFailed(other.to_string()),
            })?;
        }
        Ok(record)
    }

    /// Timestamp one record now, or return its existing timestamp.
    #[instrument(skip(self))]
    pub async fn timestamp(&self, record_id: RecordId) -> Result<TimestampProof> {
        let (reply, response) = oneshot::channel();
        self.send(Control::Timestamp { record_id, reply }).await?;
        response.await.map_err(|_| LogError::Shutdown)?
    }

    /// Earliest record with `query_id` logged within `[from, to]`.
    pub async fn find_by_query_id(
        &self,
        query_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<LogRecord>> {
        self.store.find_by_query_id(query_id, from, to).await
    }

    /// Timestamp every pending record and return how many were timestamped.
    pub async fn start_timestamping(&self) -> Result<usize> {
        let (reply, response) = oneshot::channel();
        self.send(Control::StartTimestamping(Some(reply))).await?;
        response.await.map_err(|_| LogError::Shutdown)?
    }

    pub async fn start_archiving(&self) -> Result<ArchiveSummary> {
        let (reply, response) = oneshot::channel();
        self.send(Control::StartArchiving(Some(reply))).await?;
        response.await.map_err(|_| LogError::Shutdown)?
    }

    /// Delete archived records past retention and return how many were removed.
    pub async fn start_cleaning(&self) -> Result<u64> {
        let (reply, response) = oneshot::channel();
        self.send(Control::StartCleaning(Some(reply))).await?;
        response.await.map_err(|_| LogError::Shutdown)?
    }

    /// Clear a timestamping halt and its failure window.
    pub fn reset_halt(&self) {
        self.breaker.reset();
        warn!("Timestamping halt reset by operator");
    }

    pub async fn status(&self) -> Result<LogStatus> {
        let last_archive = self
            .store
            .load_digest_entry()
            .await?
            .map(|entry| entry.archive_file_name);
        Ok(LogStatus {
            timestamp_immediately: self.config.timestamp_immediately,
            breaker: self.breaker.status(Utc::now()),
            pending_tasks: self.queue_state.pending(),
            batch_in_flight: self.queue_state.in_flight(),
            last_archive,
        })
    }

    /// Per-TSA diagnostics of the most recent attempts.
    pub fn timestamping_status(&self) -> Vec<TsaStatus> {
        self.statuses.snapshot()
    }

    /// Stop the scheduler and the queue, then wait for running maintenance to finish.
    pub async fn shutdown(&self) {
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(scheduler) = scheduler {
            scheduler.abort();
        }

        let (ack, acked) = oneshot::channel();
        if self.control.send(Control::Shutdown(ack)).await.is_ok() {
            let _ = acked.await;
        }

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Message log worker ended abnormally");
            }
        }
        info!("Message log stopped");
    }

    async fn send(&self, command: Control) -> Result<()> {
        self.control.send(command).await.map_err(|_| LogError::Shutdown)
    }
}
