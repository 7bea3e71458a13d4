//! Serial worker for archiving and cleaning.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::archiver::{ArchiveSummary, LogArchiver};
use super::cleaner::LogCleaner;
use crate::error::Result;

pub(crate) enum MaintenanceJob {
    Archive(Option<oneshot::Sender<Result<ArchiveSummary>>>),
    Clean(Option<oneshot::Sender<Result<u64>>>),
}

/// Runs one job at a time, so archiving and cleaning never overlap.
pub(crate) fn spawn_maintenance(
    archiver: LogArchiver,
    cleaner: LogCleaner,
    mut jobs: mpsc::Receiver<MaintenanceJob>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job) = jobs.recv().await {
            match job {
                MaintenanceJob::Archive(reply) => {
                    let result = archiver.archive().await;
                    if let Err(e) = &result {
                        error!(error = %e, "Archiving failed");
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                MaintenanceJob::Clean(reply) => {
                    let result = cleaner.clean().await;
                    if let Err(e) = &result {
                        error!(error = %e, "Cleaning failed");
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
            }
        }
        debug!("Maintenance worker stopped");
    })
}
