//! Moves timestamped records into chained archive files.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, error, info, instrument};

use super::store::RecordStore;
use crate::archive::{build_archive, encoded_record_size, ArchiveWriter};
use crate::error::{LogError, Result};
use crate::hashchain::HashAlgorithm;
use crate::record::{MessageRecord, RecordId, TimestampRecord};

/// Records loaded from the store per archiving round.
const FETCH_LIMIT: usize = 10_000;

/// Outcome of one archiving pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
    /// Archive files written, in chain order.
    pub archives: Vec<String>,
    pub records: usize,
    /// Why the archive transfer command failed, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_error: Option<String>,
}

pub struct LogArchiver {
    store: Arc<dyn RecordStore>,
    writer: Arc<dyn ArchiveWriter>,
    algorithm: HashAlgorithm,
    max_size: usize,
    transfer_command: Option<String>,
}

impl LogArchiver {
    pub fn new(
        store: Arc<dyn RecordStore>,
        writer: Arc<dyn ArchiveWriter>,
        algorithm: HashAlgorithm,
        max_size: usize,
    ) -> Self {
        Self {
            store,
            writer,
            algorithm,
            max_size,
            transfer_command: None,
        }
    }

    /// Run `command` through `sh -c` after every pass that wrote archives.
    pub fn with_transfer_command(mut self, command: Option<String>) -> Self {
        self.transfer_command = command;
        self
    }

    /// Archive every timestamped, unarchived record.
    ///
    /// Each group is written first and only then marked archived together with
    /// the new chain tip. A failing group stops the pass; groups completed
    /// before it stay archived.
    ///
    /// The transfer command runs whenever at least one archive was written,
    /// even if a later group failed. Its failure does not fail the pass.
    #[instrument(skip(self))]
    pub async fn archive(&self) -> Result<ArchiveSummary> {
        let mut summary = ArchiveSummary::default();
        let outcome = self.archive_groups(&mut summary).await;

        if summary.records == 0 {
            debug!("Nothing to archive");
            return outcome.map(|()| summary);
        }
        if let Some(command) = &self.transfer_command {
            if let Err(e) = run_transfer_command(command).await {
                error!(command = %command, error = %e, "Archive transfer failed");
                summary.transfer_error = Some(e);
            }
        }
        info!(
            archives = summary.archives.len(),
            records = summary.records,
            "Archiving pass finished"
        );
        outcome.map(|()| summary)
    }

    async fn archive_groups(&self, summary: &mut ArchiveSummary) -> Result<()> {
        loop {
            let records = self.store.archivable_records(FETCH_LIMIT).await?;
            if records.is_empty() {
                return Ok(());
            }
            let group = &records[..group_len(&records, self.max_size)];
            let file_name = self.archive_group(group).await?;
            summary.records += group.len();
            summary.archives.push(file_name);
        }
    }

    async fn archive_group(&self, group: &[MessageRecord]) -> Result<String> {
        let timestamps = self.load_timestamps(group).await?;
        let previous = self.store.load_digest_entry().await?;
        let contents = build_archive(self.algorithm, previous.as_ref(), group, &timestamps)?;
        let digest = contents.digest_entry();
        let ids = contents.record_ids();

        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || writer.write(&contents))
            .await
            .map_err(|e| LogError::ArchiveFailed(format!("archive writer panicked: {e}")))??;

        if let Err(e) = self.store.mark_archived(&ids, digest.clone()).await {
            error!(archive = %digest.archive_file_name, error = %e, "Failed to mark records archived");
            if let Err(discard) = self.writer.discard(&digest.archive_file_name) {
                error!(archive = %digest.archive_file_name, error = %discard, "Failed to discard archive");
            }
            return Err(LogError::ArchiveFailed(format!(
                "records of {} could not be marked archived: {e}",
                digest.archive_file_name
            )));
        }

        info!(
            archive = %digest.archive_file_name,
            records = ids.len(),
            digest = %hex::encode(&digest.digest),
            "Archive written"
        );
        Ok(digest.archive_file_name)
    }

    async fn load_timestamps(&self, group: &[MessageRecord]) -> Result<Vec<TimestampRecord>> {
        let ids: BTreeSet<RecordId> = group.iter().filter_map(|r| r.timestamp_record_id).collect();
        let mut timestamps = Vec::with_capacity(ids.len());
        for id in ids {
            let timestamp = self.store.get_timestamp(id).await?.ok_or_else(|| {
                LogError::ArchiveFailed(format!("timestamp record {id} is missing"))
            })?;
            timestamps.push(timestamp);
        }
        Ok(timestamps)
    }
}

async fn run_transfer_command(command: &str) -> std::result::Result<(), String> {
    info!(command = %command, "Transferring archives");
    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .status()
        .await
        .map_err(|e| format!("could not run '{command}': {e}"))?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("'{command}' exited with {status}"))
    }
}

/// Number of leading records that fit into one archive of `max_size` bytes.
///
/// A record larger than the limit still gets an archive of its own.
fn group_len(records: &[MessageRecord], max_size: usize) -> usize {
    let mut total = 0usize;
    let mut len = 0;
    for record in records {
        let size = encoded_record_size(record);
        if len > 0 && total + size > max_size {
            break;
        }
        total += size;
        len += 1;
    }
    len
}
