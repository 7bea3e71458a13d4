use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use super::store::RecordStore;
use crate::error::{LogError, Result};

/// Deletes archived records once their retention period has passed.
///
/// Timestamp records and the archive chain tip are never deleted.
pub struct LogCleaner {
    store: Arc<dyn RecordStore>,
    keep_records_for: Duration,
}

impl LogCleaner {
    pub fn new(store: Arc<dyn RecordStore>, keep_records_for: Duration) -> Self {
        Self {
            store,
            keep_records_for,
        }
    }

    pub async fn clean(&self) -> Result<u64> {
        let retention = chrono::Duration::from_std(self.keep_records_for)
            .map_err(|e| LogError::StoreFailed(format!("retention period out of range: {e}")))?;
        let cutoff = Utc::now() - retention;

        let removed = self.store.delete_archived_before(cutoff).await?;
        if removed > 0 {
            info!(removed, cutoff = %cutoff, "Removed archived records");
        } else {
            debug!(cutoff = %cutoff, "No archived records past retention");
        }
        Ok(removed)
    }
}
