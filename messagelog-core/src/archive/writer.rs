use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{record_entry_name, timestamp_entry_name, ArchiveContents, HASH_CHAIN_ENTRY};
use crate::error::{LogError, Result};

/// Persists archive files.
///
/// `write` must either produce the complete file or nothing; `discard` removes
/// a written archive whose records could not be marked archived.
pub trait ArchiveWriter: Send + Sync {
    fn write(&self, contents: &ArchiveContents) -> Result<PathBuf>;

    fn discard(&self, file_name: &str) -> Result<()>;
}

/// Writes zip archives into a directory, via a temporary file and a rename.
#[derive(Debug, Clone)]
pub struct ZipArchiveWriter {
    dir: PathBuf,
}

impl ZipArchiveWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_zip(path: &Path, contents: &ArchiveContents) -> Result<()> {
        let file = File::create(path)?;
        let mut zip = ZipWriter::new(file);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

        for (id, bytes) in &contents.records {
            zip.start_file(record_entry_name(*id), options)?;
            zip.write_all(bytes)?;
        }
        for (id, bytes) in &contents.timestamps {
            zip.start_file(timestamp_entry_name(*id), options)?;
            zip.write_all(bytes)?;
        }
        zip.start_file(HASH_CHAIN_ENTRY, options)?;
        zip.write_all(&contents.chain.to_cbor()?)?;

        let file = zip.finish()?;
        file.sync_all()?;
        Ok(())
    }
}

impl ArchiveWriter for ZipArchiveWriter {
    fn write(&self, contents: &ArchiveContents) -> Result<PathBuf> {
        let target = self.dir.join(&contents.file_name);
        if target.exists() {
            return Err(LogError::ArchiveFailed(format!(
                "archive {} already exists",
                target.display()
            )));
        }
        let temp = self.dir.join(format!(".{}.part", contents.file_name));

        if let Err(err) = Self::write_zip(&temp, contents) {
            if let Err(cleanup) = fs::remove_file(&temp) {
                warn!(path = %temp.display(), error = %cleanup, "Failed to remove partial archive");
            }
            return Err(LogError::ArchiveFailed(format!(
                "failed to write {}: {err}",
                contents.file_name
            )));
        }
        fs::rename(&temp, &target).map_err(|e| {
            LogError::ArchiveFailed(format!("failed to finalize {}: {e}", contents.file_name))
        })?;

        debug!(archive = %contents.file_name, records = contents.records.len(), "Archive written");
        Ok(target)
    }

    fn discard(&self, file_name: &str) -> Result<()> {
        let path = self.dir.join(file_name);
        fs::remove_file(&path)?;
        warn!(archive = file_name, "Discarded archive");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::test_support::timestamped_batch;
    use crate::archive::build_archive;
    use crate::hashchain::HashAlgorithm;
    use crate::tsp::MockTsa;

    #[test]
    fn test_write_and_discard() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ZipArchiveWriter::new(dir.path()).unwrap();
        let tsa = MockTsa::new().unwrap();
        let (records, ts) = timestamped_batch(&tsa, 1, 2);
        let contents = build_archive(HashAlgorithm::Sha256, None, &records, &[ts]).unwrap();

        let path = writer.write(&contents).unwrap();
        assert!(path.exists());
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), contents.file_name);

        // no temporary files left behind
        let names: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(names.len(), 1);

        assert!(writer.write(&contents).is_err());

        writer.discard(&contents.file_name).unwrap();
        assert!(!path.exists());
    }
}
