//! Zip extraction onto the local filesystem.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::io::{LocalFileReader, ReadAt};
use crate::sanitize::resolve_entry_path;
use crate::zip::{ArchiveEntry, ArchiveReader, FormatError, copy_entry};

/// Tuning for [`Extractor`].
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Maximum number of entries materialized at the same time.
    pub concurrency: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self { concurrency: 8 }
    }
}

/// Extracts one archive into a destination root.
///
/// Arguments are validated by [`Extractor::new`], before any I/O. Entries
/// are written concurrently and [`Extractor::run`] returns only after every
/// dispatched entry has finished. A failure does not roll back entries
/// that were already written.
#[derive(Debug, Clone)]
pub struct Extractor {
    source: PathBuf,
    destination: PathBuf,
    options: ExtractOptions,
}

impl Extractor {
    pub fn new(source: impl AsRef<Path>, destination: impl AsRef<Path>) -> Result<Self> {
        let source = source.as_ref();
        let destination = destination.as_ref();

        if source.as_os_str().is_empty() {
            return Err(Error::InvalidArgument("source path is required".into()));
        }
        if destination.as_os_str().is_empty() {
            return Err(Error::InvalidArgument("destination path is required".into()));
        }

        Ok(Self {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            options: ExtractOptions::default(),
        })
    }

    pub fn with_options(mut self, options: ExtractOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn run(self) -> Result<()> {
        let open_error = |source: FormatError| Error::ArchiveOpen {
            path: self.source.clone(),
            source,
        };

        let reader = LocalFileReader::open(&self.source).map_err(|e| open_error(e.into()))?;
        let archive = Arc::new(ArchiveReader::new(Arc::new(reader)));
        let entries = archive.entries().await.map_err(open_error)?;

        // Every entry is checked before anything touches the disk
        let plan = entries
            .into_iter()
            .map(|entry| -> Result<(ArchiveEntry, PathBuf)> {
                let target = resolve_entry_path(&self.destination, &entry.path)?;
                Ok((entry, target))
            })
            .collect::<Result<Vec<_>>>()?;

        fs::create_dir_all(&self.destination)
            .await
            .map_err(|source| Error::Destination {
                path: self.destination.clone(),
                source,
            })?;

        let total = plan.len();
        let permits = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (entry, target) in plan {
            let permit = Arc::clone(&permits)
                .acquire_owned()
                .await
                .map_err(|e| Error::entry(&entry.path, io::Error::other(e)))?;
            let archive = Arc::clone(&archive);

            tasks.spawn(async move {
                let outcome = materialize(&*archive, &entry, &target).await;
                drop(permit);
                outcome.map_err(|e| Error::entry(&entry.path, e))
            });
        }

        // Join barrier: wait for every in-flight entry, keep the first failure
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.unwrap_or_else(|e| Err(Error::Io(io::Error::other(e))));
            if let Err(e) = outcome {
                match first_error {
                    None => first_error = Some(e),
                    Some(_) => debug!(error = %e, "additional entry failure"),
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        info!(
            source = %self.source.display(),
            destination = %self.destination.display(),
            entries = total,
            "extraction complete"
        );
        Ok(())
    }
}

/// Write one entry to `target`: a directory, or a file whose parent
/// directories are created first. Existing files are overwritten.
async fn materialize<R: ReadAt>(
    archive: &ArchiveReader<R>,
    entry: &ArchiveEntry,
    target: &Path,
) -> io::Result<()> {
    if entry.is_directory {
        fs::create_dir_all(target).await?;
        debug!(entry = %entry.path, "created directory");
        return Ok(());
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut file = fs::File::create(target).await?;
    let written = copy_entry(archive, entry, &mut file).await?;
    file.flush().await?;

    debug!(entry = %entry.path, bytes = written, "extracted file");
    Ok(())
}

/// Extract the archive at `source` into `destination`.
///
/// See [`Extractor`] for the failure semantics.
pub async fn extract(source: impl AsRef<Path>, destination: impl AsRef<Path>) -> Result<()> {
    Extractor::new(source, destination)?.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_arguments_fail_before_io() {
        assert!(matches!(
            Extractor::new("", "/tmp/out"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Extractor::new("archive.zip", ""),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn missing_archive_is_an_open_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("out");

        let err = extract(dir.path().join("missing.zip"), &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ArchiveOpen { .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn destination_that_is_a_file_is_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let archive = dir.path().join("empty.zip");
        let bytes = crate::zip::ZipWriter::new(Vec::new()).finish().await.unwrap();
        std::fs::write(&archive, bytes).unwrap();
        let dest = dir.path().join("taken");
        std::fs::write(&dest, "not a directory").unwrap();

        let err = extract(&archive, &dest).await.unwrap_err();

        match err {
            Error::Destination { path, .. } => assert_eq!(path, dest),
            other => panic!("unexpected error: {other}"),
        }
    }
}
