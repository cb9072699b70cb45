use std::io;
use std::path::PathBuf;

use crate::zip::FormatError;

/// Boxed error returned by a [`Transport`](crate::io::Transport).
pub type TransportError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by extraction, download, and archive creation.
///
/// Extraction does not roll back: when an operation fails with [`Error::Entry`],
/// entries that were already written stay on disk and cleaning them up is the
/// caller's job.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required argument was missing or malformed. Raised before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("cannot open archive '{path}': {source}")]
    ArchiveOpen {
        path: PathBuf,
        #[source]
        source: FormatError,
    },

    #[error("failed to extract entry '{entry}': {source}")]
    Entry {
        entry: String,
        #[source]
        source: io::Error,
    },

    /// The destination root could not be created.
    #[error("cannot create destination '{path}': {source}")]
    Destination {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("entry '{entry}' escapes the destination root (resolves to '{resolved}')")]
    PathEscape { entry: String, resolved: PathBuf },

    #[error("download of '{url}' failed: {source}")]
    Download {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to read '{path}' while building archive: {source}")]
    Stream {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot allocate staging file: {0}")]
    Staging(#[source] io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn entry(entry: &str, source: io::Error) -> Self {
        Self::Entry {
            entry: entry.to_string(),
            source,
        }
    }

    pub(crate) fn download(url: &str, source: impl Into<TransportError>) -> Self {
        Self::Download {
            url: url.to_string(),
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
