//! # zip-util
//!
//! Async zip utilities built on tokio:
//!
//! - [`extract`]: unpack a local archive into a directory
//! - [`fetch_and_extract`]: download an archive over HTTP and unpack it,
//!   staging the download in a temporary file that is always removed
//! - [`create_archive`]: stream a new archive built from glob-matched files
//!
//! ## Features
//!
//! - STORED and DEFLATE entries, CRC-32 verified on extraction
//! - ZIP64 central directories when reading
//! - Concurrent per-entry extraction with a bounded number of tasks
//! - Entry names that would escape the destination are rejected
//! - Archive output is a lazy [`Stream`](futures_util::Stream) of bytes
//!
//! Extraction is not transactional: if an entry fails, entries already
//! written stay on disk.
//!
//! ## Example
//!
//! ```no_run
//! use zip_util::{GlobOptions, create_archive, extract};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Pack a directory
//!     let archive = create_archive("**/*", GlobOptions::default().cwd("site"));
//!     let mut out = tokio::fs::File::create("site.zip").await?;
//!     archive.write_to(&mut out).await?;
//!
//!     // And unpack it somewhere else
//!     extract("site.zip", "/tmp/site").await?;
//!
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod glob;
pub mod io;
mod sanitize;
pub mod zip;

pub use archive::{ArchiveStream, create_archive};
pub use error::{Error, Result};
pub use extract::{ExtractOptions, Extractor, extract};
pub use fetch::{FetchOptions, Fetcher, fetch_and_extract};
pub use glob::{GlobOptions, MatchedPath, SourceSelector};
pub use io::{ByteStream, HttpConfig, HttpTransport, LocalFileReader, ReadAt, Transport};
pub use zip::{ArchiveEntry, ArchiveReader, ZipWriter};
