//! ZIP archive reading and writing.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Locates the central directory and turns it into [`ArchiveEntry`] records
//! - [`decoder`]: Streams one entry's decompressed content into an async writer
//! - [`writer`]: Streams entries out as a new archive
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Reading starts from the EOCD at the end of the file, so entries are known
//! up front and each one can be decoded independently of the others.
//! Writing goes the other way: entry data is streamed with a trailing data
//! descriptor, and the central directory is emitted once all entries are done.
//!
//! ## Supported Features
//!
//! - ZIP64 central directories when reading
//! - STORED and DEFLATE compression methods, with CRC-32 verification
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - Written archives are limited to 4 GiB (no ZIP64 output)

use std::io;

mod decoder;
mod parser;
mod structures;
mod writer;

pub use decoder::copy_entry;
pub use parser::ArchiveReader;
pub use structures::*;
pub use writer::{WriteError, ZipWriter};

/// Errors raised while decoding or encoding the ZIP format.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("not a valid ZIP file")]
    NotZip,

    #[error("invalid {0}")]
    InvalidHeader(&'static str),

    #[error("unsupported {0}")]
    Unsupported(String),

    #[error("{0} exceeds the 4 GiB limit of non-ZIP64 archives")]
    TooLarge(&'static str),

    #[error("CRC-32 mismatch: expected {expected:08x}, got {actual:08x}")]
    Checksum { expected: u32, actual: u32 },

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    Size { expected: u64, actual: u64 },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<FormatError> for io::Error {
    fn from(err: FormatError) -> Self {
        match err {
            FormatError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
