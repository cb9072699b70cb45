use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc};
use std::io::{self, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::FormatError;
use super::structures::*;

/// Uncompressed bytes read from a source per step.
const CHUNK_SIZE: usize = 64 * 1024;

/// Unix file type bits for directories and regular files.
const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;

/// Failure while adding an entry to a [`ZipWriter`].
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// Reading the entry's content failed.
    #[error("reading entry source: {0}")]
    Source(#[source] io::Error),

    /// Writing to the output failed.
    #[error("writing archive output: {0}")]
    Sink(#[from] io::Error),

    #[error(transparent)]
    Format(#[from] FormatError),
}

/// A finished entry awaiting its central directory record.
struct CentralRecord {
    header: EntryHeader,
    external_attrs: u32,
    lfh_offset: u32,
}

/// Streaming ZIP encoder.
///
/// Entries are written in the order they are added; file content is
/// deflated as it is read and never held in full. The central directory is
/// written by [`ZipWriter::finish`].
pub struct ZipWriter<W> {
    out: W,
    offset: u64,
    records: Vec<CentralRecord>,
}

impl<W: AsyncWrite + Unpin> ZipWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            offset: 0,
            records: Vec::new(),
        }
    }

    /// Add an empty directory record. A trailing `/` is appended if missing.
    pub async fn add_directory(
        &mut self,
        name: &str,
        modified: DosDateTime,
        mode: Option<u32>,
    ) -> Result<(), WriteError> {
        let mut file_name = name.to_string();
        if !file_name.ends_with('/') {
            file_name.push('/');
        }

        let header = EntryHeader {
            flags: flags::UTF8,
            compression_method: CompressionMethod::Stored,
            modified,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            file_name,
        };
        let lfh_offset = self.checked_offset()?;

        let mut buf = Vec::with_capacity(LFH_SIZE + header.file_name.len());
        header.write_local(&mut buf)?;
        self.emit(&buf).await?;

        let mode = mode.unwrap_or(0o755) & 0o7777;
        self.records.push(CentralRecord {
            header,
            external_attrs: ((S_IFDIR | mode) << 16) | DOS_DIRECTORY_ATTR,
            lfh_offset,
        });
        Ok(())
    }

    /// Deflate everything `source` yields into a new file entry.
    pub async fn add_stream<S: AsyncRead + Unpin>(
        &mut self,
        name: &str,
        mut source: S,
        modified: DosDateTime,
        mode: Option<u32>,
    ) -> Result<(), WriteError> {
        let mut header = EntryHeader {
            flags: flags::UTF8 | flags::DATA_DESCRIPTOR,
            compression_method: CompressionMethod::Deflate,
            modified,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            file_name: name.to_string(),
        };
        let lfh_offset = self.checked_offset()?;

        let mut buf = Vec::with_capacity(LFH_SIZE + name.len());
        header.write_local(&mut buf)?;
        self.emit(&buf).await?;

        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        let mut crc = Crc::new();
        let mut chunk = vec![0u8; CHUNK_SIZE];
        let mut uncompressed = 0u64;
        let mut compressed = 0u64;

        loop {
            let n = source.read(&mut chunk).await.map_err(WriteError::Source)?;
            if n == 0 {
                break;
            }
            crc.update(&chunk[..n]);
            uncompressed += n as u64;
            encoder.write_all(&chunk[..n])?;

            if !encoder.get_ref().is_empty() {
                let deflated = std::mem::take(encoder.get_mut());
                compressed += deflated.len() as u64;
                self.emit(&deflated).await?;
            }
        }

        let tail = encoder.finish()?;
        compressed += tail.len() as u64;
        self.emit(&tail).await?;

        header.crc32 = crc.sum();
        header.compressed_size =
            u32::try_from(compressed).map_err(|_| FormatError::TooLarge("entry"))?;
        header.uncompressed_size =
            u32::try_from(uncompressed).map_err(|_| FormatError::TooLarge("entry"))?;

        let mut descriptor = Vec::with_capacity(16);
        header.write_descriptor(&mut descriptor)?;
        self.emit(&descriptor).await?;

        let mode = mode.unwrap_or(0o644) & 0o7777;
        self.records.push(CentralRecord {
            header,
            external_attrs: (S_IFREG | mode) << 16,
            lfh_offset,
        });
        Ok(())
    }

    /// Add a file entry from an in-memory buffer.
    pub async fn add_bytes(&mut self, name: &str, data: &[u8]) -> Result<(), WriteError> {
        self.add_stream(name, data, DosDateTime::MIN, None).await
    }

    /// Write the central directory and end record, flush, and hand back
    /// the output.
    pub async fn finish(mut self) -> Result<W, WriteError> {
        let cd_offset = self.checked_offset()?;

        let mut cd = Vec::new();
        for record in &self.records {
            record
                .header
                .write_central(&mut cd, record.external_attrs, record.lfh_offset)?;
        }

        let entries = u16::try_from(self.records.len())
            .map_err(|_| FormatError::TooLarge("entry count"))?;
        let eocd = EndOfCentralDirectory {
            disk_entries: entries,
            total_entries: entries,
            cd_size: u32::try_from(cd.len()).map_err(|_| FormatError::TooLarge("central directory"))?,
            cd_offset,
            ..Default::default()
        };
        eocd.write_to(&mut cd)?;

        self.emit(&cd).await?;
        self.out.flush().await?;
        Ok(self.out)
    }

    /// Number of entries added so far.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    async fn emit(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes).await?;
        self.offset += bytes.len() as u64;
        Ok(())
    }

    fn checked_offset(&self) -> Result<u32, FormatError> {
        u32::try_from(self.offset).map_err(|_| FormatError::TooLarge("archive"))
    }
}
