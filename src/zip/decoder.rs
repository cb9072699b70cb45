use flate2::{Crc, Decompress, FlushDecompress, Status};
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::io::ReadAt;

use super::FormatError;
use super::parser::ArchiveReader;
use super::structures::{ArchiveEntry, CompressionMethod};

/// Compressed bytes read from the source per step.
const CHUNK_SIZE: u64 = 64 * 1024;
/// Decompressed bytes produced per inflate call.
const INFLATE_CHUNK: usize = 64 * 1024;

/// Stream the decompressed content of `entry` into `out`.
///
/// Data is read in fixed-size chunks and inflated into a fixed-size buffer,
/// so memory use does not depend on the entry size or compression ratio.
/// Output past the uncompressed size recorded in the central directory is
/// rejected before it is written; the CRC-32 is checked once the data is
/// consumed. Returns the number of bytes written.
pub async fn copy_entry<R, W>(
    archive: &ArchiveReader<R>,
    entry: &ArchiveEntry,
    out: &mut W,
) -> Result<u64, FormatError>
where
    R: ReadAt,
    W: AsyncWrite + Unpin,
{
    if entry.is_encrypted() {
        return Err(FormatError::Unsupported("encrypted entry".to_string()));
    }

    let mut inflater = match entry.compression_method {
        CompressionMethod::Stored => None,
        CompressionMethod::Deflate => Some(Decompress::new(false)),
        CompressionMethod::Unknown(method) => {
            return Err(FormatError::Unsupported(format!(
                "compression method {method}"
            )));
        }
    };

    let mut offset = archive.data_offset(entry).await?;
    let mut remaining = entry.compressed_size;
    let mut buf = vec![0u8; remaining.min(CHUNK_SIZE) as usize];
    let mut inflated = vec![0u8; if inflater.is_some() { INFLATE_CHUNK } else { 0 }];
    let mut sink = CheckedSink {
        out,
        crc: Crc::new(),
        written: 0,
        expected: entry.uncompressed_size,
    };
    let mut stream_end = false;

    while remaining > 0 && !stream_end {
        let len = remaining.min(CHUNK_SIZE) as usize;
        archive.reader().read_exact_at(offset, &mut buf[..len]).await?;
        offset += len as u64;
        remaining -= len as u64;

        let Some(inflater) = inflater.as_mut() else {
            sink.write(&buf[..len]).await?;
            continue;
        };

        let mut input = &buf[..len];
        loop {
            let before_in = inflater.total_in();
            let before_out = inflater.total_out();
            let status = inflater
                .decompress(input, &mut inflated, FlushDecompress::None)
                .map_err(io::Error::from)?;
            let consumed = (inflater.total_in() - before_in) as usize;
            let produced = (inflater.total_out() - before_out) as usize;
            input = &input[consumed..];

            sink.write(&inflated[..produced]).await?;

            if status == Status::StreamEnd {
                stream_end = true;
                break;
            }
            // Output buffer not filled: everything available was consumed
            if input.is_empty() && produced < inflated.len() {
                break;
            }
            if consumed == 0 && produced == 0 {
                let stalled = io::Error::new(io::ErrorKind::InvalidData, "deflate stream stalled");
                return Err(stalled.into());
            }
        }
    }

    let CheckedSink { crc, written, .. } = sink;
    if written != entry.uncompressed_size {
        return Err(FormatError::Size {
            expected: entry.uncompressed_size,
            actual: written,
        });
    }
    if crc.sum() != entry.crc32 {
        return Err(FormatError::Checksum {
            expected: entry.crc32,
            actual: crc.sum(),
        });
    }

    Ok(written)
}

/// Output that checksums what it writes and refuses to grow past the
/// recorded size.
struct CheckedSink<'a, W> {
    out: &'a mut W,
    crc: Crc,
    written: u64,
    expected: u64,
}

impl<W: AsyncWrite + Unpin> CheckedSink<'_, W> {
    async fn write(&mut self, data: &[u8]) -> Result<(), FormatError> {
        if data.is_empty() {
            return Ok(());
        }
        let written = self.written + data.len() as u64;
        if written > self.expected {
            return Err(FormatError::Size {
                expected: self.expected,
                actual: written,
            });
        }
        self.crc.update(data);
        self.out.write_all(data).await?;
        self.written = written;
        Ok(())
    }
}
