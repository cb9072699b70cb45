//! Streaming zip creation from glob-matched files.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, Stream, StreamExt};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::glob::{GlobOptions, MatchedPath, SourceSelector};
use crate::zip::{DosDateTime, WriteError, ZipWriter};

/// Bytes buffered between the archive producer and the consumer.
const PIPE_CAPACITY: usize = 64 * 1024;
/// Largest chunk yielded per poll.
const READ_CHUNK: usize = 16 * 1024;

/// Zip archive bytes, produced on demand.
///
/// Nothing happens until the stream is first polled; from then on a
/// background task writes the archive into a bounded pipe, so memory use
/// stays flat however large the sources are. The stream is single-pass.
/// If a source cannot be read, the stream yields one error and ends.
/// Dropping the stream stops the producer.
pub struct ArchiveStream {
    state: State,
    buf: Box<[u8]>,
}

enum State {
    Idle {
        producer: BoxFuture<'static, Result<()>>,
        pipe: DuplexStream,
    },
    Reading {
        producer: JoinHandle<Result<()>>,
        pipe: DuplexStream,
    },
    Finishing {
        producer: JoinHandle<Result<()>>,
    },
    Done,
}

impl ArchiveStream {
    fn new(producer: BoxFuture<'static, Result<()>>, pipe: DuplexStream) -> Self {
        Self {
            state: State::Idle { producer, pipe },
            buf: vec![0u8; READ_CHUNK].into_boxed_slice(),
        }
    }

    /// Drain the archive into `out`, returning the number of bytes written.
    pub async fn write_to<W: AsyncWrite + Unpin>(mut self, out: &mut W) -> Result<u64> {
        let mut total = 0u64;
        while let Some(chunk) = self.next().await {
            let chunk = chunk?;
            out.write_all(&chunk).await?;
            total += chunk.len() as u64;
        }
        out.flush().await?;
        Ok(total)
    }

    /// Collect the whole archive in memory.
    pub async fn into_bytes(self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out).await?;
        Ok(out)
    }
}

impl Stream for ArchiveStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match std::mem::replace(&mut this.state, State::Done) {
                State::Idle { producer, pipe } => {
                    this.state = State::Reading {
                        producer: tokio::spawn(producer),
                        pipe,
                    };
                }
                State::Reading { producer, mut pipe } => {
                    let mut read_buf = ReadBuf::new(&mut this.buf);
                    match Pin::new(&mut pipe).poll_read(cx, &mut read_buf) {
                        Poll::Pending => {
                            this.state = State::Reading { producer, pipe };
                            return Poll::Pending;
                        }
                        Poll::Ready(Err(e)) => {
                            producer.abort();
                            return Poll::Ready(Some(Err(e.into())));
                        }
                        Poll::Ready(Ok(())) if read_buf.filled().is_empty() => {
                            // Producer closed its end; its result decides how we finish
                            this.state = State::Finishing { producer };
                        }
                        Poll::Ready(Ok(())) => {
                            let chunk = Bytes::copy_from_slice(read_buf.filled());
                            this.state = State::Reading { producer, pipe };
                            return Poll::Ready(Some(Ok(chunk)));
                        }
                    }
                }
                State::Finishing { mut producer } => {
                    let joined = match producer.poll_unpin(cx) {
                        Poll::Pending => {
                            this.state = State::Finishing { producer };
                            return Poll::Pending;
                        }
                        Poll::Ready(joined) => joined,
                    };
                    return Poll::Ready(match joined {
                        Ok(Ok(())) => None,
                        Ok(Err(e)) => Some(Err(e)),
                        Err(e) => Some(Err(Error::Io(io::Error::other(e)))),
                    });
                }
                State::Done => return Poll::Ready(None),
            }
        }
    }
}

impl Drop for ArchiveStream {
    fn drop(&mut self) {
        if let State::Reading { producer, .. } | State::Finishing { producer } = &self.state {
            producer.abort();
        }
    }
}

/// Build a zip archive from every path matched by `patterns`.
///
/// Directories become empty directory entries and everything else is
/// streamed in as a deflated file entry, named relative to the match's
/// base. No patterns, or no matches, yields a valid empty archive.
pub fn create_archive(patterns: impl Into<SourceSelector>, options: GlobOptions) -> ArchiveStream {
    let selector = patterns.into();
    let (sink, pipe) = tokio::io::duplex(PIPE_CAPACITY);
    ArchiveStream::new(produce(selector, options, sink).boxed(), pipe)
}

async fn produce(selector: SourceSelector, options: GlobOptions, sink: DuplexStream) -> Result<()> {
    let matches = if selector.is_empty() {
        Vec::new()
    } else {
        tokio::task::spawn_blocking(move || selector.expand(&options))
            .await
            .map_err(io::Error::other)??
    };

    let mut writer = ZipWriter::new(sink);
    for matched in &matches {
        add_match(&mut writer, matched).await?;
    }

    let count = writer.len();
    let mut sink = writer.finish().await.map_err(sink_error)?;
    sink.shutdown().await?;

    info!(entries = count, "archive complete");
    Ok(())
}

async fn add_match(writer: &mut ZipWriter<DuplexStream>, matched: &MatchedPath) -> Result<()> {
    let name = matched.relative_name()?;
    if name.is_empty() {
        return Ok(());
    }

    let modified = matched
        .metadata
        .modified()
        .map_or(DosDateTime::MIN, DosDateTime::from_system_time);
    let mode = unix_mode(&matched.metadata);

    if matched.metadata.is_dir() {
        debug!(name = %name, "adding directory");
        return writer
            .add_directory(&name, modified, mode)
            .await
            .map_err(sink_error);
    }

    debug!(name = %name, "adding file");
    let stream_error = |source: io::Error| Error::Stream {
        path: matched.path.clone(),
        source,
    };
    let file = fs::File::open(&matched.path).await.map_err(stream_error)?;
    writer
        .add_stream(&name, file, modified, mode)
        .await
        .map_err(|e| match e {
            WriteError::Source(source) => stream_error(source),
            other => sink_error(other),
        })
}

fn sink_error(err: WriteError) -> Error {
    match err {
        WriteError::Source(e) | WriteError::Sink(e) => Error::Io(e),
        WriteError::Format(e) => Error::Io(e.into()),
    }
}

#[cfg(unix)]
fn unix_mode(metadata: &std::fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode())
}

#[cfg(not(unix))]
fn unix_mode(_metadata: &std::fs::Metadata) -> Option<u32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_patterns_yield_an_empty_archive() {
        let bytes = create_archive(Vec::<String>::new(), GlobOptions::default())
            .into_bytes()
            .await
            .unwrap();

        // Just the end of central directory record
        assert_eq!(bytes.len(), 22);
        assert_eq!(&bytes[..4], b"PK\x05\x06");
    }

    #[tokio::test]
    async fn nothing_runs_until_polled() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();

        let stream = create_archive("*", GlobOptions::default().cwd(dir.path()));
        // The source can go away before the first poll without any effect
        std::fs::remove_file(dir.path().join("a.txt")).unwrap();

        let bytes = stream.into_bytes().await.unwrap();
        assert_eq!(bytes.len(), 22);
    }

    #[tokio::test]
    async fn invalid_pattern_surfaces_through_the_stream() {
        let mut stream = create_archive("[", GlobOptions::default().cwd(std::env::temp_dir()));

        let first = stream.next().await.unwrap();
        assert!(matches!(first, Err(Error::InvalidArgument(_))));
        assert!(stream.next().await.is_none());
    }
}
