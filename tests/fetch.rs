mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream;
use reqwest::Url;
use tempfile::TempDir;
use zip_util::error::TransportError;
use zip_util::{ByteStream, Error, FetchOptions, Fetcher, Transport, extract};

use common::{archive_bytes, init_tracing, sample_entries, snapshot};

/// Serves a fixed body in small chunks, optionally failing part way.
struct MockTransport {
    body: Vec<u8>,
    fail_after_chunks: Option<usize>,
    refuse: bool,
    requests: Arc<AtomicUsize>,
}

impl MockTransport {
    fn serving(body: Vec<u8>) -> Self {
        Self {
            body,
            fail_after_chunks: None,
            refuse: false,
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, _url: &Url) -> Result<ByteStream, TransportError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err("connection refused".into());
        }

        let mut chunks: Vec<Result<Bytes, TransportError>> = self
            .body
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if let Some(n) = self.fail_after_chunks {
            chunks.truncate(n);
            chunks.push(Err("connection reset".into()));
        }
        Ok(stream::iter(chunks).boxed())
    }
}

fn staged(staging: &TempDir) -> FetchOptions {
    FetchOptions {
        staging_dir: Some(staging.path().to_path_buf()),
        ..Default::default()
    }
}

fn staging_is_empty(staging: &TempDir) -> bool {
    std::fs::read_dir(staging.path()).unwrap().next().is_none()
}

#[tokio::test]
async fn download_matches_local_extraction_and_cleans_up() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let staging = TempDir::new().unwrap();
    let bytes = archive_bytes(&sample_entries()).await;

    let local = dir.path().join("sample.zip");
    std::fs::write(&local, &bytes).unwrap();
    extract(&local, dir.path().join("local")).await.unwrap();

    let remote = dir.path().join("remote");
    Fetcher::with_transport(
        "http://somewebsite.com/zip-file.zip",
        &remote,
        MockTransport::serving(bytes),
    )
    .unwrap()
    .with_options(staged(&staging))
    .run()
    .await
    .unwrap();

    assert_eq!(snapshot(&remote), snapshot(&dir.path().join("local")));
    assert_eq!(
        std::fs::read(remote.join("index.html")).unwrap(),
        b"<html><body>hi</body></html>"
    );
    assert_eq!(
        std::fs::read(remote.join("assets/logo.png")).unwrap(),
        b"\x89PNG\r\n\x1a\nnot really a png"
    );
    assert!(staging_is_empty(&staging));
}

#[tokio::test]
async fn transport_failure_is_a_download_error() {
    let dir = TempDir::new().unwrap();
    let staging = TempDir::new().unwrap();
    let mut transport = MockTransport::serving(Vec::new());
    transport.refuse = true;

    let err = Fetcher::with_transport("http://example.com/a.zip", dir.path().join("out"), transport)
        .unwrap()
        .with_options(staged(&staging))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Download { ref url, .. } if url == "http://example.com/a.zip"));
    assert!(staging_is_empty(&staging));
    assert!(!dir.path().join("out").exists());
}

#[tokio::test]
async fn broken_body_stream_is_a_download_error() {
    let dir = TempDir::new().unwrap();
    let staging = TempDir::new().unwrap();
    let mut transport = MockTransport::serving(archive_bytes(&sample_entries()).await);
    transport.fail_after_chunks = Some(3);

    let err = Fetcher::with_transport("http://example.com/a.zip", dir.path().join("out"), transport)
        .unwrap()
        .with_options(staged(&staging))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Download { .. }));
    assert!(staging_is_empty(&staging));
}

#[tokio::test]
async fn extraction_failure_still_removes_staging_file() {
    let dir = TempDir::new().unwrap();
    let staging = TempDir::new().unwrap();
    let transport = MockTransport::serving(b"<html>404 not found</html>".to_vec());

    let err = Fetcher::with_transport("http://example.com/a.zip", dir.path().join("out"), transport)
        .unwrap()
        .with_options(staged(&staging))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ArchiveOpen { .. }));
    assert!(staging_is_empty(&staging));
}

#[tokio::test]
async fn invalid_arguments_never_reach_the_transport() {
    let transport = MockTransport::serving(Vec::new());
    let requests = Arc::clone(&transport.requests);

    let result = Fetcher::with_transport("::not a url::", "/tmp/out", transport);

    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    assert_eq!(requests.load(Ordering::SeqCst), 0);
}
