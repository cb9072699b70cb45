use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::warn;

use crate::error::TransportError;

/// Response body as a stream of chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Source of remote archive bytes.
///
/// Implementations own redirects, retries, and status handling; a returned
/// stream is expected to carry only a successful response body.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a GET for `url` and return its body as a stream.
    async fn get(&self, url: &Url) -> Result<ByteStream, TransportError>;
}

/// Settings for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// Attempts made when connecting fails or times out.
    pub max_retry: u32,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            max_retry: 10,
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// HTTP transport backed by `reqwest`.
pub struct HttpTransport {
    client: Client,
    max_retry: u32,
}

impl HttpTransport {
    pub fn new() -> reqwest::Result<Self> {
        Self::with_config(HttpConfig::default())
    }

    pub fn with_config(config: HttpConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent)
            .build()?;

        Ok(Self {
            client,
            max_retry: config.max_retry.max(1),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &Url) -> Result<ByteStream, TransportError> {
        let mut retry_count = 0;

        loop {
            match self.client.get(url.clone()).send().await {
                Ok(resp) => {
                    // Non-2xx bodies are error pages, never archives.
                    let resp = resp.error_for_status()?;
                    let body = resp
                        .bytes_stream()
                        .map(|chunk| chunk.map_err(TransportError::from));
                    return Ok(body.boxed());
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retry_count += 1;
                    if retry_count >= self.max_retry {
                        return Err(format!("max retries exceeded: {e}").into());
                    }
                    warn!(
                        %url,
                        retry = retry_count,
                        max_retry = self.max_retry,
                        error = %e,
                        "connection error, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(500 * retry_count as u64)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
