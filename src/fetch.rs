//! Download-and-extract.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::Url;
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::extract::{ExtractOptions, Extractor};
use crate::io::{HttpTransport, Transport};

/// Tuning for [`Fetcher`].
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Directory the staging file is created in. Defaults to the system
    /// temp directory.
    pub staging_dir: Option<PathBuf>,
    pub extract: ExtractOptions,
}

/// Downloads a remote archive into a staging file and extracts it.
///
/// The staging file lives exactly as long as [`Fetcher::run`] and is
/// removed whether the download, the extraction, or neither fails.
pub struct Fetcher<T = HttpTransport> {
    url: Url,
    destination: PathBuf,
    transport: T,
    options: FetchOptions,
}

impl Fetcher<HttpTransport> {
    /// Validate the arguments and set up the default HTTP transport.
    pub fn new(url: &str, destination: impl AsRef<Path>) -> Result<Self> {
        let (url, destination) = validate(url, destination.as_ref())?;
        let transport =
            HttpTransport::new().map_err(|e| Error::download(url.as_str(), e))?;

        Ok(Self {
            url,
            destination,
            transport,
            options: FetchOptions::default(),
        })
    }
}

impl<T: Transport> Fetcher<T> {
    /// Validate the arguments and download through `transport`.
    pub fn with_transport(url: &str, destination: impl AsRef<Path>, transport: T) -> Result<Self> {
        let (url, destination) = validate(url, destination.as_ref())?;

        Ok(Self {
            url,
            destination,
            transport,
            options: FetchOptions::default(),
        })
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn run(self) -> Result<()> {
        let staging = self.allocate_staging()?;
        debug!(url = %self.url, staging = %staging.path().display(), "staging download");

        let outcome = self.download_and_extract(staging.path()).await;

        // Released exactly once, on every path; dropping would also remove it
        let staging_path = staging.path().to_path_buf();
        if let Err(e) = staging.close() {
            warn!(staging = %staging_path.display(), error = %e, "failed to remove staging file");
        }

        if outcome.is_ok() {
            info!(url = %self.url, destination = %self.destination.display(), "fetched and extracted");
        }
        outcome
    }

    fn allocate_staging(&self) -> Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("zip-util-").suffix(".zip");

        let staging = match &self.options.staging_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        };
        staging.map_err(Error::Staging)
    }

    async fn download_and_extract(&self, staging: &Path) -> Result<()> {
        let bytes = self.download(staging).await?;
        debug!(url = %self.url, bytes, "download complete");

        Extractor::new(staging, &self.destination)?
            .with_options(self.options.extract.clone())
            .run()
            .await
    }

    async fn download(&self, staging: &Path) -> Result<u64> {
        let url = self.url.as_str();

        let mut body = self
            .transport
            .get(&self.url)
            .await
            .map_err(|e| Error::download(url, e))?;
        let mut file = fs::File::create(staging)
            .await
            .map_err(|e| Error::download(url, e))?;

        let mut total = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| Error::download(url, e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::download(url, e))?;
            total += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| Error::download(url, e))?;

        Ok(total)
    }
}

fn validate(url: &str, destination: &Path) -> Result<(Url, PathBuf)> {
    let url = Url::parse(url)
        .map_err(|e| Error::InvalidArgument(format!("source url '{url}' is not valid: {e}")))?;
    if destination.as_os_str().is_empty() {
        return Err(Error::InvalidArgument("destination path is required".into()));
    }
    Ok((url, destination.to_path_buf()))
}

/// Download the archive at `url` and extract it into `destination`.
pub async fn fetch_and_extract(url: &str, destination: impl AsRef<Path>) -> Result<()> {
    Fetcher::new(url, destination)?.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_arguments_fail_before_any_request() {
        assert!(matches!(
            Fetcher::new("not a url", "/tmp/out"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Fetcher::new("https://example.com/a.zip", ""),
            Err(Error::InvalidArgument(_))
        ));
    }
}
