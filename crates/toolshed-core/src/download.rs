//! Network collaborator used for assets, checksum files and registry files.
//!
//! A [`Downloader`] performs a single attempt per call. Retries are applied
//! by callers through [`crate::retry::retry`] so the same backoff policy
//! covers version lookups and downloads.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::retry::Transient;

/// A single failed network attempt.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// Connecting or transferring failed.
    #[error("Request to {url} failed: {message}")]
    Network {
        /// Requested URL.
        url: String,
        /// Rendered transport error.
        message: String,
    },

    /// No response arrived within the network timeout.
    #[error("Request to {url} timed out after {}s", timeout.as_secs())]
    Timeout {
        /// Requested URL.
        url: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The body could not be read or decoded.
    #[error("Invalid response from {url}: {message}")]
    Decode {
        /// Requested URL.
        url: String,
        /// What was wrong with the body.
        message: String,
    },

    /// Writing the downloaded bytes failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The cancellation token fired mid-transfer.
    #[error("Cancelled")]
    Cancelled,
}

impl FetchError {
    fn from_reqwest(url: &str, timeout: Duration, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
                timeout,
            }
        } else if let Some(status) = err.status() {
            Self::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            Self::Network {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

impl Transient for FetchError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => {
                *status >= 500 || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
            }
            Self::Decode { .. } | Self::Io(_) | Self::Cancelled => false,
        }
    }
}

/// Fetches remote resources.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Stream `url` into `dest`, returning the number of bytes written.
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, FetchError>;

    /// Fetch a small text resource (checksum file, registry file).
    async fn fetch_text(&self, url: &str, cancel: &CancellationToken)
    -> Result<String, FetchError>;
}

/// Build the shared HTTP client.
///
/// # Errors
///
/// Returns the reqwest error if the TLS backend cannot be initialised.
pub fn http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(crate::USER_AGENT)
        .connect_timeout(Duration::from_secs(15))
        .build()
}

/// Production downloader backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
    timeout: Duration,
}

impl HttpDownloader {
    /// Create a downloader applying `timeout` to every call.
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, self.timeout, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, FetchError> {
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(FetchError::Cancelled),
            r = self.get(url) => r?,
        };

        let mut file = File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|e| FetchError::from_reqwest(url, self.timeout, &e))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        tracing::debug!("Downloaded {written} bytes from {url}");
        Ok(written)
    }

    async fn fetch_text(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<String, FetchError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(FetchError::Cancelled),
            r = async {
                self.get(url)
                    .await?
                    .text()
                    .await
                    .map_err(|e| FetchError::from_reqwest(url, self.timeout, &e))
            } => r,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn downloader() -> HttpDownloader {
        HttpDownloader::new(http_client().unwrap(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn streams_body_to_disk() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/tool.tar.gz")
            .with_status(200)
            .with_body(b"archive-bytes".as_slice())
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("tool.tar.gz");
        let url = format!("{}/tool.tar.gz", server.url());

        let written = downloader()
            .fetch(&url, &dest, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(written, 13);
        assert_eq!(std::fs::read(&dest).unwrap(), b"archive-bytes");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn classifies_status_codes() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", "/busy")
            .with_status(503)
            .create_async()
            .await;

        let d = downloader();
        let cancel = CancellationToken::new();

        let missing = d
            .fetch_text(&format!("{}/missing", server.url()), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(missing, FetchError::Status { status: 404, .. }));
        assert!(!missing.is_transient());

        let busy = d
            .fetch_text(&format!("{}/busy", server.url()), &cancel)
            .await
            .unwrap_err();
        assert!(busy.is_transient());
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let dir = tempfile::tempdir().unwrap();
        let err = downloader()
            .fetch("http://127.0.0.1:9/never", &dir.path().join("x"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
    }
}
