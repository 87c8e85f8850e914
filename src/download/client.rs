//! HTTP client wrapper for page fetches, probes and file transfers.
//!
//! This module provides the `HttpClient` struct which handles text/JSON/byte
//! fetches, HEAD probes, and streaming transfers to disk with proper timeout
//! configuration and error handling.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, RETRY_AFTER};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};
use url::Url;

use super::constants::{
    CONNECT_TIMEOUT_SECS, PAGE_TIMEOUT_SECS, PARTIAL_SUFFIX, TRANSFER_TIMEOUT_SECS,
};
use super::error::DownloadError;
use super::filename::parse_content_disposition;

/// Browser User-Agent; the catalog serves reduced markup to unknown agents.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Accept-Language sent with every request (French catalog).
const ACCEPT_LANGUAGE: &str = "fr-FR,fr;q=0.9,en-US;q=0.8,en;q=0.7";

/// HTTP client for the catalog site and its file hosts.
///
/// Create once and clone freely; clones share the connection pool.
///
/// # Example
///
/// ```no_run
/// use ripper_core::download::HttpClient;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new()?;
/// let html = client.get_text("https://www.litteratureaudio.com/").await?;
/// let bytes = client
///     .download_to_file("https://example.com/01.mp3", Path::new("./dl/01.mp3"))
///     .await?;
/// println!("{} chars of HTML, {bytes} bytes of audio", html.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    page_timeout: Duration,
}

/// What a HEAD probe learned about a download link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeInfo {
    /// URL after following redirects.
    pub final_url: String,
    /// Filename announced by Content-Disposition.
    pub filename: Option<String>,
    /// Content-Type header value.
    pub content_type: Option<String>,
    /// Content-Length header value.
    pub content_length: Option<u64>,
}

/// Raw bytes plus the announced content type.
#[derive(Debug, Clone)]
pub struct FetchedBytes {
    /// Response body.
    pub bytes: Vec<u8>,
    /// Content-Type header value.
    pub content_type: Option<String>,
}

impl HttpClient {
    /// Creates a new HTTP client with default timeouts.
    ///
    /// - Connect timeout: 10 seconds
    /// - Page/probe timeout: 20 seconds
    /// - Transfer timeout: 2 minutes
    ///
    /// # Errors
    ///
    /// Returns the builder error if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, PAGE_TIMEOUT_SECS, TRANSFER_TIMEOUT_SECS)
    }

    /// Creates a new HTTP client with explicit timeout values (seconds).
    ///
    /// # Errors
    ///
    /// Returns the builder error if the TLS backend cannot be initialised.
    pub fn new_with_timeouts(
        connect_timeout_secs: u64,
        page_timeout_secs: u64,
        transfer_timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            reqwest::header::HeaderValue::from_static(ACCEPT_LANGUAGE),
        );
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(transfer_timeout_secs))
            .gzip(true)
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            page_timeout: Duration::from_secs(page_timeout_secs),
        })
    }

    /// Fetches `url` and returns its body as text.
    ///
    /// # Errors
    ///
    /// Returns a [`DownloadError`] on transport failure or non-2xx status.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn get_text(&self, url: &str) -> Result<String, DownloadError> {
        let response = self.send_request(reqwest::Method::GET, url, true).await?;
        response
            .text()
            .await
            .map_err(|e| map_reqwest_error(url, e))
    }

    /// Fetches `url` and decodes its body as JSON.
    ///
    /// # Errors
    ///
    /// Returns a [`DownloadError`] on transport failure, non-2xx status or
    /// an undecodable body.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn get_json(&self, url: &str) -> Result<serde_json::Value, DownloadError> {
        let text = self.get_text(url).await?;
        serde_json::from_str(&text).map_err(|e| DownloadError::decode(url, e.to_string()))
    }

    /// Fetches `url` fully into memory (covers, small assets).
    ///
    /// # Errors
    ///
    /// Returns a [`DownloadError`] on transport failure or non-2xx status.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn get_bytes(&self, url: &str) -> Result<FetchedBytes, DownloadError> {
        let response = self.send_request(reqwest::Method::GET, url, true).await?;
        let content_type = header_string(&response, CONTENT_TYPE);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;
        Ok(FetchedBytes {
            bytes: bytes.to_vec(),
            content_type,
        })
    }

    /// Issues a HEAD request (following redirects) and reports what it found.
    ///
    /// # Errors
    ///
    /// Returns a [`DownloadError`] on transport failure or non-2xx status.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn probe(&self, url: &str) -> Result<ProbeInfo, DownloadError> {
        let response = self.send_request(reqwest::Method::HEAD, url, true).await?;
        let filename = header_string(&response, CONTENT_DISPOSITION)
            .as_deref()
            .and_then(parse_content_disposition);
        Ok(ProbeInfo {
            final_url: response.url().to_string(),
            filename,
            content_type: header_string(&response, CONTENT_TYPE),
            content_length: header_string(&response, CONTENT_LENGTH)
                .and_then(|v| v.parse::<u64>().ok()),
        })
    }

    /// Streams `url` into `dest`, returning the number of bytes written.
    ///
    /// The body is written to `dest` + `.part` first and renamed into place
    /// once complete; any failure removes the partial file. The parent
    /// directory must already exist.
    ///
    /// # Errors
    ///
    /// Returns a [`DownloadError`] on transport failure, non-2xx status, or
    /// a local write/rename failure.
    #[instrument(skip(self), fields(url = %url, dest = %dest.display()))]
    pub async fn download_to_file(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        let response = self.send_request(reqwest::Method::GET, url, false).await?;

        let part_path = partial_path(dest);
        let mut file = File::create(&part_path)
            .await
            .map_err(|e| DownloadError::io(&part_path, e))?;

        let written = match stream_to_file(&mut file, response, url, &part_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                drop(file);
                if let Err(cleanup) = tokio::fs::remove_file(&part_path).await {
                    warn!(path = %part_path.display(), error = %cleanup, "failed to remove partial file");
                }
                return Err(e);
            }
        };
        drop(file);

        tokio::fs::rename(&part_path, dest)
            .await
            .map_err(|e| DownloadError::io(dest, e))?;

        debug!(bytes = written, "transfer complete");
        Ok(written)
    }

    async fn send_request(
        &self,
        method: reqwest::Method,
        url: &str,
        page_timeout: bool,
    ) -> Result<reqwest::Response, DownloadError> {
        let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DownloadError::invalid_url(url));
        }

        let mut request = self.client.request(method, parsed);
        if page_timeout {
            request = request.timeout(self.page_timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;

        if !response.status().is_success() {
            let retry_after = header_string(&response, RETRY_AFTER);
            return Err(
                DownloadError::http_status(url, response.status().as_u16()).with_retry_after(retry_after),
            );
        }

        Ok(response)
    }
}

/// `<dest>.part`, next to the final file.
#[must_use]
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

fn map_reqwest_error(url: &str, error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url)
    } else {
        DownloadError::network(url, error)
    }
}

fn header_string(
    response: &reqwest::Response,
    name: reqwest::header::HeaderName,
) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(std::string::ToString::to_string)
}

/// Streams response body to file, returning bytes written.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| map_reqwest_error(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path, e))?;

    Ok(bytes_written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_get_text_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let body = client
            .get_text(&format!("{}/page.html", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "<html>ok</html>");
    }

    #[tokio::test]
    async fn test_get_text_http_error_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let err = client.get_text(&server.uri()).await.unwrap_err();
        match err {
            DownloadError::HttpStatus {
                status,
                retry_after,
                ..
            } => {
                assert_eq!(status, 429);
                assert_eq!(retry_after.as_deref(), Some("7"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_get_json_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let err = client.get_json(&server.uri()).await.unwrap_err();
        assert!(matches!(err, DownloadError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let client = HttpClient::new().unwrap();
        let err = client.get_text("not-a-url").await.unwrap_err();
        assert!(matches!(err, DownloadError::InvalidUrl { .. }));
        let err = client.get_text("ftp://example.com/x").await.unwrap_err();
        assert!(matches!(err, DownloadError::InvalidUrl { .. }));
    }

    #[test]
    fn test_download_to_file_invalid_url_writes_nothing() {
        let client = HttpClient::new().unwrap();
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("x.mp3");
        let result = tokio_test::block_on(client.download_to_file("not-a-valid-url", &dest));
        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_probe_reads_headers() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/d"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "application/zip")
                    .insert_header("Content-Disposition", "attachment; filename=\"livre.zip\""),
            )
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let info = client.probe(&format!("{}/d", server.uri())).await.unwrap();
        assert_eq!(info.filename.as_deref(), Some("livre.zip"));
        assert_eq!(info.content_type.as_deref(), Some("application/zip"));
        assert!(info.final_url.ends_with("/d"));
    }

    #[tokio::test]
    async fn test_download_to_file_renames_partial() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/01.mp3"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("01.mp3");
        let client = HttpClient::new().unwrap();
        let written = client
            .download_to_file(&format!("{}/01.mp3", server.uri()), &dest)
            .await
            .unwrap();

        assert_eq!(written, 4096);
        assert_eq!(std::fs::read(&dest).unwrap().len(), 4096);
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_download_to_file_404_leaves_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("missing.mp3");
        let client = HttpClient::new().unwrap();
        let err = client
            .download_to_file(&format!("{}/missing.mp3", server.uri()), &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::HttpStatus { status: 404, .. }));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn test_partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/tmp/a/01 - Intro.mp3")),
            PathBuf::from("/tmp/a/01 - Intro.mp3.part")
        );
    }
}
