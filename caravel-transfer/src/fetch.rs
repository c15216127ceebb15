//! Thin streaming HTTP layer
//!
//! `Fetcher` does one request per call and reports exactly what happened;
//! retry policy lives in the engine above it. Downloads stream to disk
//! chunk by chunk, taking throttle budget per chunk and treating a quiet
//! wire as a stall rather than waiting forever.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{Error, Result};
use crate::throttle::BandwidthThrottler;

/// Time allowed for the TCP/TLS handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client wrapper shared by every transfer.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    /// Create a fetcher with the engine's defaults.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("caravel/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client (custom proxy, TLS or pool settings).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Access the underlying client for one-off requests.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Probe an object's size with a HEAD request.
    pub async fn head_size(&self, url: &str) -> Result<u64> {
        let response = self.client.head(url).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::not_found(url));
        }
        if !status.is_success() {
            return Err(Error::unexpected_status(status.as_u16(), url));
        }
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| Error::MissingLength {
                url: url.to_string(),
            })
    }

    /// Stream one object (or one byte range of it) into a file, replacing
    /// whatever was there. Returns the number of bytes written.
    ///
    /// Both the wait for response headers and every chunk read are bounded
    /// by the stall timeout; silence past it fails the attempt with
    /// [`Error::Stalled`]. A 200 answer to a ranged request is refused, as
    /// silently receiving the whole object would corrupt part reassembly.
    pub async fn stream_to_file(&self, request: StreamRequest<'_>) -> Result<u64> {
        let mut builder = self.client.get(request.url);
        if let Some((start, end)) = request.range {
            builder = builder.header(RANGE, format!("bytes={start}-{end}"));
        }

        let response = tokio::time::timeout(request.stall_timeout, builder.send())
            .await
            .map_err(|_| Error::Stalled {
                stall: request.stall_timeout,
            })??;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::not_found(request.url));
        }
        if !status.is_success() {
            return Err(Error::unexpected_status(status.as_u16(), request.url));
        }
        if request.range.is_some() && status != StatusCode::PARTIAL_CONTENT {
            return Err(Error::RangeNotSupported {
                url: request.url.to_string(),
            });
        }

        let mut file = File::create(request.dest).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        loop {
            if request.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let chunk = match tokio::time::timeout(request.stall_timeout, stream.next()).await {
                Err(_) => {
                    return Err(Error::Stalled {
                        stall: request.stall_timeout,
                    });
                }
                Ok(None) => break,
                Ok(Some(chunk)) => chunk?,
            };
            let len = chunk.len() as u64;
            request.throttle.acquire(len).await;
            file.write_all(&chunk).await?;
            written += len;
            (request.on_bytes)(len);
        }

        file.flush().await?;
        trace!(url = request.url, written, "stream finished");
        Ok(written)
    }
}

/// Everything one [`Fetcher::stream_to_file`] call needs.
pub struct StreamRequest<'a> {
    /// Absolute object URL.
    pub url: &'a str,
    /// File to (over)write.
    pub dest: &'a Path,
    /// Inclusive byte range to request, or the whole object.
    pub range: Option<(u64, u64)>,
    /// Budget source; every chunk acquires before hitting disk.
    pub throttle: &'a BandwidthThrottler,
    /// Silence longer than this fails the attempt.
    pub stall_timeout: Duration,
    /// Checked between chunks; flips the result to [`Error::Cancelled`].
    pub cancel: &'a CancellationToken,
    /// Invoked with each chunk's size after it lands.
    pub on_bytes: &'a (dyn Fn(u64) + Send + Sync),
}

/// Join a base URL and a relative path without doubling slashes.
pub fn join_url(base: &str, rel: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        rel.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request<'a>(
        url: &'a str,
        dest: &'a Path,
        throttle: &'a BandwidthThrottler,
        cancel: &'a CancellationToken,
    ) -> StreamRequest<'a> {
        StreamRequest {
            url,
            dest,
            range: None,
            throttle,
            stall_timeout: Duration::from_secs(5),
            cancel,
            on_bytes: &|_| {},
        }
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://cdn/r5r", "bin/game.exe"), "http://cdn/r5r/bin/game.exe");
        assert_eq!(join_url("http://cdn/r5r/", "/bin/game.exe"), "http://cdn/r5r/bin/game.exe");
    }

    #[tokio::test]
    async fn test_stream_whole_object() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bin/game.exe"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello world".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("game.exe");
        let url = format!("{}/bin/game.exe", server.uri());
        let throttle = BandwidthThrottler::unlimited();
        let cancel = CancellationToken::new();

        let fetcher = Fetcher::new().unwrap();
        let written = fetcher
            .stream_to_file(request(&url, &dest, &throttle, &cancel))
            .await
            .unwrap();
        assert_eq!(written, 11);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_ranged_request_wants_partial_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big.bin"))
            .and(header("Range", "bytes=0-4"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"hello".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("big.bin.p0");
        let url = format!("{}/big.bin", server.uri());
        let throttle = BandwidthThrottler::unlimited();
        let cancel = CancellationToken::new();

        let fetcher = Fetcher::new().unwrap();
        let mut req = request(&url, &dest, &throttle, &cancel);
        req.range = Some((0, 4));
        let written = fetcher.stream_to_file(req).await.unwrap();
        assert_eq!(written, 5);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_full_answer_to_ranged_request_is_refused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"whole object".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("big.bin.p0");
        let url = format!("{}/big.bin", server.uri());
        let throttle = BandwidthThrottler::unlimited();
        let cancel = CancellationToken::new();

        let fetcher = Fetcher::new().unwrap();
        let mut req = request(&url, &dest, &throttle, &cancel);
        req.range = Some((0, 4));
        assert!(matches!(
            fetcher.stream_to_file(req).await,
            Err(Error::RangeNotSupported { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.bin"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("gone.bin");
        let url = format!("{}/gone.bin", server.uri());
        let throttle = BandwidthThrottler::unlimited();
        let cancel = CancellationToken::new();

        let fetcher = Fetcher::new().unwrap();
        assert!(matches!(
            fetcher.stream_to_file(request(&url, &dest, &throttle, &cancel)).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_quiet_wire_is_a_stall() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow.bin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"late".to_vec())
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("slow.bin");
        let url = format!("{}/slow.bin", server.uri());
        let throttle = BandwidthThrottler::unlimited();
        let cancel = CancellationToken::new();

        let fetcher = Fetcher::new().unwrap();
        let mut req = request(&url, &dest, &throttle, &cancel);
        req.stall_timeout = Duration::from_millis(200);
        assert!(matches!(
            fetcher.stream_to_file(req).await,
            Err(Error::Stalled { .. })
        ));
    }

    #[tokio::test]
    async fn test_head_size_reads_content_length() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/big.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 1234]))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new().unwrap();
        let url = format!("{}/big.bin", server.uri());
        assert_eq!(fetcher.head_size(&url).await.unwrap(), 1234);
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_stream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bin/game.exe"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 1 << 16]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("game.exe");
        let url = format!("{}/bin/game.exe", server.uri());
        let throttle = BandwidthThrottler::unlimited();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let fetcher = Fetcher::new().unwrap();
        assert!(matches!(
            fetcher.stream_to_file(request(&url, &dest, &throttle, &cancel)).await,
            Err(Error::Cancelled)
        ));
    }
}
