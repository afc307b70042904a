//! Ticket and chunk transports
//!
//! The download manager talks to the network only through
//! [`TicketTransport`] and [`ChunkTransport`]. [`HttpTransport`] implements
//! both on top of reqwest; tests substitute their own implementations.
//! Inline `data:` resources never touch a transport.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use futures::TryStreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, ClientBuilder, RequestBuilder, Response, StatusCode};
use tokio::io::AsyncReadExt;

use crate::core::error::{Error, Result};
use crate::core::observer::TransferObserver;
use crate::core::sink::OutputSink;
use crate::core::stream::{create_body_reader, DEFAULT_PIECE_SIZE, DEFAULT_TIMEOUT};
use crate::core::ticket::{Ticket, TicketReader};

/// Fetches and parses the ticket for a ticket request URL
#[async_trait]
pub trait TicketTransport: Send + Sync {
    async fn fetch_ticket(&self, url: &str, headers: &BTreeMap<String, String>) -> Result<Ticket>;
}

/// Streams one HTTP resource into the sink, returning the bytes written
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    async fn fetch_chunk(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        sink: &mut dyn OutputSink,
        observer: &dyn TransferObserver,
    ) -> Result<u64>;
}

/// reqwest-backed transport for both tickets and chunks
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    piece_size: usize,
}

impl HttpTransport {
    /// Build a transport whose sockets time out after `timeout`
    ///
    /// The timeout bounds connecting and each individual read, not the whole
    /// request, so a slow but steady body is never cut off.
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut builder = ClientBuilder::new()
            .tcp_keepalive(Duration::from_secs(60))
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(format!("htsget-dl/{}", env!("CARGO_PKG_VERSION")));
        if !timeout.is_zero() {
            builder = builder.read_timeout(timeout).connect_timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::InvalidInput(format!("cannot create HTTP client: {e}")))?;

        Ok(Self {
            client,
            piece_size: DEFAULT_PIECE_SIZE,
        })
    }

    /// Use an existing client
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            piece_size: DEFAULT_PIECE_SIZE,
        }
    }

    pub fn piece_size(mut self, piece_size: usize) -> Self {
        self.piece_size = piece_size.max(1);
        self
    }

    async fn get(&self, url: &str, headers: &BTreeMap<String, String>) -> Result<Response> {
        let request = with_headers(self.client.get(url), headers);
        let response = request.send().await?;
        check_status(url, response).await
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT).unwrap_or_else(|_| Self::with_client(Client::new()))
    }
}

fn with_headers(mut request: RequestBuilder, headers: &BTreeMap<String, String>) -> RequestBuilder {
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }
    request
}

/// Client errors that retrying cannot fix
pub fn is_unrecoverable(status: StatusCode) -> bool {
    status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
}

/// Map an error status to a client error (4xx) or a retryable error
async fn check_status(url: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if is_unrecoverable(status) {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::ClientError {
            status: status.as_u16(),
            url: url.to_string(),
            body,
        });
    }
    Err(Error::RetryableIoError(format!("{status} for url ({url})")))
}

/// Declared body length, if the response carries a parseable header
fn declared_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Whether a body read failed because the socket went quiet
fn is_timeout(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::TimedOut
        || err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
            .is_some_and(|e| e.is_timeout())
}

/// Compare the declared Content-Length against what was written
pub fn check_content_length(declared: Option<u64>, written: u64) -> Result<()> {
    match declared {
        Some(expected) if expected != written => Err(Error::ContentLengthMismatch {
            expected,
            actual: written,
        }),
        _ => Ok(()),
    }
}

#[async_trait]
impl TicketTransport for HttpTransport {
    async fn fetch_ticket(&self, url: &str, headers: &BTreeMap<String, String>) -> Result<Ticket> {
        let response = self.get(url, headers).await?;

        let mut reader = TicketReader::new();
        let mut body = response.bytes_stream();
        while let Some(piece) = body.try_next().await.map_err(Error::retryable)? {
            reader.push(&piece)?;
        }
        reader.finish()
    }
}

#[async_trait]
impl ChunkTransport for HttpTransport {
    async fn fetch_chunk(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        sink: &mut dyn OutputSink,
        observer: &dyn TransferObserver,
    ) -> Result<u64> {
        let response = self.get(url, headers).await?;
        let declared = declared_length(&response);

        let mut body = create_body_reader(response);
        let mut buffer = vec![0u8; self.piece_size];
        let mut written = 0u64;

        loop {
            let read = match body.read(&mut buffer).await {
                Ok(read) => read,
                // A body that ends early surfaces as a read error
                Err(e) => match declared {
                    Some(expected) if written < expected && !is_timeout(&e) => {
                        return Err(Error::ContentLengthMismatch {
                            expected,
                            actual: written,
                        });
                    }
                    _ => return Err(Error::retryable(e)),
                },
            };
            if read == 0 {
                break;
            }
            sink.write_piece(&buffer[..read]).await?;
            written += read as u64;
            observer.bytes_written(read as u64);
        }

        check_content_length(declared, written)?;
        Ok(written)
    }
}

/// Decode the payload of a `data:` URI
///
/// Everything after the first comma is base64, whatever the media type
/// before it says.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>> {
    let (_, payload) = uri
        .split_once(',')
        .ok_or_else(|| Error::InvalidDataUri("missing ',' separator".to_string()))?;

    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| Error::InvalidDataUri(e.to_string()))
}

/// Write an inline resource straight to the sink, returning the bytes written
pub async fn write_inline(
    uri: &str,
    sink: &mut dyn OutputSink,
    observer: &dyn TransferObserver,
) -> Result<u64> {
    let data = decode_data_uri(uri)?;
    sink.write_piece(&data).await?;
    observer.bytes_written(data.len() as u64);
    Ok(data.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::observer::SilentObserver;
    use crate::core::sink::MemorySink;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport() -> HttpTransport {
        HttpTransport::new(Duration::from_secs(10)).unwrap()
    }

    /// Serve one response that declares `content_length`, sends `body` in
    /// `piece`-byte writes with `gap` before each, then closes the connection
    async fn serve_raw(content_length: usize, body: &'static [u8], piece: usize, gap: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {content_length}\r\n\r\n");
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            for part in body.chunks(piece) {
                tokio::time::sleep(gap).await;
                socket.write_all(part).await.unwrap();
                socket.flush().await.unwrap();
            }
        });

        format!("http://{addr}/chunk")
    }

    #[test]
    fn test_decode_base64_data_uri() {
        let data = decode_data_uri("data:application/octet-stream;base64,SGVsbG8=").unwrap();
        assert_eq!(data, b"Hello");

        let data = decode_data_uri("data:application/vnd.ga4gh.bam;base64,SGVsbG8sIFdvcmxkIQ==")
            .unwrap();
        assert_eq!(data, b"Hello, World!");
    }

    #[test]
    fn test_payload_is_base64_without_marker() {
        let data = decode_data_uri("data:text/plain,SGVsbG8=").unwrap();
        assert_eq!(data, b"Hello");

        assert!(matches!(
            decode_data_uri("data:text/plain,a%20b"),
            Err(Error::InvalidDataUri(_))
        ));
    }

    #[test]
    fn test_invalid_data_uris() {
        assert!(matches!(
            decode_data_uri("data:application/octet-stream;base64"),
            Err(Error::InvalidDataUri(_))
        ));
        assert!(matches!(
            decode_data_uri("data:;base64,@@@"),
            Err(Error::InvalidDataUri(_))
        ));
    }

    #[test]
    fn test_check_content_length() {
        assert!(check_content_length(None, 10).is_ok());
        assert!(check_content_length(Some(10), 10).is_ok());
        assert!(matches!(
            check_content_length(Some(10), 4),
            Err(Error::ContentLengthMismatch { expected: 10, actual: 4 })
        ));
        assert!(check_content_length(Some(0), 1).unwrap_err().is_retryable());
    }

    #[test]
    fn test_unrecoverable_statuses() {
        for code in [400, 401, 403, 404, 410] {
            assert!(is_unrecoverable(StatusCode::from_u16(code).unwrap()), "{code}");
        }
        for code in [408, 429, 500, 502, 503] {
            assert!(!is_unrecoverable(StatusCode::from_u16(code).unwrap()), "{code}");
        }
    }

    #[tokio::test]
    async fn test_write_inline() {
        let mut sink = MemorySink::new();
        let written = write_inline(
            "data:application/octet-stream;base64,SGVsbG8=",
            &mut sink,
            &SilentObserver,
        )
        .await
        .unwrap();
        assert_eq!(written, 5);
        assert_eq!(sink.as_bytes(), b"Hello");
    }

    #[tokio::test]
    async fn test_fetch_chunk_streams_in_pieces() {
        let server = MockServer::start().await;
        let body: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        Mock::given(method("GET"))
            .and(path("/data"))
            .and(header("range", "bytes=0-199999"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let mut headers = BTreeMap::new();
        headers.insert("Range".to_string(), "bytes=0-199999".to_string());

        let mut sink = MemorySink::new();
        let written = transport()
            .piece_size(4096)
            .fetch_chunk(&format!("{}/data", server.uri()), &headers, &mut sink, &SilentObserver)
            .await
            .unwrap();

        assert_eq!(written, body.len() as u64);
        assert_eq!(sink.as_bytes(), body.as_slice());
    }

    #[tokio::test]
    async fn test_truncated_body_is_length_mismatch() {
        let url = serve_raw(10, b"abcd", 4, Duration::ZERO).await;

        let mut sink = MemorySink::new();
        let err = transport()
            .fetch_chunk(&url, &BTreeMap::new(), &mut sink, &SilentObserver)
            .await
            .unwrap_err();

        assert!(
            matches!(err, Error::ContentLengthMismatch { expected: 10, actual: 4 }),
            "{err:?}"
        );
        assert!(err.is_retryable());
        assert_eq!(sink.as_bytes(), b"abcd");
    }

    #[tokio::test]
    async fn test_slow_body_outlasting_timeout_completes() {
        // About 3s in total, never idle for the full 1s timeout
        let url = serve_raw(10, b"0123456789", 1, Duration::from_millis(300)).await;

        let mut sink = MemorySink::new();
        let written = HttpTransport::new(Duration::from_secs(1))
            .unwrap()
            .fetch_chunk(&url, &BTreeMap::new(), &mut sink, &SilentObserver)
            .await
            .unwrap();

        assert_eq!(written, 10);
        assert_eq!(sink.as_bytes(), b"0123456789");
    }

    #[tokio::test]
    async fn test_stalled_body_times_out() {
        let url = serve_raw(2, b"ab", 1, Duration::from_secs(3)).await;

        let mut sink = MemorySink::new();
        let err = HttpTransport::new(Duration::from_millis(500))
            .unwrap()
            .fetch_chunk(&url, &BTreeMap::new(), &mut sink, &SilentObserver)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RetryableIoError(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_fetch_chunk_404_is_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("XXXX"))
            .mount(&server)
            .await;

        let mut sink = MemorySink::new();
        let err = transport()
            .fetch_chunk(
                &format!("{}/missing", server.uri()),
                &BTreeMap::new(),
                &mut sink,
                &SilentObserver,
            )
            .await
            .unwrap_err();

        match err {
            Error::ClientError { status, body, .. } => {
                assert_eq!(status, 404);
                assert_eq!(body, "XXXX");
            }
            other => panic!("Expected client error, got {other:?}"),
        }
        assert!(sink.as_bytes().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_chunk_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut sink = MemorySink::new();
        let err = transport()
            .fetch_chunk(&server.uri(), &BTreeMap::new(), &mut sink, &SilentObserver)
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "{err:?}");
    }

    #[tokio::test]
    async fn test_connection_refused_is_retryable() {
        // Bind then drop a server so the port is closed
        let uri = {
            let server = MockServer::start().await;
            server.uri()
        };

        let mut sink = MemorySink::new();
        let err = transport()
            .fetch_chunk(&uri, &BTreeMap::new(), &mut sink, &SilentObserver)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RetryableIoError(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_fetch_ticket() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/reads/NA12878"))
            .and(header("authorization", "Bearer abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"htsget":{"format":"BAM","urls":[{"url":"http://x/data1"}]}}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer abc".to_string());

        let ticket = transport()
            .fetch_ticket(&format!("{}/reads/NA12878", server.uri()), &headers)
            .await
            .unwrap();
        assert_eq!(ticket.urls.len(), 1);
        assert_eq!(ticket.urls[0].url, "http://x/data1");
    }

    #[tokio::test]
    async fn test_fetch_ticket_not_json() {
        let server = MockServer::start().await;
        let mut body = b" ".repeat(100);
        body.extend(b"0".repeat(1024));
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&server)
            .await;

        let err = transport()
            .fetch_ticket(&server.uri(), &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidLeadingJsonError('0')));
    }
}
