//! Transfer options and HTTP body streaming for htsget-dl
//!
//! Provides the option set shared by every step of a transfer and the
//! AsyncRead adapter used to pull chunk bodies in bounded pieces.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::TryStreamExt;
use tokio::io::AsyncRead;

/// Default number of retries per step
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default wait between retries
pub const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(5);

/// Default socket timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default size of the pieces a chunk body is read in
pub const DEFAULT_PIECE_SIZE: usize = 64 * 1024;

/// How the wait grows between consecutive retries of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Always wait `retry_wait`
    #[default]
    Fixed,
    /// Wait `retry_wait * 2^(attempt - 1)`
    Exponential,
}

impl Backoff {
    /// Wait before retry number `attempt` (1-based)
    pub fn delay(&self, base: Duration, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed => base,
            Backoff::Exponential => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                base.saturating_mul(factor)
            }
        }
    }
}

/// Options for one transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    /// Maximum retries of each retried step (ticket request, HTTP chunk)
    pub max_retries: u32,

    /// Base wait between retries
    pub retry_wait: Duration,

    pub backoff: Backoff,

    /// Socket timeout for every request
    pub timeout: Duration,

    /// OAuth2 bearer token for the ticket server
    pub bearer_token: Option<String>,

    /// Extra headers for the ticket request
    pub headers: Option<BTreeMap<String, String>>,

    /// Buffer size for streaming chunk bodies
    pub piece_size: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_wait: DEFAULT_RETRY_WAIT,
            backoff: Backoff::default(),
            timeout: DEFAULT_TIMEOUT,
            bearer_token: None,
            headers: None,
            piece_size: DEFAULT_PIECE_SIZE,
        }
    }
}

impl TransferOptions {
    /// Headers sent with the ticket request
    ///
    /// The bearer token, when present, replaces any user-supplied
    /// `Authorization` header.
    pub fn ticket_headers(&self) -> BTreeMap<String, String> {
        let mut headers: BTreeMap<String, String> = self
            .headers
            .iter()
            .flatten()
            .filter(|(name, _)| {
                self.bearer_token.is_none() || !name.eq_ignore_ascii_case("authorization")
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        if let Some(token) = &self.bearer_token {
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        }
        headers
    }
}

/// Wraps an HTTP response body as an AsyncRead
pub fn create_body_reader(response: reqwest::Response) -> impl AsyncRead + Send + Unpin {
    tokio_util::io::StreamReader::new(
        response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
    )
}
