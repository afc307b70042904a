//! Error types for htsget-dl
//!
//! Every failure a transfer can end with is a variant of [`Error`]. The
//! retry controller only ever retries the variants for which
//! [`Error::is_retryable`] returns true; everything else reaches the caller
//! untouched.

use std::fmt;

use serde::Deserialize;

/// Main error type for htsget-dl operations
#[derive(Debug)]
pub enum Error {
    /// Ticket response body is not valid UTF-8
    TicketDecodeError(String),

    /// Ticket response body is empty or only whitespace
    EmptyTicketError,

    /// First non-whitespace character of the ticket is not `{`
    InvalidLeadingJsonError(char),

    /// Ticket response is not syntactically valid JSON
    InvalidJsonError(serde_json::Error),

    /// Ticket JSON lacks the `htsget` root object or has the wrong shape
    MalformedJsonError(String),

    /// Ticket references a URL whose scheme is neither http(s) nor data
    UnsupportedScheme(String),

    /// Inline `data:` URI that cannot be decoded
    InvalidDataUri(String),

    /// Transport failure worth retrying (connection reset, timeout, 5xx, ...)
    RetryableIoError(String),

    /// Body length differs from the declared Content-Length
    ContentLengthMismatch { expected: u64, actual: u64 },

    /// Request rejected by the server (4xx); carries the response body
    ClientError {
        status: u16,
        url: String,
        body: String,
    },

    /// Invalid configuration or parameters
    InvalidInput(String),

    /// Local I/O error on the output sink
    IoError(std::io::Error),

    /// Transfer aborted by an external interrupt
    Interrupted,
}

impl Error {
    /// Returns true for transient failures the retry controller may retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RetryableIoError(_) | Error::ContentLengthMismatch { .. }
        )
    }

    /// Wrap any transport-level failure as retryable, keeping its causes
    pub fn retryable(err: impl std::error::Error) -> Self {
        Error::RetryableIoError(describe_chain(&err))
    }
}

/// Render an error followed by each distinct cause in its source chain
pub(crate) fn describe_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !text.is_empty() && !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Structured error document an htsget server may return with a 4xx status
#[derive(Deserialize)]
struct ErrorDocument {
    htsget: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    message: Option<String>,
}

/// Render a client error body, preferring the htsget error document form
fn describe_body(body: &str) -> String {
    match serde_json::from_str::<ErrorDocument>(body) {
        Ok(doc) => match doc.htsget.message {
            Some(message) => format!("{}: {}", doc.htsget.error, message),
            None => doc.htsget.error,
        },
        Err(_) => body.trim().to_string(),
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TicketDecodeError(msg) => {
                write!(f, "Ticket response is not valid UTF-8: {msg}")
            }
            Error::EmptyTicketError => {
                write!(f, "Ticket response is empty")
            }
            Error::InvalidLeadingJsonError(c) => {
                write!(f, "Ticket response is not JSON: unexpected leading character {c:?}")
            }
            Error::InvalidJsonError(err) => {
                write!(f, "Ticket response is not valid JSON: {err}")
            }
            Error::MalformedJsonError(msg) => {
                write!(f, "Malformed ticket: {msg}")
            }
            Error::UnsupportedScheme(url) => {
                write!(f, "Unsupported URL scheme in ticket: {url}")
            }
            Error::InvalidDataUri(msg) => {
                write!(f, "Invalid data URI: {msg}")
            }
            Error::RetryableIoError(msg) => {
                write!(f, "Network error: {msg}")
            }
            Error::ContentLengthMismatch { expected, actual } => {
                write!(f, "Length mismatch {expected} != {actual}")
            }
            Error::ClientError { status, url, body } => {
                let detail = describe_body(body);
                if detail.is_empty() {
                    write!(f, "Client error {status} for {url}")
                } else {
                    write!(f, "Client error {status} for {url}: {detail}")
                }
            }
            Error::InvalidInput(msg) => {
                write!(f, "Invalid input: {msg}")
            }
            Error::IoError(err) => {
                write!(f, "I/O error: {err}")
            }
            Error::Interrupted => {
                write!(f, "interrupted")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            Error::InvalidJsonError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::Interrupted {
            return Error::Interrupted;
        }
        Error::IoError(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            Error::InvalidInput(describe_chain(&err))
        } else {
            Error::RetryableIoError(describe_chain(&err))
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidInput(format!("invalid URL: {err}"))
    }
}

/// Convenience result type for htsget-dl operations
pub type Result<T> = std::result::Result<T, Error>;
