//! Ticket parsing
//!
//! A ticket is the JSON document an htsget server returns for a ticket
//! request. [`TicketReader`] accepts the response body piece by piece so a
//! body that cannot be JSON is rejected as soon as its first non-whitespace
//! character arrives; the document itself is parsed once, in full.

use std::collections::BTreeMap;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::core::error::{Error, Result};

/// Root key of every ticket document
pub const TICKET_ROOT_KEY: &str = "htsget";

/// Format reported when the ticket does not name one
pub const DEFAULT_FORMAT: &str = "BAM";

fn default_format() -> String {
    DEFAULT_FORMAT.to_string()
}

/// Parsed contents of the ticket's root object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    #[serde(default = "default_format")]
    pub format: String,

    #[serde(default)]
    pub md5: Option<String>,

    /// Resources in output order
    #[serde(default)]
    pub urls: Vec<TicketUrl>,
}

/// Which part of the data stream a resource carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataClass {
    Header,
    Body,
    /// Any class this client does not know
    #[serde(other)]
    Other,
}

/// One entry of the ticket's `urls` array, as sent by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketUrl {
    pub url: String,

    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,

    #[serde(default)]
    pub class: Option<DataClass>,
}

/// A resource the chunk fetcher knows how to retrieve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// Remote object fetched with a GET carrying `headers`
    Http {
        url: String,
        headers: BTreeMap<String, String>,
    },
    /// `data:` URI whose payload is written verbatim
    Inline { uri: String },
}

impl TicketUrl {
    /// Classify this entry by URL scheme
    pub fn resource(&self) -> Result<Resource> {
        let parsed =
            Url::parse(&self.url).map_err(|_| Error::UnsupportedScheme(self.url.clone()))?;

        match parsed.scheme() {
            "http" | "https" => Ok(Resource::Http {
                url: self.url.clone(),
                headers: self.headers.clone().unwrap_or_default(),
            }),
            "data" => Ok(Resource::Inline {
                uri: self.url.clone(),
            }),
            _ => Err(Error::UnsupportedScheme(self.url.clone())),
        }
    }
}

impl Resource {
    /// Short description for logs; never includes inline payloads
    pub fn describe(&self) -> String {
        match self {
            Resource::Http { url, .. } => url.clone(),
            Resource::Inline { uri } => {
                let media = uri.split(',').next().unwrap_or(uri);
                format!("{media},... ({} bytes encoded)", uri.len())
            }
        }
    }
}

/// Incremental ticket body reader
#[derive(Debug, Default)]
pub struct TicketReader {
    buffer: BytesMut,
    leading_checked: bool,
}

impl TicketReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one piece of the body, failing fast on a non-JSON prefix
    pub fn push(&mut self, piece: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(piece);
        if !self.leading_checked {
            self.check_leading()?;
        }
        Ok(())
    }

    fn check_leading(&mut self) -> Result<()> {
        let leading = {
            let text = match std::str::from_utf8(&self.buffer) {
                Ok(text) => text,
                Err(e) if e.error_len().is_some() => {
                    return Err(Error::TicketDecodeError(e.to_string()));
                }
                // Truncated multi-byte sequence; wait for the next piece
                Err(e) => std::str::from_utf8(&self.buffer[..e.valid_up_to()]).unwrap_or(""),
            };
            text.chars().find(|c| !c.is_whitespace())
        };

        match leading {
            Some('{') => {
                self.leading_checked = true;
                Ok(())
            }
            Some(c) => Err(Error::InvalidLeadingJsonError(c)),
            None => Ok(()),
        }
    }

    /// Parse everything pushed so far as one ticket document
    pub fn finish(self) -> Result<Ticket> {
        let text = std::str::from_utf8(&self.buffer)
            .map_err(|e| Error::TicketDecodeError(e.to_string()))?;

        let trimmed = text.trim_start();
        match trimmed.chars().next() {
            None => return Err(Error::EmptyTicketError),
            Some('{') => {}
            Some(c) => return Err(Error::InvalidLeadingJsonError(c)),
        }

        parse_document(trimmed)
    }
}

fn parse_document(text: &str) -> Result<Ticket> {
    let parsed: Value = serde_json::from_str(text).map_err(Error::InvalidJsonError)?;

    let root = match parsed {
        Value::Object(mut map) => map.remove(TICKET_ROOT_KEY),
        _ => None,
    }
    .ok_or_else(|| {
        Error::MalformedJsonError(format!("missing '{TICKET_ROOT_KEY}' root object"))
    })?;

    serde_json::from_value(root).map_err(|e| Error::MalformedJsonError(e.to_string()))
}

/// Parse a complete ticket body
pub fn parse_ticket(raw: &[u8]) -> Result<Ticket> {
    parse_ticket_pieces(std::iter::once(raw))
}

/// Parse a ticket body delivered as a lazy sequence of pieces
///
/// Pieces after a failing leading-character check are never pulled.
pub fn parse_ticket_pieces<I, B>(pieces: I) -> Result<Ticket>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut reader = TicketReader::new();
    for piece in pieces {
        reader.push(piece.as_ref())?;
    }
    reader.finish()
}
