//! Ticket request parameters and ticket URL construction
//!
//! The ticket URL is the caller's base URL with the request parameters
//! merged into its query string. Pre-existing query pairs keep their
//! relative order; a parameter this module owns replaces every existing
//! value for the same key in place of its first occurrence.

use url::Url;

use crate::core::error::Result;

/// Query key for the reference sequence name
pub const REFERENCE_NAME_KEY: &str = "referenceName";

/// Query key for the reference sequence checksum
pub const REFERENCE_MD5_KEY: &str = "referenceMD5";

/// Parameters of a single top-level ticket request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketRequest {
    /// Base URL of the object, e.g. `https://example.com/reads/NA12878`
    pub url: String,

    /// Reference sequence name, e.g. `chr1`
    pub reference_name: Option<String>,

    /// Lower-case hex MD5 of the upper-cased, whitespace-stripped reference
    pub reference_md5: Option<String>,

    /// 0-based inclusive start
    pub start: Option<u64>,

    /// 0-based exclusive end
    pub end: Option<u64>,

    /// Requested data format, sent upper-cased
    pub format: Option<String>,

    /// Reserved; not sent
    pub fields: Option<Vec<String>>,

    /// Reserved; not sent
    pub tags: Option<Vec<String>>,

    /// Reserved; not sent
    pub notags: Option<Vec<String>>,
}

impl TicketRequest {
    /// Request everything available at `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_reference_name(mut self, name: impl Into<String>) -> Self {
        self.reference_name = Some(name.into());
        self
    }

    pub fn with_reference_md5(mut self, md5: impl Into<String>) -> Self {
        self.reference_md5 = Some(md5.into());
        self
    }

    pub fn with_range(mut self, start: Option<u64>, end: Option<u64>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Query pairs this request contributes, in a fixed order
    fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(name) = &self.reference_name {
            params.push((REFERENCE_NAME_KEY, name.clone()));
        }
        if let Some(md5) = &self.reference_md5 {
            params.push((REFERENCE_MD5_KEY, md5.clone()));
        }
        if let Some(start) = self.start {
            params.push(("start", start.to_string()));
        }
        if let Some(end) = self.end {
            params.push(("end", end.to_string()));
        }
        if let Some(format) = &self.format {
            params.push(("format", format.to_uppercase()));
        }
        params
    }

    /// Build the ticket request URL for these parameters
    pub fn ticket_url(&self) -> Result<String> {
        build_ticket_url(&self.url, self)
    }
}

/// Replace all values of `key` with `value`, or append the pair if absent
fn upsert(pairs: &mut Vec<(String, String)>, key: &str, value: String) {
    let mut seen = false;
    pairs.retain_mut(|(k, v)| {
        if k != key {
            return true;
        }
        if seen {
            return false;
        }
        seen = true;
        *v = value.clone();
        true
    });
    if !seen {
        pairs.push((key.to_string(), value));
    }
}

/// Merge `params` into the query string of `base_url`
///
/// The fragment is dropped. No network I/O; applying the same parameters to
/// the result again yields the same URL.
pub fn build_ticket_url(base_url: &str, params: &TicketRequest) -> Result<String> {
    let mut url = Url::parse(base_url)?;

    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    for (key, value) in params.query_params() {
        upsert(&mut pairs, key, value);
    }

    url.set_fragment(None);
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(&pairs);
    }

    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_of(url: &str) -> Vec<(String, String)> {
        Url::parse(url).unwrap().query_pairs().into_owned().collect()
    }

    fn values(pairs: &[(String, String)], key: &str) -> Vec<String> {
        pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    #[test]
    fn test_defaults_leave_url_untouched() {
        let url = TicketRequest::new("http://example.com/reads/1").ticket_url().unwrap();
        assert_eq!(url, "http://example.com/reads/1");
    }

    #[test]
    fn test_reference_name_and_range() {
        let request = TicketRequest::new("http://example.co.uk/path/to/resource")
            .with_reference_name("1")
            .with_range(Some(2), Some(100));
        let url = Url::parse(&request.ticket_url().unwrap()).unwrap();

        assert_eq!(url.scheme(), "http");
        assert_eq!(url.host_str(), Some("example.co.uk"));
        assert_eq!(url.path(), "/path/to/resource");

        let pairs = query_of(url.as_str());
        assert_eq!(values(&pairs, "referenceName"), vec!["1"]);
        assert_eq!(values(&pairs, "start"), vec!["2"]);
        assert_eq!(values(&pairs, "end"), vec!["100"]);
        assert_eq!(pairs.len(), 3);
    }

    #[test]
    fn test_reference_md5_key() {
        let md5 = "b9185d4fade27aa27e17f25fafec695f";
        let request = TicketRequest::new("https://example.com/resource").with_reference_md5(md5);
        let pairs = query_of(&request.ticket_url().unwrap());
        assert_eq!(pairs, vec![("referenceMD5".to_string(), md5.to_string())]);
    }

    #[test]
    fn test_format_is_upper_cased() {
        for format in ["cram", "CRAM", "BaM"] {
            let request = TicketRequest::new("http://example.co.uk/x").with_format(format);
            let pairs = query_of(&request.ticket_url().unwrap());
            assert_eq!(values(&pairs, "format"), vec![format.to_uppercase()]);
        }
    }

    #[test]
    fn test_large_coordinates_are_not_padded() {
        let request = TicketRequest::new("http://a.com/x")
            .with_reference_name("chr2")
            .with_range(Some(0), Some(1 << 32));
        let pairs = query_of(&request.ticket_url().unwrap());
        assert_eq!(values(&pairs, "start"), vec!["0"]);
        assert_eq!(values(&pairs, "end"), vec!["4294967296"]);
    }

    #[test]
    fn test_netloc_and_port_preserved() {
        let url = TicketRequest::new("https://192.168.0.1:8080/xyz")
            .with_reference_name("X")
            .ticket_url()
            .unwrap();
        assert!(url.starts_with("https://192.168.0.1:8080/xyz?"));
    }

    #[test]
    fn test_embedded_query_strings_preserved() {
        let request = TicketRequest::new("http://a.com/stuff?a=a&b=b").with_reference_name("123");
        let pairs = query_of(&request.ticket_url().unwrap());
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "a".to_string()),
                ("b".to_string(), "b".to_string()),
                ("referenceName".to_string(), "123".to_string()),
            ]
        );
    }

    #[test]
    fn test_existing_key_is_overwritten_in_place() {
        let request = TicketRequest::new("http://a.com/x?format=bam&z=1&format=sam")
            .with_format("cram");
        let pairs = query_of(&request.ticket_url().unwrap());
        assert_eq!(
            pairs,
            vec![
                ("format".to_string(), "CRAM".to_string()),
                ("z".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn test_duplicate_unrelated_keys_kept_in_order() {
        let request = TicketRequest::new("http://a.com/x?a=1&b=2&a=3").with_reference_name("chr1");
        let pairs = query_of(&request.ticket_url().unwrap());
        assert_eq!(values(&pairs, "a"), vec!["1", "3"]);
        assert_eq!(pairs[0].0, "a");
        assert_eq!(pairs[1].0, "b");
        assert_eq!(pairs[2].0, "a");
    }

    #[test]
    fn test_fragment_is_dropped() {
        let url = TicketRequest::new("http://a.com/x?q=1#section")
            .with_reference_name("chr1")
            .ticket_url()
            .unwrap();
        assert!(!url.contains('#'));
    }

    #[test]
    fn test_idempotent() {
        let request = TicketRequest::new("http://a.com/x?keep=yes")
            .with_reference_name("chr 1")
            .with_range(Some(5), None)
            .with_format("bam");
        let once = request.ticket_url().unwrap();
        let twice = build_ticket_url(&once, &request).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_reserved_filters_are_not_sent() {
        let request = TicketRequest {
            fields: Some(vec!["QNAME".to_string()]),
            tags: Some(vec!["MD".to_string()]),
            notags: Some(vec!["NM".to_string()]),
            ..TicketRequest::new("http://a.com/x")
        };
        assert_eq!(request.ticket_url().unwrap(), "http://a.com/x");
    }

    #[test]
    fn test_invalid_base_url() {
        let err = TicketRequest::new("not a url").ticket_url().unwrap_err();
        assert!(matches!(err, crate::core::error::Error::InvalidInput(_)));
    }
}
