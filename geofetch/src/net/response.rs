//! HTTP/1.x response model and head parsing.

use crate::net::types::NetError;
use bytes::Bytes;

/// A case-insensitive header multimap.
///
/// Names are normalized to lowercase on insertion; lookups take any case.
/// Duplicate names keep their first value, which is the one freshness
/// decisions act on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header.
    pub fn insert(&mut self, name: &str, value: &str) {
        self.entries
            .push((name.to_ascii_lowercase(), value.to_string()));
    }

    /// Look up the first value for a name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether any value for `name` contains `token` as a comma-separated
    /// element, case-insensitively. Used for `Connection` and
    /// `Transfer-Encoding` token tests.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        let header = self.to_ascii_lower(name);
        header
            .iter()
            .flat_map(|value| value.split(','))
            .any(|part| part.trim() == token)
    }

    fn to_ascii_lower(&self, name: &str) -> Vec<String> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .filter(|(n, _)| *n == name)
            .map(|(_, v)| v.to_ascii_lowercase())
            .collect()
    }

    /// Number of header lines.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A complete HTTP response, body materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code
    pub status: u16,
    /// Response headers
    pub headers: Headers,
    /// Response body; empty for bodiless statuses
    pub body: Bytes,
}

/// The parsed status line and headers of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponseHead {
    /// True for HTTP/1.1, false for HTTP/1.0
    pub http11: bool,
    pub status: u16,
    pub headers: Headers,
}

/// How the remainder of a response's bytes are delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyFraming {
    /// Exactly this many bytes follow
    Length(usize),
    /// `Transfer-Encoding: chunked`
    Chunked,
    /// Body runs to connection close; the connection is not reusable
    UntilClose,
}

/// Parse a response head (everything before the blank line, exclusive).
pub(crate) fn parse_head(raw: &[u8]) -> Result<ResponseHead, NetError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| NetError::Protocol("non-UTF-8 response head".to_string()))?;
    let mut lines = text.split("\r\n");

    let status_line = lines
        .next()
        .ok_or_else(|| NetError::Protocol("empty response head".to_string()))?;
    let (http11, status) = parse_status_line(status_line)?;

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        // Obsolete line folding is rejected rather than unfolded.
        if line.starts_with(' ') || line.starts_with('\t') {
            return Err(NetError::Protocol("folded header line".to_string()));
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| NetError::Protocol(format!("malformed header line \"{line}\"")))?;
        headers.insert(name.trim(), value.trim());
    }

    Ok(ResponseHead {
        http11,
        status,
        headers,
    })
}

fn parse_status_line(line: &str) -> Result<(bool, u16), NetError> {
    let mut parts = line.splitn(3, ' ');
    let version = parts
        .next()
        .ok_or_else(|| NetError::Protocol("missing HTTP version".to_string()))?;
    let http11 = match version {
        "HTTP/1.1" => true,
        "HTTP/1.0" => false,
        other => {
            return Err(NetError::Protocol(format!(
                "unsupported HTTP version \"{other}\""
            )))
        }
    };
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (100..=599).contains(code))
        .ok_or_else(|| NetError::Protocol(format!("malformed status line \"{line}\"")))?;
    Ok((http11, status))
}

/// Decide how the response body is delimited.
pub(crate) fn body_framing(status: u16, headers: &Headers) -> Result<BodyFraming, NetError> {
    // These statuses never carry a body regardless of framing headers.
    if matches!(status, 100..=199 | 204 | 304) {
        return Ok(BodyFraming::Length(0));
    }

    if headers.has_token("transfer-encoding", "chunked") {
        return Ok(BodyFraming::Chunked);
    }

    match headers.get("content-length") {
        Some(value) => value
            .trim()
            .parse::<usize>()
            .map(BodyFraming::Length)
            .map_err(|_| NetError::Protocol(format!("bad Content-Length \"{value}\""))),
        None => Ok(BodyFraming::UntilClose),
    }
}

/// Whether the server is willing to take another request on this
/// connection: HTTP/1.1 defaults to yes unless `Connection: close`,
/// HTTP/1.0 defaults to no unless `Connection: keep-alive`.
pub(crate) fn keep_alive(http11: bool, headers: &Headers) -> bool {
    if http11 {
        !headers.has_token("connection", "close")
    } else {
        headers.has_token("connection", "keep-alive")
    }
}
