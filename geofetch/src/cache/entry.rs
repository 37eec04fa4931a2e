//! The freshness and validity model for one cached HTTP response.
//!
//! A [`CacheEntry`] is constructed either from a live response's status and
//! headers or by deserializing a cache file; it is immutable once built.
//! Revalidation never mutates an entry in place, it produces a new one via
//! [`CacheEntry::revalidated`].
//!
//! # Cache file layout
//!
//! ```text
//! byte    format version
//! byte    status          (0=NotFound, 1=Success, 2=Redirect, 0xFF=NotModified)
//! int64   fetch time      (epoch millis, big endian)
//! int64   stale at        (epoch millis, -1 = never goes stale)
//! int64   expire at       (epoch millis)
//! int32   etag length     (-1 = absent)
//! bytes   etag            (ASCII, present iff length >= 0)
//! -- status == Redirect:
//! int32   location length
//! bytes   location        (UTF-8)
//! -- status == Success:
//! bytes   body            (remainder of file)
//! ```

use crate::cache::control::CacheControl;
use crate::net::Headers;
use crate::time::{format_http_date_millis, now_millis, parse_http_date_millis};
use bytes::Bytes;
use thiserror::Error;

/// Current cache file format version.
pub const CACHE_FORMAT_VERSION: u8 = 1;

/// Sentinel for "never goes stale on its own".
pub const NEVER: i64 = -1;

const STATUS_NOT_FOUND: u8 = 0;
const STATUS_SUCCESS: u8 = 1;
const STATUS_REDIRECT: u8 = 2;
const STATUS_NOT_MODIFIED: u8 = 0xFF;

/// Resolution of a cached response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// The origin answered 404; "missing" is a cacheable fact.
    NotFound,
    /// A 2xx response with a body.
    Success,
    /// A non-304 3xx response pointing at another URL.
    Redirect,
    /// A 304 response to a conditional request. Only ever constructed
    /// transiently; never persisted standalone.
    NotModified,
}

impl EntryStatus {
    fn to_byte(self) -> u8 {
        match self {
            EntryStatus::NotFound => STATUS_NOT_FOUND,
            EntryStatus::Success => STATUS_SUCCESS,
            EntryStatus::Redirect => STATUS_REDIRECT,
            EntryStatus::NotModified => STATUS_NOT_MODIFIED,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, CodecError> {
        match byte {
            STATUS_NOT_FOUND => Ok(EntryStatus::NotFound),
            STATUS_SUCCESS => Ok(EntryStatus::Success),
            STATUS_REDIRECT => Ok(EntryStatus::Redirect),
            STATUS_NOT_MODIFIED => Ok(EntryStatus::NotModified),
            other => Err(CodecError::InvalidStatus(other)),
        }
    }
}

/// Errors mapping an HTTP response onto a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    /// The status code has no cache semantics in this engine.
    #[error("unhandled HTTP status {0}")]
    UnknownStatus(u16),
    /// A redirect response arrived without a Location header.
    #[error("redirect response missing Location header")]
    MissingLocation,
}

/// Errors decoding a cache file.
///
/// All of these are treated as a cache miss by callers; a corrupt file is
/// never surfaced to a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("cache format version {0} does not match {CACHE_FORMAT_VERSION}")]
    VersionMismatch(u8),
    #[error("invalid status byte {0}")]
    InvalidStatus(u8),
    #[error("cache file truncated")]
    Truncated,
    #[error("non-UTF-8 string field")]
    InvalidString,
}

/// Freshness metadata for one cached response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// How the origin resolved the URL.
    pub status: EntryStatus,
    /// When the response was produced (from `Date`, else receipt time).
    pub fetch_time: i64,
    /// When the entry starts needing revalidation; [`NEVER`] if it does
    /// not go stale on its own.
    pub stale_at: i64,
    /// When the entry stops being usable at all, even as stale fallback.
    pub expire_at: i64,
    /// Validator for conditional requests.
    pub etag: Option<String>,
    /// Redirect target; present iff `status == Redirect`.
    pub location: Option<String>,
    /// `no-cache`/`no-store` was set; the entry must not be persisted.
    pub no_store: bool,
}

impl CacheEntry {
    /// Build an entry from a live response's status code and headers.
    ///
    /// `fallback_ttl_millis` is the configured expiry window used when the
    /// response carries no usable expiry information of its own.
    ///
    /// # Errors
    ///
    /// [`EntryError::UnknownStatus`] for statuses outside
    /// {2xx, 3xx, 404}, and [`EntryError::MissingLocation`] for a
    /// redirect without a target.
    pub fn from_response(
        status_code: u16,
        headers: &Headers,
        fallback_ttl_millis: i64,
    ) -> Result<Self, EntryError> {
        let status = match status_code {
            200..=299 => EntryStatus::Success,
            304 => EntryStatus::NotModified,
            300..=399 => EntryStatus::Redirect,
            404 => EntryStatus::NotFound,
            other => return Err(EntryError::UnknownStatus(other)),
        };

        let location = match status {
            EntryStatus::Redirect => Some(
                headers
                    .get("location")
                    .ok_or(EntryError::MissingLocation)?
                    .to_string(),
            ),
            _ => None,
        };

        let mut entry = Self::freshness_from_headers(headers, fallback_ttl_millis);
        entry.status = status;
        entry.location = location;
        Ok(entry)
    }

    /// Build the entry that replaces `old` after a `304 Not Modified`.
    ///
    /// The resolution (status, redirect target, body — stored separately)
    /// carries forward from the old entry; the freshness window and
    /// validator come from the 304's headers.
    pub fn revalidated(old: &Self, headers: &Headers, fallback_ttl_millis: i64) -> Self {
        let mut entry = Self::freshness_from_headers(headers, fallback_ttl_millis);
        entry.status = old.status;
        entry.location = old.location.clone();
        if entry.etag.is_none() {
            entry.etag = old.etag.clone();
        }
        entry
    }

    /// Shared freshness computation: fetch time, staleness, expiry,
    /// validator, and storage suppression from a header set.
    fn freshness_from_headers(headers: &Headers, fallback_ttl_millis: i64) -> Self {
        let fetch_time = headers
            .get("date")
            .and_then(parse_http_date_millis)
            .unwrap_or_else(now_millis);

        let control = CacheControl::parse(headers.get("cache-control").unwrap_or(""));
        let etag = headers.get("etag").map(str::to_string);

        // An immutable response never needs revalidation. Otherwise it goes
        // stale after max-age, or immediately when an ETag offers a cheap
        // revalidation path, or never.
        let stale_at = if control.immutable {
            NEVER
        } else if let Some(max_age) = control.max_age {
            fetch_time.saturating_add(max_age.saturating_mul(1000))
        } else if etag.is_some() {
            fetch_time
        } else {
            NEVER
        };

        let fallback_expiry = fetch_time.saturating_add(fallback_ttl_millis);
        let mut expire_at = fallback_expiry;
        if let Some(expires) = headers.get("expires").and_then(parse_http_date_millis) {
            expire_at = expire_at.max(expires);
        }
        if let Some(swr) = control.stale_while_revalidate {
            expire_at = expire_at.max(fetch_time.saturating_add(swr.saturating_mul(1000)));
        }
        if expire_at < fetch_time {
            expire_at = fallback_expiry;
        }

        Self {
            status: EntryStatus::Success,
            fetch_time,
            stale_at,
            expire_at,
            etag,
            location: None,
            no_store: control.suppresses_storage(),
        }
    }

    /// Whether the entry needs revalidation before being served.
    pub fn is_stale(&self, now: i64) -> bool {
        self.stale_at >= 0 && now >= self.stale_at
    }

    /// Whether the entry is unusable entirely, stale fallback included.
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expire_at
    }

    /// Add conditional-request headers for revalidating this entry.
    ///
    /// Prefers `If-None-Match` when a validator is present, falling back
    /// to `If-Modified-Since` derived from the fetch time.
    pub fn touch(&self, headers: &mut Vec<(String, String)>) {
        match &self.etag {
            Some(etag) => headers.push(("If-None-Match".to_string(), etag.clone())),
            None => headers.push((
                "If-Modified-Since".to_string(),
                format_http_date_millis(self.fetch_time),
            )),
        }
    }

    /// Serialize the entry (and, for `Success`, its body) into the cache
    /// file layout.
    pub fn encode(&self, body: Option<&[u8]>) -> Vec<u8> {
        let body = body.unwrap_or_default();
        let mut out = Vec::with_capacity(64 + body.len());

        out.push(CACHE_FORMAT_VERSION);
        out.push(self.status.to_byte());
        out.extend_from_slice(&self.fetch_time.to_be_bytes());
        out.extend_from_slice(&self.stale_at.to_be_bytes());
        out.extend_from_slice(&self.expire_at.to_be_bytes());

        match &self.etag {
            Some(etag) => {
                out.extend_from_slice(&(etag.len() as i32).to_be_bytes());
                out.extend_from_slice(etag.as_bytes());
            }
            None => out.extend_from_slice(&(-1i32).to_be_bytes()),
        }

        if self.status == EntryStatus::Redirect {
            let location = self.location.as_deref().unwrap_or("");
            out.extend_from_slice(&(location.len() as i32).to_be_bytes());
            out.extend_from_slice(location.as_bytes());
        }

        if self.status == EntryStatus::Success {
            out.extend_from_slice(body);
        }

        out
    }

    /// Deserialize a cache file into an entry and, for `Success`, its body.
    pub fn decode(buf: &[u8]) -> Result<(Self, Option<Bytes>), CodecError> {
        let mut reader = Reader::new(buf);
        let entry = Self::decode_inner(&mut reader)?;
        let body = match entry.status {
            EntryStatus::Success => Some(Bytes::copy_from_slice(reader.rest())),
            _ => None,
        };
        Ok((entry, body))
    }

    /// Deserialize only the metadata header, ignoring any body bytes.
    ///
    /// Pruning uses this on a bounded prefix of each file so it never has
    /// to read large bodies just to evaluate expiry.
    pub fn decode_prefix(buf: &[u8]) -> Result<Self, CodecError> {
        Self::decode_inner(&mut Reader::new(buf))
    }

    fn decode_inner(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let version = reader.read_u8()?;
        if version != CACHE_FORMAT_VERSION {
            return Err(CodecError::VersionMismatch(version));
        }

        let status = EntryStatus::from_byte(reader.read_u8()?)?;
        let fetch_time = reader.read_i64()?;
        let stale_at = reader.read_i64()?;
        let expire_at = reader.read_i64()?;

        let etag = match reader.read_i32()? {
            len if len < 0 => None,
            len => Some(reader.read_string(len as usize)?),
        };

        let location = if status == EntryStatus::Redirect {
            let len = reader.read_i32()?;
            if len < 0 {
                return Err(CodecError::Truncated);
            }
            Some(reader.read_string(len as usize)?)
        } else {
            None
        };

        Ok(Self {
            status,
            fetch_time,
            stale_at,
            expire_at,
            etag,
            location,
            // Suppressed entries are never written, so anything read back
            // from disk is storable by definition.
            no_store: false,
        })
    }
}

/// Bounds-checked big-endian reader over a byte slice.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(len).ok_or(CodecError::Truncated)?;
        if end > self.buf.len() {
            return Err(CodecError::Truncated);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_string(&mut self, len: usize) -> Result<String, CodecError> {
        std::str::from_utf8(self.take(len)?)
            .map(str::to_string)
            .map_err(|_| CodecError::InvalidString)
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Headers;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        let mut h = Headers::new();
        for (name, value) in pairs {
            h.insert(name, value);
        }
        h
    }

    const TTL: i64 = 60 * 60 * 1000;

    #[test]
    fn test_success_with_max_age() {
        let h = headers(&[
            ("Date", "Sun, 06 Nov 1994 08:49:37 GMT"),
            ("Cache-Control", "max-age=60"),
        ]);
        let entry = CacheEntry::from_response(200, &h, TTL).unwrap();

        assert_eq!(entry.status, EntryStatus::Success);
        assert_eq!(entry.fetch_time, 784_111_777_000);
        assert_eq!(entry.stale_at, 784_111_777_000 + 60_000);
        assert_eq!(entry.expire_at, 784_111_777_000 + TTL);
        assert!(!entry.no_store);
    }

    #[test]
    fn test_etag_without_max_age_is_immediately_stale() {
        let h = headers(&[
            ("Date", "Sun, 06 Nov 1994 08:49:37 GMT"),
            ("ETag", "\"v1\""),
        ]);
        let entry = CacheEntry::from_response(200, &h, TTL).unwrap();

        assert_eq!(entry.stale_at, entry.fetch_time);
        assert!(entry.is_stale(entry.fetch_time));
        assert!(!entry.is_expired(entry.fetch_time));
        assert_eq!(entry.etag.as_deref(), Some("\"v1\""));
    }

    #[test]
    fn test_no_validators_never_stale() {
        let h = headers(&[("Date", "Sun, 06 Nov 1994 08:49:37 GMT")]);
        let entry = CacheEntry::from_response(200, &h, TTL).unwrap();

        assert_eq!(entry.stale_at, NEVER);
        assert!(!entry.is_stale(i64::MAX));
    }

    #[test]
    fn test_immutable_never_stale() {
        let h = headers(&[
            ("Date", "Sun, 06 Nov 1994 08:49:37 GMT"),
            ("Cache-Control", "max-age=60, immutable"),
            ("ETag", "\"v1\""),
        ]);
        let entry = CacheEntry::from_response(200, &h, TTL).unwrap();
        assert_eq!(entry.stale_at, NEVER);
    }

    #[test]
    fn test_expires_extends_expiry() {
        let h = headers(&[
            ("Date", "Sun, 06 Nov 1994 08:49:37 GMT"),
            ("Expires", "Mon, 07 Nov 1994 08:49:37 GMT"),
        ]);
        let entry = CacheEntry::from_response(200, &h, TTL).unwrap();
        assert_eq!(entry.expire_at, 784_111_777_000 + 24 * 60 * 60 * 1000);
    }

    #[test]
    fn test_stale_while_revalidate_extends_expiry() {
        let h = headers(&[
            ("Date", "Sun, 06 Nov 1994 08:49:37 GMT"),
            ("Cache-Control", "max-age=60, stale-while-revalidate=7200"),
        ]);
        let entry = CacheEntry::from_response(200, &h, TTL).unwrap();
        // 7200s beats the one-hour fallback TTL.
        assert_eq!(entry.expire_at, 784_111_777_000 + 7_200_000);
        // Stale-while-revalidate may push expiry past staleness.
        assert!(entry.stale_at < entry.expire_at);
    }

    #[test]
    fn test_expires_in_past_falls_back_to_ttl() {
        let h = headers(&[
            ("Date", "Sun, 06 Nov 1994 08:49:37 GMT"),
            ("Expires", "Sat, 05 Nov 1994 08:49:37 GMT"),
        ]);
        let entry = CacheEntry::from_response(200, &h, TTL).unwrap();
        assert_eq!(entry.expire_at, entry.fetch_time + TTL);
        assert!(entry.expire_at >= entry.fetch_time);
    }

    #[test]
    fn test_no_store_marks_entry() {
        let h = headers(&[("Cache-Control", "no-store")]);
        let entry = CacheEntry::from_response(200, &h, TTL).unwrap();
        assert!(entry.no_store);

        let h = headers(&[("Cache-Control", "no-cache")]);
        let entry = CacheEntry::from_response(200, &h, TTL).unwrap();
        assert!(entry.no_store);
    }

    #[test]
    fn test_missing_date_uses_wall_clock() {
        let before = now_millis();
        let entry = CacheEntry::from_response(200, &Headers::new(), TTL).unwrap();
        let after = now_millis();
        assert!(entry.fetch_time >= before && entry.fetch_time <= after);
    }

    #[test]
    fn test_status_mapping() {
        let h = headers(&[("Location", "https://example.com/next")]);

        assert_eq!(
            CacheEntry::from_response(204, &Headers::new(), TTL)
                .unwrap()
                .status,
            EntryStatus::Success
        );
        assert_eq!(
            CacheEntry::from_response(404, &Headers::new(), TTL)
                .unwrap()
                .status,
            EntryStatus::NotFound
        );
        assert_eq!(
            CacheEntry::from_response(304, &Headers::new(), TTL)
                .unwrap()
                .status,
            EntryStatus::NotModified
        );

        let redirect = CacheEntry::from_response(302, &h, TTL).unwrap();
        assert_eq!(redirect.status, EntryStatus::Redirect);
        assert_eq!(redirect.location.as_deref(), Some("https://example.com/next"));
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert_eq!(
            CacheEntry::from_response(500, &Headers::new(), TTL),
            Err(EntryError::UnknownStatus(500))
        );
        assert_eq!(
            CacheEntry::from_response(403, &Headers::new(), TTL),
            Err(EntryError::UnknownStatus(403))
        );
    }

    #[test]
    fn test_redirect_without_location_rejected() {
        assert_eq!(
            CacheEntry::from_response(301, &Headers::new(), TTL),
            Err(EntryError::MissingLocation)
        );
    }

    #[test]
    fn test_touch_prefers_etag() {
        let h = headers(&[
            ("Date", "Sun, 06 Nov 1994 08:49:37 GMT"),
            ("ETag", "\"v3\""),
        ]);
        let entry = CacheEntry::from_response(200, &h, TTL).unwrap();

        let mut request_headers = Vec::new();
        entry.touch(&mut request_headers);
        assert_eq!(
            request_headers,
            vec![("If-None-Match".to_string(), "\"v3\"".to_string())]
        );
    }

    #[test]
    fn test_touch_falls_back_to_modified_since() {
        let h = headers(&[("Date", "Sun, 06 Nov 1994 08:49:37 GMT")]);
        let entry = CacheEntry::from_response(200, &h, TTL).unwrap();

        let mut request_headers = Vec::new();
        entry.touch(&mut request_headers);
        assert_eq!(request_headers.len(), 1);
        assert_eq!(request_headers[0].0, "If-Modified-Since");
        assert_eq!(request_headers[0].1, "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn test_revalidated_carries_resolution_forward() {
        let original = headers(&[
            ("Date", "Sun, 06 Nov 1994 08:49:37 GMT"),
            ("Cache-Control", "max-age=60"),
            ("ETag", "\"v1\""),
        ]);
        let old = CacheEntry::from_response(200, &original, TTL).unwrap();

        let not_modified = headers(&[
            ("Date", "Sun, 06 Nov 1994 09:49:37 GMT"),
            ("Cache-Control", "max-age=120"),
        ]);
        let new = CacheEntry::revalidated(&old, &not_modified, TTL);

        assert_eq!(new.status, EntryStatus::Success);
        assert_eq!(new.fetch_time, old.fetch_time + 3_600_000);
        assert_eq!(new.stale_at, new.fetch_time + 120_000);
        // Validator survives when the 304 does not repeat it.
        assert_eq!(new.etag.as_deref(), Some("\"v1\""));
    }

    fn round_trip(entry: &CacheEntry, body: Option<&[u8]>) -> (CacheEntry, Option<Bytes>) {
        CacheEntry::decode(&entry.encode(body)).unwrap()
    }

    #[test]
    fn test_round_trip_success() {
        let entry = CacheEntry {
            status: EntryStatus::Success,
            fetch_time: 1_700_000_000_000,
            stale_at: 1_700_000_060_000,
            expire_at: 1_700_003_600_000,
            etag: Some("\"abc\"".to_string()),
            location: None,
            no_store: false,
        };
        let (decoded, body) = round_trip(&entry, Some(b"tile bytes"));
        assert_eq!(decoded, entry);
        assert_eq!(body.as_deref(), Some(b"tile bytes".as_slice()));
    }

    #[test]
    fn test_round_trip_success_empty_body() {
        let entry = CacheEntry {
            status: EntryStatus::Success,
            fetch_time: 1,
            stale_at: NEVER,
            expire_at: 2,
            etag: None,
            location: None,
            no_store: false,
        };
        let (decoded, body) = round_trip(&entry, None);
        assert_eq!(decoded, entry);
        assert_eq!(body.as_deref(), Some(b"".as_slice()));
    }

    #[test]
    fn test_round_trip_not_found() {
        let entry = CacheEntry {
            status: EntryStatus::NotFound,
            fetch_time: 1_700_000_000_000,
            stale_at: NEVER,
            expire_at: 1_700_003_600_000,
            etag: None,
            location: None,
            no_store: false,
        };
        let (decoded, body) = round_trip(&entry, None);
        assert_eq!(decoded, entry);
        assert!(body.is_none());
    }

    #[test]
    fn test_round_trip_redirect() {
        let entry = CacheEntry {
            status: EntryStatus::Redirect,
            fetch_time: 5,
            stale_at: NEVER,
            expire_at: 10,
            etag: None,
            location: Some("https://mirror.example.com/data".to_string()),
            no_store: false,
        };
        let (decoded, body) = round_trip(&entry, None);
        assert_eq!(decoded, entry);
        assert!(body.is_none());
    }

    #[test]
    fn test_round_trip_not_modified() {
        let entry = CacheEntry {
            status: EntryStatus::NotModified,
            fetch_time: 5,
            stale_at: 5,
            expire_at: 10,
            etag: Some("\"x\"".to_string()),
            location: None,
            no_store: false,
        };
        let (decoded, body) = round_trip(&entry, None);
        assert_eq!(decoded, entry);
        assert!(body.is_none());
    }

    #[test]
    fn test_decode_version_mismatch() {
        let entry = CacheEntry {
            status: EntryStatus::NotFound,
            fetch_time: 1,
            stale_at: NEVER,
            expire_at: 2,
            etag: None,
            location: None,
            no_store: false,
        };
        let mut encoded = entry.encode(None);
        encoded[0] = CACHE_FORMAT_VERSION + 1;
        assert_eq!(
            CacheEntry::decode(&encoded),
            Err(CodecError::VersionMismatch(CACHE_FORMAT_VERSION + 1))
        );
    }

    #[test]
    fn test_decode_truncated() {
        let entry = CacheEntry {
            status: EntryStatus::Redirect,
            fetch_time: 1,
            stale_at: NEVER,
            expire_at: 2,
            etag: Some("\"e\"".to_string()),
            location: Some("https://example.com/".to_string()),
            no_store: false,
        };
        let encoded = entry.encode(None);
        for len in 0..encoded.len() {
            assert!(
                CacheEntry::decode(&encoded[..len]).is_err(),
                "prefix of {len} bytes should not decode"
            );
        }
    }

    #[test]
    fn test_decode_prefix_ignores_body() {
        let entry = CacheEntry {
            status: EntryStatus::Success,
            fetch_time: 1,
            stale_at: 2,
            expire_at: 3,
            etag: None,
            location: None,
            no_store: false,
        };
        let encoded = entry.encode(Some(b"large body that pruning never reads"));
        // Header for this entry is 1+1+24+4 = 30 bytes.
        let decoded = CacheEntry::decode_prefix(&encoded[..30]).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(CacheEntry::decode(&[]).is_err());
        assert!(CacheEntry::decode(&[0xAB; 40]).is_err());
    }
}
