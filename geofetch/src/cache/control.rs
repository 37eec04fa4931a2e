//! Typed `Cache-Control` directive parsing.
//!
//! Only the directives the freshness model consumes are represented;
//! unrecognized directives are ignored, as HTTP requires.

/// The set of `Cache-Control` directives the cache acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    /// `max-age=N` in seconds
    pub max_age: Option<i64>,
    /// `no-cache`
    pub no_cache: bool,
    /// `no-store`
    pub no_store: bool,
    /// `immutable`
    pub immutable: bool,
    /// `stale-while-revalidate=N` in seconds
    pub stale_while_revalidate: Option<i64>,
}

impl CacheControl {
    /// Parse a `Cache-Control` header value.
    ///
    /// Directives are comma separated, case insensitive, and may carry a
    /// `=value` argument. Directives with malformed arguments are dropped
    /// rather than failing the whole header.
    pub fn parse(value: &str) -> Self {
        let mut parsed = Self::default();

        for directive in value.split(',') {
            let directive = directive.trim();
            let (name, arg) = match directive.split_once('=') {
                Some((name, arg)) => (name.trim(), Some(arg.trim().trim_matches('"'))),
                None => (directive, None),
            };

            match name.to_ascii_lowercase().as_str() {
                "max-age" => parsed.max_age = arg.and_then(parse_seconds),
                "no-cache" => parsed.no_cache = true,
                "no-store" => parsed.no_store = true,
                "immutable" => parsed.immutable = true,
                "stale-while-revalidate" => {
                    parsed.stale_while_revalidate = arg.and_then(parse_seconds)
                }
                _ => {}
            }
        }

        parsed
    }

    /// Whether this directive set forbids writing the response to disk.
    pub fn suppresses_storage(&self) -> bool {
        self.no_cache || self.no_store
    }
}

fn parse_seconds(arg: &str) -> Option<i64> {
    arg.parse::<i64>().ok().filter(|secs| *secs >= 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_header() {
        assert_eq!(CacheControl::parse(""), CacheControl::default());
    }

    #[test]
    fn test_max_age() {
        let cc = CacheControl::parse("max-age=300");
        assert_eq!(cc.max_age, Some(300));
        assert!(!cc.suppresses_storage());
    }

    #[test]
    fn test_combined_directives() {
        let cc = CacheControl::parse("public, max-age=60, stale-while-revalidate=600, immutable");
        assert_eq!(cc.max_age, Some(60));
        assert_eq!(cc.stale_while_revalidate, Some(600));
        assert!(cc.immutable);
        assert!(!cc.no_store);
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        let cc = CacheControl::parse(" Max-Age = 120 ,NO-STORE");
        assert_eq!(cc.max_age, Some(120));
        assert!(cc.no_store);
    }

    #[test]
    fn test_no_cache_and_no_store_suppress_storage() {
        assert!(CacheControl::parse("no-cache").suppresses_storage());
        assert!(CacheControl::parse("no-store").suppresses_storage());
        assert!(!CacheControl::parse("private").suppresses_storage());
    }

    #[test]
    fn test_quoted_argument() {
        let cc = CacheControl::parse("max-age=\"90\"");
        assert_eq!(cc.max_age, Some(90));
    }

    #[test]
    fn test_malformed_argument_dropped() {
        let cc = CacheControl::parse("max-age=soon, no-store");
        assert_eq!(cc.max_age, None);
        assert!(cc.no_store);
    }

    #[test]
    fn test_negative_argument_dropped() {
        let cc = CacheControl::parse("max-age=-5");
        assert_eq!(cc.max_age, None);
    }

    #[test]
    fn test_unknown_directives_ignored() {
        let cc = CacheControl::parse("public, s-maxage=30, must-revalidate");
        assert_eq!(cc, CacheControl::default());
    }
}
