//! Mirror fallback: try a list of URLs in order, first parsed success
//! wins.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::fetch::{FetchError, Http};

impl Http {
    /// Fetch and parse the first available mirror.
    ///
    /// URLs are tried strictly in order through [`Http::get`]:
    ///
    /// - the first URL whose fetch succeeds and whose body parses wins
    ///   immediately;
    /// - a URL that resolves to "absent" (a live or cached 404) is
    ///   remembered as a definitive "missing" while iteration continues;
    /// - a URL whose fetch or parse fails is recorded as a suppressed
    ///   cause while iteration continues.
    ///
    /// If no mirror succeeds the overall result is `None` when at least
    /// one mirror answered "missing", otherwise
    /// [`FetchError::AllMirrorsFailed`] carrying every suppressed cause.
    pub async fn get_first<T, P, E>(
        &self,
        urls: &[impl AsRef<str>],
        parse: P,
    ) -> Result<Option<T>, FetchError>
    where
        P: Fn(Bytes) -> Result<T, E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let mut causes = Vec::new();
        let mut found_missing = false;

        for url in urls {
            let url = url.as_ref();
            match self.get(url).await {
                Ok(Some(bytes)) => match parse(bytes) {
                    Ok(value) => return Ok(Some(value)),
                    Err(error) => {
                        let error = FetchError::Parse {
                            url: url.to_string(),
                            source: error.into(),
                        };
                        warn!(url = %url, error = %error, "Mirror response failed to parse");
                        causes.push(error);
                    }
                },
                Ok(None) => {
                    debug!(url = %url, "Mirror reports resource missing");
                    found_missing = true;
                }
                Err(error) => {
                    warn!(url = %url, error = %error, "Mirror fetch failed");
                    causes.push(error);
                }
            }
        }

        if found_missing {
            Ok(None)
        } else {
            Err(FetchError::AllMirrorsFailed { causes })
        }
    }
}
