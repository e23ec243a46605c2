//! Conditional reads keyed on the state cursor.
//!
//! The strong validator is the cursor's bare hex digest, sent as
//! `ETag: "<hex>"`. Clients may echo it back in `If-None-Match` quoted or
//! bare, with or without the `sha256:` prefix, weak-tagged, or as one entry
//! of a comma-separated list. A match yields an empty "not modified"
//! response carrying the same headers.

use capsule_kernel_core::Cursor;

use crate::error::{Result, SyncError};

pub const ETAG: &str = "ETag";
pub const CACHE_CONTROL: &str = "Cache-Control";
pub const X_CAPSULE_CURSOR: &str = "X-Capsule-Cursor";
pub const X_CAPSULE_PREV_CURSOR: &str = "X-Capsule-Prev-Cursor";

/// The `ETag` value for a cursor.
pub fn etag(cursor: &Cursor) -> String {
    format!("\"{}\"", cursor.hex())
}

/// Whether an `If-None-Match` header value matches the current cursor.
pub fn if_none_match(header: &str, current: &Cursor) -> bool {
    header.split(',').any(|candidate| {
        let candidate = candidate.trim();
        if candidate == "*" {
            return true;
        }
        let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
        let candidate = candidate
            .strip_prefix('"')
            .and_then(|c| c.strip_suffix('"'))
            .unwrap_or(candidate);
        !candidate.is_empty() && current.matches(candidate)
    })
}

/// Caching directives for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub max_age_secs: u64,
    /// Whether shared caches may store the response.
    pub public: bool,
}

impl CachePolicy {
    pub fn header_value(&self) -> String {
        if self.public {
            format!("public, max-age={}", self.max_age_secs)
        } else {
            format!("private, max-age={}", self.max_age_secs)
        }
    }
}

/// Headers sent on every read, modified or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHeaders {
    pub etag: String,
    pub cache_control: String,
    pub cursor: Cursor,
    pub prev_cursor: Option<Cursor>,
}

impl CacheHeaders {
    pub fn new(cursor: &Cursor, prev_cursor: Option<&Cursor>, policy: CachePolicy) -> Self {
        Self {
            etag: etag(cursor),
            cache_control: policy.header_value(),
            cursor: cursor.clone(),
            prev_cursor: prev_cursor.cloned(),
        }
    }

    /// Name/value pairs ready for an HTTP response.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            (ETAG, self.etag.clone()),
            (CACHE_CONTROL, self.cache_control.clone()),
            (X_CAPSULE_CURSOR, self.cursor.to_string()),
        ];
        if let Some(prev) = &self.prev_cursor {
            pairs.push((X_CAPSULE_PREV_CURSOR, prev.to_string()));
        }
        pairs
    }

    /// Rebuild from response headers, as a polling client would.
    /// Header names compare case-insensitively.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self> {
        let mut etag = None;
        let mut cache_control = None;
        let mut cursor = None;
        let mut prev_cursor = None;
        for (name, value) in pairs {
            if name.eq_ignore_ascii_case(ETAG) {
                etag = Some(value.to_string());
            } else if name.eq_ignore_ascii_case(CACHE_CONTROL) {
                cache_control = Some(value.to_string());
            } else if name.eq_ignore_ascii_case(X_CAPSULE_CURSOR) {
                cursor = Some(Cursor::parse(value)?);
            } else if name.eq_ignore_ascii_case(X_CAPSULE_PREV_CURSOR) {
                prev_cursor = Some(Cursor::parse(value)?);
            }
        }
        let missing = |name| SyncError::InvalidHeader {
            name,
            reason: "missing".into(),
        };
        let cursor = cursor.ok_or_else(|| missing(X_CAPSULE_CURSOR))?;
        let etag = etag.ok_or_else(|| missing(ETAG))?;
        if !if_none_match(&etag, &cursor) {
            return Err(SyncError::InvalidHeader {
                name: ETAG,
                reason: "does not match cursor".into(),
            });
        }
        Ok(Self {
            etag,
            cache_control: cache_control.unwrap_or_default(),
            cursor,
            prev_cursor,
        })
    }
}

/// A read that honoured `If-None-Match`.
#[derive(Debug, Clone, PartialEq)]
pub enum Conditional<T> {
    Modified { body: T, headers: CacheHeaders },
    NotModified { headers: CacheHeaders },
}

impl<T> Conditional<T> {
    /// Evaluate a conditional read. `body` is only built on a miss.
    pub fn evaluate(
        if_none_match_header: Option<&str>,
        headers: CacheHeaders,
        body: impl FnOnce() -> T,
    ) -> Self {
        match if_none_match_header {
            Some(h) if if_none_match(h, &headers.cursor) => Conditional::NotModified { headers },
            _ => Conditional::Modified {
                body: body(),
                headers,
            },
        }
    }

    pub fn headers(&self) -> &CacheHeaders {
        match self {
            Conditional::Modified { headers, .. } | Conditional::NotModified { headers } => headers,
        }
    }

    /// HTTP status code: 200 or 304.
    pub fn status(&self) -> u16 {
        match self {
            Conditional::Modified { .. } => 200,
            Conditional::NotModified { .. } => 304,
        }
    }

    pub fn is_modified(&self) -> bool {
        matches!(self, Conditional::Modified { .. })
    }

    pub fn into_body(self) -> Option<T> {
        match self {
            Conditional::Modified { body, .. } => Some(body),
            Conditional::NotModified { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_kernel_core::cursor;
    use serde_json::json;

    fn current() -> Cursor {
        cursor(&json!({"schema": "agent-capsule/v1"}))
    }

    fn policy() -> CachePolicy {
        CachePolicy {
            max_age_secs: 60,
            public: true,
        }
    }

    #[test]
    fn test_etag_is_quoted_hex() {
        let c = current();
        let tag = etag(&c);
        assert_eq!(tag.len(), 66);
        assert!(tag.starts_with('"') && tag.ends_with('"'));
        assert!(!tag.contains("sha256:"));
    }

    #[test]
    fn test_if_none_match_forms() {
        let c = current();
        let hex = c.hex().to_string();
        for header in [
            format!("\"{hex}\""),
            hex.clone(),
            format!("sha256:{hex}"),
            format!("\"sha256:{hex}\""),
            format!("W/\"{hex}\""),
            hex.to_ascii_uppercase(),
            format!("\"{}\", \"{hex}\"", "0".repeat(64)),
            "*".to_string(),
        ] {
            assert!(if_none_match(&header, &c), "{header} should match");
        }
        assert!(!if_none_match(&format!("\"{}\"", "0".repeat(64)), &c));
        assert!(!if_none_match("\"\"", &c));
        assert!(!if_none_match("", &c));
    }

    #[test]
    fn test_evaluate_hit_and_miss() {
        let c = current();
        let headers = CacheHeaders::new(&c, None, policy());

        let hit = Conditional::evaluate(Some(&etag(&c)), headers.clone(), || -> u8 {
            panic!("body must not be built on a hit")
        });
        assert_eq!(hit.status(), 304);
        assert_eq!(hit.headers(), &headers);

        let miss = Conditional::evaluate(None, headers.clone(), || 7u8);
        assert_eq!(miss.status(), 200);
        assert_eq!(miss.into_body(), Some(7));
    }

    #[test]
    fn test_header_pairs() {
        let c = current();
        let prev = cursor(&json!({}));
        let headers = CacheHeaders::new(&c, Some(&prev), CachePolicy { max_age_secs: 30, public: false });
        let pairs = headers.to_pairs();
        assert_eq!(pairs[0], (ETAG, etag(&c)));
        assert_eq!(pairs[1], (CACHE_CONTROL, "private, max-age=30".to_string()));
        assert_eq!(pairs[2], (X_CAPSULE_CURSOR, c.to_string()));
        assert_eq!(pairs[3], (X_CAPSULE_PREV_CURSOR, prev.to_string()));

        let without_prev = CacheHeaders::new(&c, None, policy()).to_pairs();
        assert_eq!(without_prev.len(), 3);
    }

    #[test]
    fn test_client_side_round_trip() {
        let c = current();
        let headers = CacheHeaders::new(&c, None, policy());
        let lowered: Vec<(String, String)> = headers
            .to_pairs()
            .into_iter()
            .map(|(n, v)| (n.to_ascii_lowercase(), v))
            .collect();
        let parsed =
            CacheHeaders::from_pairs(lowered.iter().map(|(n, v)| (n.as_str(), v.as_str()))).unwrap();
        assert_eq!(parsed, headers);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn etag_always_matches_own_cursor(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
                let c = cursor(&json!({"blob": bytes}));
                prop_assert!(if_none_match(&etag(&c), &c));
            }

            #[test]
            fn distinct_payloads_do_not_match(a in any::<u32>(), b in any::<u32>()) {
                prop_assume!(a != b);
                let ca = cursor(&json!({"n": a}));
                let cb = cursor(&json!({"n": b}));
                prop_assert!(!if_none_match(&etag(&ca), &cb));
            }
        }
    }

    #[test]
    fn test_client_rejects_missing_cursor() {
        let err = CacheHeaders::from_pairs([(ETAG, "\"abc\"")]).unwrap_err();
        assert!(matches!(err, SyncError::InvalidHeader { name: X_CAPSULE_CURSOR, .. }));
    }
}
