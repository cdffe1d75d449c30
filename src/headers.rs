//! Case-insensitive, insertion-ordered header map (§3 "Headers").
//!
//! Grounded on the teacher's preference for small invariant-bearing wrapper
//! types (e.g. `storage::CacheItem`) plus `config.rs`'s manual validation
//! style; there is no direct teacher analogue for an ordered multimap, so
//! this stays close to `Vec<(String, String)>` the way the teacher keeps
//! its own data structures simple and avoids pulling in `indexmap`.

/// Headers that may never appear in a chunked trailer (glossary: "Trailer
/// headers").
const FORBIDDEN_TRAILER_HEADERS: &[&str] = &[
    "transfer-encoding",
    "content-length",
    "host",
    "if-match",
    "if-none-match",
    "if-modified-since",
    "if-unmodified-since",
    "if-range",
    "www-authenticate",
    "authorization",
    "proxy-authenticate",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "age",
    "cache-control",
    "expires",
    "date",
    "location",
    "retry-after",
    "vary",
    "warning",
    "content-encoding",
    "content-type",
    "content-range",
    "trailer",
];

pub fn is_forbidden_trailer_header(name: &str) -> bool {
    FORBIDDEN_TRAILER_HEADERS.contains(&name)
}

/// An insertion-ordered, case-insensitive string-to-string map, with an
/// enforced readonly flag (§3).
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
    readonly: bool,
}

impl Headers {
    pub fn new() -> Self {
        Headers {
            entries: Vec::new(),
            readonly: false,
        }
    }

    /// Mark the map readonly. After this, `set`/`remove`/`clear` panic
    /// (§7 fatal-class: "touching a readonly header map").
    pub fn mark_readonly(&mut self) {
        self.readonly = true;
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    fn check_writable(&self) {
        if self.readonly {
            panic!("attempted to mutate a readonly header map");
        }
    }

    /// Insert or overwrite a header, keyed by lowercased name. Overwriting
    /// preserves the original insertion position.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.check_writable();
        let lower = name.to_ascii_lowercase();
        let value = sanitize_value(value.into());
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == lower) {
            entry.1 = value;
        } else {
            self.entries.push((lower, value));
        }
    }

    /// Append a header even if the name already exists, producing a second
    /// entry (used for repeated headers such as multiple `Set-Cookie`).
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.check_writable();
        let lower = name.to_ascii_lowercase();
        let value = sanitize_value(value.into());
        self.entries.push((lower, value));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let lower = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == lower)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        let lower = name.to_ascii_lowercase();
        self.entries
            .iter()
            .filter(move |(k, _)| *k == lower)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) {
        self.check_writable();
        let lower = name.to_ascii_lowercase();
        self.entries.retain(|(k, _)| *k != lower);
    }

    pub fn clear(&mut self) {
        self.check_writable();
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate the cross-header invariants enforced on receipt (§3): both
    /// `content-length` and `chunked` transfer-encoding present is invalid;
    /// duplicate `host` is invalid.
    pub fn validate_received(&self) -> Result<(), HeaderValidationError> {
        let host_count = self.entries.iter().filter(|(k, _)| k == "host").count();
        if host_count > 1 {
            return Err(HeaderValidationError::DuplicateHost);
        }

        let has_chunked = self
            .get("transfer-encoding")
            .map(|v| v.rsplit(',').next().unwrap_or("").trim().eq_ignore_ascii_case("chunked"))
            .unwrap_or(false);
        if has_chunked && self.contains("content-length") {
            return Err(HeaderValidationError::ConflictingFraming);
        }

        let mut seen_length: Option<&str> = None;
        for (k, v) in &self.entries {
            if k == "content-length" {
                match seen_length {
                    Some(prev) if prev != v => {
                        return Err(HeaderValidationError::ConflictingContentLength)
                    }
                    _ => seen_length = Some(v.as_str()),
                }
            }
        }

        Ok(())
    }

    /// Rewrite headers at the end of chunked trailer processing (§4.3 step
    /// 6): drop `trailer`, strip `chunked` off `transfer-encoding`, and set
    /// `content-length` to the accumulated body size.
    pub fn finish_chunked_trailer(&mut self, accumulated_len: usize) {
        self.remove("trailer");
        if let Some(te) = self.get("transfer-encoding").map(str::to_string) {
            let stripped: Vec<&str> = te
                .split(',')
                .map(str::trim)
                .filter(|part| !part.eq_ignore_ascii_case("chunked"))
                .collect();
            if stripped.is_empty() {
                self.remove("transfer-encoding");
            } else {
                self.set("transfer-encoding", stripped.join(", "));
            }
        }
        self.set("content-length", accumulated_len.to_string());
    }
}

/// Escape embedded newlines in a header value to `\n` literals to prevent
/// header-injection via CRLF smuggled through a user-set value (§4.7).
fn sanitize_value(value: String) -> String {
    if !value.contains('\n') && !value.contains('\r') {
        return value;
    }
    value.replace('\r', "").replace('\n', "\\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderValidationError {
    DuplicateHost,
    ConflictingFraming,
    ConflictingContentLength,
}

impl std::fmt::Display for HeaderValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HeaderValidationError::DuplicateHost => "duplicate host header",
            HeaderValidationError::ConflictingFraming => {
                "content-length and chunked transfer-encoding both present"
            }
            HeaderValidationError::ConflictingContentLength => {
                "conflicting content-length values"
            }
        };
        f.write_str(s)
    }
}

impl std::error::Error for HeaderValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_is_case_insensitive() {
        let mut h = Headers::new();
        h.set("Content-Type", "text/plain");
        assert_eq!(h.get("content-type"), Some("text/plain"));
        assert_eq!(h.get("CONTENT-TYPE"), Some("text/plain"));
    }

    #[test]
    fn set_stores_lowercased_key_and_preserves_order() {
        let mut h = Headers::new();
        h.set("B", "2");
        h.set("A", "1");
        h.set("B", "3");
        let order: Vec<&str> = h.iter().map(|(k, _)| k).collect();
        assert_eq!(order, vec!["b", "a"]);
        assert_eq!(h.get("b"), Some("3"));
    }

    #[test]
    #[should_panic(expected = "readonly")]
    fn mutation_after_readonly_panics() {
        let mut h = Headers::new();
        h.set("a", "1");
        h.mark_readonly();
        h.set("b", "2");
    }

    #[test]
    fn validate_rejects_duplicate_host() {
        let mut h = Headers::new();
        h.append("host", "a");
        h.append("host", "b");
        assert_eq!(h.validate_received(), Err(HeaderValidationError::DuplicateHost));
    }

    #[test]
    fn validate_rejects_conflicting_framing() {
        let mut h = Headers::new();
        h.set("transfer-encoding", "chunked");
        h.set("content-length", "5");
        assert_eq!(
            h.validate_received(),
            Err(HeaderValidationError::ConflictingFraming)
        );
    }

    #[test]
    fn finish_chunked_trailer_rewrites_headers() {
        let mut h = Headers::new();
        h.set("transfer-encoding", "chunked");
        h.set("trailer", "x-trailer");
        h.set("x-trailer", "v");
        h.finish_chunked_trailer(11);
        assert_eq!(h.get("content-length"), Some("11"));
        assert!(!h.contains("trailer"));
        assert!(!h.contains("transfer-encoding"));
        assert_eq!(h.get("x-trailer"), Some("v"));
    }

    #[test]
    fn sanitize_escapes_embedded_newlines() {
        let mut h = Headers::new();
        h.set("x-evil", "a\r\nSet-Cookie: pwned=1");
        assert_eq!(h.get("x-evil"), Some("a\\nSet-Cookie: pwned=1"));
    }

    #[test]
    fn trailer_forbidden_set_covers_framing_headers() {
        assert!(is_forbidden_trailer_header("content-length"));
        assert!(is_forbidden_trailer_header("set-cookie"));
        assert!(!is_forbidden_trailer_header("x-trailer"));
    }
}
