//! Response record and cookie serialization (§3 "Response", §4.7).

use crate::headers::Headers;
use crate::pool::Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// A `Set-Cookie` entry with the attribute set §4.7 enumerates.
#[derive(Debug, Clone, Default)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub expires: Option<String>,
    pub max_age: Option<i64>,
    pub path: Option<String>,
    pub same_site: Option<SameSite>,
    pub secure: bool,
    pub partitioned: bool,
    pub http_only: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Cookie {
            name: name.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    /// Render as a single `Set-Cookie:` header value.
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(domain) = &self.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if let Some(expires) = &self.expires {
            out.push_str("; Expires=");
            out.push_str(expires);
        }
        if let Some(max_age) = self.max_age {
            out.push_str("; Max-Age=");
            out.push_str(&max_age.to_string());
        }
        if let Some(path) = &self.path {
            out.push_str("; Path=");
            out.push_str(path);
        }
        if let Some(same_site) = self.same_site {
            out.push_str("; SameSite=");
            out.push_str(same_site.as_str());
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.partitioned {
            out.push_str("; Partitioned");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out
    }
}

/// A handler-built response (§3 "Response").
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub cookies: Vec<Cookie>,
    pub body: Vec<u8>,
    pub connection: Option<Handle>,
    pub sent: bool,
    /// Set when the handler explicitly requests chunked framing instead of
    /// a buffered content-length body (§4.7).
    pub force_chunked: bool,
    /// Set when the handler, a parse error, or an unsupported
    /// `connection: close` request decides the connection cannot be kept
    /// alive.
    pub must_close: bool,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Response {
            status,
            headers: Headers::new(),
            cookies: Vec::new(),
            body: Vec::new(),
            connection: None,
            sent: false,
            force_chunked: false,
            must_close: false,
        }
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    pub fn set_cookie(&mut self, cookie: Cookie) {
        self.cookies.push(cookie);
    }

    /// §4.7: never emit `content-length` for 1xx, 204, or 2xx responses to
    /// CONNECT.
    pub fn suppresses_content_length(&self, is_connect: bool) -> bool {
        self.status / 100 == 1 || self.status == 204 || (is_connect && self.status / 100 == 2)
    }

    /// §4.7: a Date header is inserted for 2xx/3xx/4xx responses when none
    /// is already set.
    pub fn wants_date_header(&self) -> bool {
        matches!(self.status / 100, 2 | 3 | 4) && !self.headers.contains("date")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_renders_all_attributes() {
        let mut c = Cookie::new("sid", "abc123");
        c.domain = Some("example.com".to_string());
        c.path = Some("/".to_string());
        c.max_age = Some(3600);
        c.same_site = Some(SameSite::Lax);
        c.secure = true;
        c.http_only = true;
        let rendered = c.to_header_value();
        assert!(rendered.starts_with("sid=abc123"));
        assert!(rendered.contains("Domain=example.com"));
        assert!(rendered.contains("Max-Age=3600"));
        assert!(rendered.contains("SameSite=Lax"));
        assert!(rendered.contains("Secure"));
        assert!(rendered.contains("HttpOnly"));
    }

    #[test]
    fn suppresses_content_length_for_1xx_204_and_connect_2xx() {
        assert!(Response::new(100).suppresses_content_length(false));
        assert!(Response::new(204).suppresses_content_length(false));
        assert!(Response::new(200).suppresses_content_length(true));
        assert!(!Response::new(200).suppresses_content_length(false));
    }

    #[test]
    fn wants_date_header_for_2xx_3xx_4xx_only() {
        assert!(Response::new(200).wants_date_header());
        assert!(Response::new(301).wants_date_header());
        assert!(Response::new(404).wants_date_header());
        assert!(!Response::new(100).wants_date_header());
        assert!(!Response::new(500).wants_date_header());
    }
}
