//! Request record and request-line parsing (§3 "Request", §4.4 step 1).

use std::net::SocketAddr;

use crate::arena::Arena;
use crate::body::BodyMode;
use crate::headers::Headers;

/// HTTP methods recognized by the request-line parser (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Connect,
    Options,
    Trace,
}

impl Method {
    pub fn parse(s: &str) -> Option<Method> {
        match s {
            "GET" => Some(Method::Get),
            "HEAD" => Some(Method::Head),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "PATCH" => Some(Method::Patch),
            "DELETE" => Some(Method::Delete),
            "CONNECT" => Some(Method::Connect),
            "OPTIONS" => Some(Method::Options),
            "TRACE" => Some(Method::Trace),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
        }
    }
}

/// The parsed `METHOD SP target SP HTTP/major.minor` request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub target: String,
    pub version_major: u8,
    pub version_minor: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestLineError {
    InvalidMethod,
    MalformedLine,
    InvalidVersion,
}

/// Parse a request line per §4.4 step 1: invalid method -> caller maps to
/// 501; malformed spacing or version -> caller maps to 400.
pub fn parse_request_line(line: &str) -> Result<RequestLine, RequestLineError> {
    let mut parts = line.splitn(3, ' ');
    let method_str = parts.next().ok_or(RequestLineError::MalformedLine)?;
    let target = parts.next().ok_or(RequestLineError::MalformedLine)?;
    let version_str = parts.next().ok_or(RequestLineError::MalformedLine)?;
    if parts.next().is_some() {
        return Err(RequestLineError::MalformedLine);
    }

    let method = Method::parse(method_str).ok_or(RequestLineError::InvalidMethod)?;

    let version = version_str
        .strip_prefix("HTTP/")
        .ok_or(RequestLineError::InvalidVersion)?;
    let (major_str, minor_str) = version.split_once('.').unwrap_or((version, "0"));
    let version_major: u8 = major_str.parse().map_err(|_| RequestLineError::InvalidVersion)?;
    let version_minor: u8 = minor_str.parse().map_err(|_| RequestLineError::InvalidVersion)?;

    Ok(RequestLine {
        method,
        target: target.to_string(),
        version_major,
        version_minor,
    })
}

/// The decomposed request target: `path` and an optional raw `query`
/// string (query parsing itself is left to the router per §1 scope).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    pub path: String,
    pub query: Option<String>,
}

pub fn split_target(target: &str) -> UrlParts {
    match target.split_once('?') {
        Some((path, query)) => UrlParts {
            path: path.to_string(),
            query: Some(query.to_string()),
        },
        None => UrlParts {
            path: target.to_string(),
            query: None,
        },
    }
}

/// A fully parsed request (§3 "Request").
pub struct Request {
    pub method: Method,
    pub target: String,
    pub url: UrlParts,
    pub version_major: u8,
    pub version_minor: u8,
    pub headers: Headers,
    pub client_endpoint: SocketAddr,
    pub path_params: Vec<(String, String)>,
    pub arena: Arena,
    pub body_mode: Option<BodyMode>,
    pub body: Option<Vec<u8>>,
    /// Set when the server dispatched a HEAD request to the GET handler
    /// under `redirect_head_to_get` (§4.4 "HEAD handling").
    pub is_head_as_get: bool,
}

impl Request {
    pub fn new(line: RequestLine, headers: Headers, client_endpoint: SocketAddr) -> Self {
        let url = split_target(&line.target);
        Request {
            method: line.method,
            target: line.target,
            url,
            version_major: line.version_major,
            version_minor: line.version_minor,
            headers,
            client_endpoint,
            path_params: Vec::new(),
            arena: Arena::new(),
            body_mode: None,
            body: None,
            is_head_as_get: false,
        }
    }

    pub fn is_http_1_0(&self) -> bool {
        self.version_major == 1 && self.version_minor == 0
    }

    pub fn wants_close(&self) -> bool {
        self.headers
            .get("connection")
            .map(|v| v.eq_ignore_ascii_case("close"))
            .unwrap_or(false)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_request_line() {
        let line = parse_request_line("GET /ping HTTP/1.1").unwrap();
        assert_eq!(line.method, Method::Get);
        assert_eq!(line.target, "/ping");
        assert_eq!(line.version_major, 1);
        assert_eq!(line.version_minor, 1);
    }

    #[test]
    fn rejects_invalid_method() {
        assert_eq!(
            parse_request_line("FETCH / HTTP/1.1"),
            Err(RequestLineError::InvalidMethod)
        );
    }

    #[test]
    fn rejects_missing_spaces() {
        assert_eq!(
            parse_request_line("GET /ping"),
            Err(RequestLineError::MalformedLine)
        );
    }

    #[test]
    fn rejects_bad_version() {
        assert_eq!(
            parse_request_line("GET / FOO/1.1"),
            Err(RequestLineError::InvalidVersion)
        );
    }

    #[test]
    fn split_target_separates_query() {
        let parts = split_target("/search?q=rust");
        assert_eq!(parts.path, "/search");
        assert_eq!(parts.query.as_deref(), Some("q=rust"));
    }
}
