//! Response writer: emits the status line + headers on first write, then
//! frames the body by content-length or chunked transfer-encoding,
//! funneling every byte through the reactor's `send_all` (§4.7).

use crate::error::OsError;
use crate::http::response::Response;
use crate::reactor::{send_all, Callback, RawHandle, ReactorHandle};

fn status_reason(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "",
    }
}

fn current_http_date() -> String {
    chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Build the status line + headers + trailing CRLF for `response`, mutating
/// it in place to fill in `content-length`/`date` the way §4.7 specifies.
/// `body_len` is `None` when the body will be streamed as chunks of
/// unknown total size up front (forces chunked framing).
pub fn build_heading(
    response: &mut Response,
    version_minor: u8,
    is_connect: bool,
    suppress_body: bool,
    body_len: Option<usize>,
) -> (Vec<u8>, bool) {
    if response.wants_date_header() {
        response.headers.set("date", current_http_date());
    }

    let suppress_length = response.suppresses_content_length(is_connect);
    let use_chunked = !suppress_length
        && (response.force_chunked || body_len.is_none())
        && !response.headers.contains("content-length");

    if use_chunked {
        if !response.headers.contains("transfer-encoding") {
            response.headers.set("transfer-encoding", "chunked");
        }
    } else if !suppress_length && !response.headers.contains("content-length") {
        let len = body_len.unwrap_or(0);
        response.headers.set("content-length", len.to_string());
    }

    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(
        format!(
            "HTTP/1.{} {} {}\r\n",
            version_minor,
            response.status,
            status_reason(response.status)
        )
        .as_bytes(),
    );
    for (name, value) in response.headers.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    for cookie in &response.cookies {
        out.extend_from_slice(b"set-cookie: ");
        out.extend_from_slice(cookie.to_header_value().as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");

    let _ = suppress_body;
    (out, use_chunked)
}

/// Frame a single chunk for chunked transfer-encoding: `<hex-size>\r\n
/// <data>\r\n`; an empty `data` emits the terminating `0\r\n\r\n` chunk.
fn frame_chunk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("{:x}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

/// Send a fully-buffered response in one shot: build the heading, append
/// the (possibly HEAD-suppressed) body, and `send_all` it (§4.7 variant
/// "(a) writing into a growing body buffer then emitting it").
pub fn respond(
    reactor: ReactorHandle,
    sock: RawHandle,
    mut response: Response,
    version_minor: u8,
    is_connect: bool,
    suppress_body: bool,
    cb: Callback<()>,
) {
    let body = std::mem::take(&mut response.body);
    let (heading, chunked) = build_heading(&mut response, version_minor, is_connect, suppress_body, Some(body.len()));

    let mut wire = heading;
    if !suppress_body {
        if chunked {
            if !body.is_empty() {
                wire.extend_from_slice(&frame_chunk(&body));
            }
            wire.extend_from_slice(&frame_chunk(&[]));
        } else {
            wire.extend_from_slice(&body);
        }
    }

    response.sent = true;
    send_all(
        reactor,
        sock,
        wire,
        Box::new(move |res| match res {
            Ok(_) => cb(Ok(())),
            Err(e) => cb(Err(e)),
        }),
    );
}

/// Streaming writer state for handlers that produce body bytes
/// incrementally (§4.7 variant "(b)"): the heading is flushed on the first
/// `write_chunk`, then each subsequent chunk streams straight into
/// `send_all`, framed as chunked transfer-encoding (the only framing that
/// supports an unknown-at-start-time total length).
pub struct StreamingWriter {
    started: bool,
}

impl StreamingWriter {
    pub fn new() -> Self {
        StreamingWriter { started: false }
    }

    pub fn write_chunk(
        &mut self,
        reactor: ReactorHandle,
        sock: RawHandle,
        response: &mut Response,
        version_minor: u8,
        is_connect: bool,
        suppress_body: bool,
        data: Vec<u8>,
        cb: Callback<()>,
    ) {
        let mut wire = if !self.started {
            self.started = true;
            response.force_chunked = true;
            let (heading, _chunked) = build_heading(response, version_minor, is_connect, suppress_body, None);
            heading
        } else {
            Vec::new()
        };

        if !suppress_body && !data.is_empty() {
            wire.extend_from_slice(&frame_chunk(&data));
        }

        send_all(
            reactor,
            sock,
            wire,
            Box::new(move |res: Result<usize, OsError>| match res {
                Ok(_) => cb(Ok(())),
                Err(e) => cb(Err(e)),
            }),
        );
    }

    /// Emit the terminating `0\r\n\r\n` chunk and mark the response sent.
    pub fn finish(
        &mut self,
        reactor: ReactorHandle,
        sock: RawHandle,
        response: &mut Response,
        version_minor: u8,
        is_connect: bool,
        suppress_body: bool,
        cb: Callback<()>,
    ) {
        if !self.started {
            self.write_chunk(
                reactor.clone(),
                sock,
                response,
                version_minor,
                is_connect,
                suppress_body,
                Vec::new(),
                Box::new(|_| {}),
            );
        }
        response.sent = true;
        let wire = if suppress_body { Vec::new() } else { frame_chunk(&[]) };
        send_all(
            reactor,
            sock,
            wire,
            Box::new(move |res| match res {
                Ok(_) => cb(Ok(())),
                Err(e) => cb(Err(e)),
            }),
        );
    }
}

impl Default for StreamingWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Headers;

    #[test]
    fn build_heading_sets_content_length_when_known() {
        let mut response = Response::new(200);
        let (wire, chunked) = build_heading(&mut response, 1, false, false, Some(4));
        assert!(!chunked);
        let text = String::from_utf8(wire).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-length: 4\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn build_heading_omits_length_for_204() {
        let mut response = Response::new(204);
        let (wire, _chunked) = build_heading(&mut response, 1, false, false, Some(0));
        let text = String::from_utf8(wire).unwrap();
        assert!(!text.contains("content-length"));
    }

    #[test]
    fn build_heading_inserts_date_for_2xx() {
        let mut response = Response::new(200);
        let (wire, _) = build_heading(&mut response, 1, false, false, Some(0));
        let text = String::from_utf8(wire).unwrap();
        assert!(text.to_ascii_lowercase().contains("date:"));
    }

    #[test]
    fn build_heading_leaves_existing_headers_untouched() {
        let mut response = Response::new(200);
        response.headers.set("content-length", "99");
        let (wire, chunked) = build_heading(&mut response, 1, false, false, Some(4));
        assert!(!chunked);
        let text = String::from_utf8(wire).unwrap();
        assert!(text.contains("content-length: 99"));
    }

    #[test]
    fn unknown_length_forces_chunked() {
        let mut response = Response::new(200);
        let (_wire, chunked) = build_heading(&mut response, 1, false, false, None);
        assert!(chunked);
        assert_eq!(response.headers.get("transfer-encoding"), Some("chunked"));
    }

    #[test]
    fn frame_chunk_matches_rfc_shape() {
        let framed = frame_chunk(b"hello");
        assert_eq!(framed, b"5\r\nhello\r\n");
        let terminator = frame_chunk(b"");
        assert_eq!(terminator, b"0\r\n\r\n");
    }

    #[test]
    fn headers_ref_unused_import_guard() {
        let _ = Headers::new();
    }
}
