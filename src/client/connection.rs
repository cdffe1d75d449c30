//! Client state machine steps (§4.5): parse URL, resolve host, acquire or
//! open a connection, optionally negotiate TLS, write the request, read
//! the response, decide keep-alive, hand the connection back to the pool.

use std::rc::Rc;

use crate::body::{read_body as read_body_sync, select_mode};
use crate::client::{Client, PoolKey, RequestOptions, ResponseCallback};
use crate::error::RequestError;
use crate::headers::Headers;
use crate::http::request::Method;
use crate::http::response::Response;
use crate::reactor::{send_all, PollEvent, RawHandle};
use crate::tls::{TlsConnection, TlsStatus};

/// Library tag sent as the default `user-agent` header (§4.5 step 5).
const USER_AGENT: &str = concat!("grow-httpd/", env!("CARGO_PKG_VERSION"));

/// Cap on consecutive `Want_Read`/`Want_Write` retries while driving a TLS
/// operation, the same consecutive-no-progress discipline
/// `scanner::Scanner` uses against a misbehaving or wedged peer.
const MAX_TLS_POLL_RETRIES: u32 = 128;

struct ParsedUrl {
    scheme: &'static str,
    host: String,
    port: u16,
    path_and_query: String,
}

fn parse_url(url: &str) -> Result<ParsedUrl, RequestError> {
    let (scheme, rest) = if let Some(r) = url.strip_prefix("https://") {
        ("https", r)
    } else if let Some(r) = url.strip_prefix("http://") {
        ("http", r)
    } else {
        return Err(RequestError::BadUrl);
    };

    let (authority, path_and_query) = match rest.find('/') {
        Some(idx) => (&rest[..idx], rest[idx..].to_string()),
        None => (rest, "/".to_string()),
    };
    if authority.is_empty() {
        return Err(RequestError::BadUrl);
    }

    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) => (h.to_string(), p.parse::<u16>().map_err(|_| RequestError::BadUrl)?),
        None => (authority.to_string(), if scheme == "https" { 443 } else { 80 }),
    };

    Ok(ParsedUrl { scheme, host, port, path_and_query })
}

pub fn send_request(client: Rc<Client>, mut options: RequestOptions, cb: ResponseCallback) {
    let url = match parse_url(&options.url) {
        Ok(u) => u,
        Err(e) => return cb(Err(e)),
    };

    let key = PoolKey { host: url.host.clone(), scheme: url.scheme, port: url.port };

    if let Some((sock, tls)) = client.acquire(&key) {
        write_request(client, key, sock, tls, url, options, cb);
        return;
    }

    let host_for_resolve = url.host.clone();
    let client2 = client.clone();
    client.resolver.resolve(
        &host_for_resolve,
        Box::new(move |result| match result {
            Ok(record) => {
                let Some(ip) = record.addrs.first().copied() else {
                    return cb(Err(RequestError::Dns));
                };
                let addr = std::net::SocketAddr::new(ip, url.port);
                let client3 = client2.clone();
                let key2 = key.clone();
                client2.reactor.borrow_mut().connect(
                    addr,
                    Box::new(move |res| match res {
                        Ok(sock) => after_connect(client3, key2, sock, url, options, cb),
                        Err(_e) => cb(Err(RequestError::Network)),
                    }),
                );
            }
            Err(e) => cb(Err(e)),
        }),
    );
}

/// A fresh connect landed; negotiate TLS if the scheme calls for it
/// (§4.5 step 4) before emitting the request. A pooled/reused connection
/// skips this — its `PooledConnection::tls` already carries a completed
/// session.
fn after_connect(client: Rc<Client>, key: PoolKey, sock: RawHandle, url: ParsedUrl, options: RequestOptions, cb: ResponseCallback) {
    if url.scheme == "https" {
        let tls = client.tls.connection_create(sock, &url.host);
        drive_tls_connect(client, key, sock, tls, url, options, cb, 0);
    } else {
        write_request(client, key, sock, None, url, options, cb);
    }
}

/// Drive `TlsConnection::connect` with the want-read/want-write retry loop
/// §4.5 step 4 calls for: on `Want_Read`/`Want_Write`, arm a one-shot poll
/// on the socket and re-enter; on `Shutdown`/`Fatal` (or a transport
/// error), report dial failure.
fn drive_tls_connect(
    client: Rc<Client>,
    key: PoolKey,
    sock: RawHandle,
    mut tls: Box<dyn TlsConnection>,
    url: ParsedUrl,
    options: RequestOptions,
    cb: ResponseCallback,
    retries: u32,
) {
    if retries >= MAX_TLS_POLL_RETRIES {
        return cb(Err(RequestError::Network));
    }

    let event = match tls.connect() {
        Ok(TlsStatus::None) => return write_request(client, key, sock, Some(tls), url, options, cb),
        Ok(TlsStatus::WantRead) => PollEvent::Read,
        Ok(TlsStatus::WantWrite) => PollEvent::Write,
        Ok(TlsStatus::Shutdown) | Ok(TlsStatus::Fatal) | Err(_) => return cb(Err(RequestError::Network)),
    };

    let reactor = client.reactor.clone();
    reactor.borrow_mut().poll(
        sock,
        event,
        false,
        Box::new(move |res| match res {
            Ok(_) => drive_tls_connect(client, key, sock, tls, url, options, cb, retries + 1),
            Err(_) => cb(Err(RequestError::Network)),
        }),
    );
}

/// Emit the request line and headers (§4.5 step 5): add the four default
/// headers only if the caller didn't already set them — `content-length`
/// (present even for an empty body, per the spec's "or 0"), `accept`,
/// `user-agent`, and `host` — then send via plain `send_all` or, when
/// `tls` is `Some`, through the TLS connection's own want-read/want-write
/// loop.
fn write_request(
    client: Rc<Client>,
    key: PoolKey,
    sock: RawHandle,
    tls: Option<Box<dyn TlsConnection>>,
    url: ParsedUrl,
    options: RequestOptions,
    cb: ResponseCallback,
) {
    let mut wire = format!(
        "{} {} HTTP/1.1\r\n",
        options.method.as_str(),
        url.path_and_query
    )
    .into_bytes();

    let mut headers = options.headers;
    if !headers.contains("host") {
        headers.set("host", format!("{}:{}", url.host, url.port));
    }
    if !headers.contains("content-length") {
        headers.set("content-length", options.body.len().to_string());
    }
    if !headers.contains("accept") {
        headers.set("accept", "*/*");
    }
    if !headers.contains("user-agent") {
        headers.set("user-agent", USER_AGENT);
    }
    if !headers.contains("connection") {
        headers.set("connection", "keep-alive");
    }
    if !options.cookies.is_empty() {
        let rendered: Vec<String> = options.cookies.iter().map(|(n, v)| format!("{n}={v}")).collect();
        headers.set("cookie", rendered.join("; "));
    }

    for (name, value) in headers.iter() {
        wire.extend_from_slice(name.as_bytes());
        wire.extend_from_slice(b": ");
        wire.extend_from_slice(value.as_bytes());
        wire.extend_from_slice(b"\r\n");
    }
    wire.extend_from_slice(b"\r\n");
    wire.extend_from_slice(&options.body);

    let reactor = client.reactor.clone();
    let is_head = options.method == Method::Head;
    async_send_all(
        reactor.clone(),
        sock,
        tls,
        wire,
        Box::new(move |res| match res {
            Ok(tls) => read_response(client, key, reactor, sock, tls, is_head, cb),
            Err(e) => cb(Err(e)),
        }),
    );
}

type SendDoneCallback = Box<dyn FnOnce(Result<Option<Box<dyn TlsConnection>>, RequestError>)>;

/// Send `buf` in full, either over the raw socket or (when `tls` is
/// `Some`) through the TLS connection, handing the TLS connection back on
/// success so the caller can keep using it for the response read.
fn async_send_all(reactor: crate::reactor::ReactorHandle, sock: RawHandle, tls: Option<Box<dyn TlsConnection>>, buf: Vec<u8>, cb: SendDoneCallback) {
    match tls {
        Some(tls) => tls_send_all(reactor, sock, tls, buf, 0, 0, cb),
        None => send_all(
            reactor,
            sock,
            buf,
            Box::new(move |res| match res {
                Ok(_) => cb(Ok(None)),
                Err(_e) => cb(Err(RequestError::Network)),
            }),
        ),
    }
}

fn tls_send_all(
    reactor: crate::reactor::ReactorHandle,
    sock: RawHandle,
    mut tls: Box<dyn TlsConnection>,
    buf: Vec<u8>,
    sent: usize,
    retries: u32,
    cb: SendDoneCallback,
) {
    if sent >= buf.len() {
        return cb(Ok(Some(tls)));
    }
    if retries >= MAX_TLS_POLL_RETRIES {
        return cb(Err(RequestError::Network));
    }

    let event = match tls.send(&buf[sent..]) {
        Ok((TlsStatus::None, n)) => return tls_send_all(reactor, sock, tls, buf, sent + n, 0, cb),
        Ok((TlsStatus::WantRead, _)) => PollEvent::Read,
        Ok((TlsStatus::WantWrite, _)) => PollEvent::Write,
        Ok((TlsStatus::Shutdown, _)) | Ok((TlsStatus::Fatal, _)) | Err(_) => return cb(Err(RequestError::Network)),
    };

    let reactor2 = reactor.clone();
    reactor.borrow_mut().poll(
        sock,
        event,
        false,
        Box::new(move |res| match res {
            Ok(_) => tls_send_all(reactor2, sock, tls, buf, sent, retries + 1, cb),
            Err(_) => cb(Err(RequestError::Network)),
        }),
    );
}

fn read_response(client: Rc<Client>, key: PoolKey, reactor: crate::reactor::ReactorHandle, sock: RawHandle, tls: Option<Box<dyn TlsConnection>>, is_head: bool, cb: ResponseCallback) {
    read_more(client, key, reactor, sock, tls, is_head, Vec::new(), cb);
}

fn read_more(
    client: Rc<Client>,
    key: PoolKey,
    reactor: crate::reactor::ReactorHandle,
    sock: RawHandle,
    tls: Option<Box<dyn TlsConnection>>,
    is_head: bool,
    mut buf: Vec<u8>,
    cb: ResponseCallback,
) {
    // Look for the end of the status line + headers.
    if let Some(header_end) = find_double_crlf(&buf) {
        let head = buf[..header_end].to_vec();
        let rest = buf.split_off(header_end + 4);
        match parse_status_and_headers(&head) {
            Ok((status, mut headers)) => {
                if is_head || matches!(status / 100, 1) || status == 204 || status == 304 {
                    finish(client, key, sock, tls, status, headers, Vec::new(), cb);
                    return;
                }
                let max_size = usize::MAX / 2;
                let mode = match select_mode(&headers, max_size) {
                    Ok(m) => m,
                    Err(_) => return cb(Err(RequestError::Network)),
                };
                struct RestProvider<'a> {
                    data: &'a [u8],
                    pos: usize,
                }
                impl<'a> crate::scanner::RecvProvider for RestProvider<'a> {
                    fn recv(&mut self, out: &mut [u8]) -> Result<usize, crate::error::ScanError> {
                        let remaining = &self.data[self.pos..];
                        if remaining.is_empty() {
                            return Ok(0);
                        }
                        let n = remaining.len().min(out.len());
                        out[..n].copy_from_slice(&remaining[..n]);
                        self.pos += n;
                        Ok(n)
                    }
                }
                // Fast path: the whole body already arrived with the
                // headers in this read. Otherwise fall through to asking
                // for more bytes and retrying once they land.
                let provider = RestProvider { data: &rest, pos: 0 };
                let mut scanner = crate::scanner::Scanner::new(provider, max_size);
                match read_body_sync(mode, &mut headers, &mut scanner, max_size) {
                    Ok(body) => finish(client, key, sock, tls, status, headers, body, cb),
                    Err(_) => {
                        let mut pending = rest;
                        read_body_loop(client, key, reactor, sock, tls, status, headers, mode, &mut pending, cb);
                    }
                }
            }
            Err(_) => cb(Err(RequestError::Network)),
        }
        return;
    }

    let chunk = vec![0u8; 4096];
    let r2 = reactor.clone();
    async_recv(
        reactor,
        sock,
        tls,
        chunk,
        Box::new(move |res| match res {
            Ok((n, data, tls)) if n > 0 => {
                buf.extend_from_slice(&data[..n]);
                read_more(client, key, r2, sock, tls, is_head, buf, cb);
            }
            Ok(_) => cb(Err(RequestError::Network)),
            Err(e) => cb(Err(e)),
        }),
    );
}

type RecvDoneCallback = Box<dyn FnOnce(Result<(usize, Vec<u8>, Option<Box<dyn TlsConnection>>), RequestError>)>;

/// Read once, either from the raw socket or (when `tls` is `Some`)
/// through the TLS connection, handing the TLS connection back so the
/// caller can keep reading with it.
fn async_recv(reactor: crate::reactor::ReactorHandle, sock: RawHandle, tls: Option<Box<dyn TlsConnection>>, buf: Vec<u8>, cb: RecvDoneCallback) {
    match tls {
        Some(tls) => tls_recv_once(reactor, sock, tls, buf, 0, cb),
        None => reactor.borrow_mut().recv(
            sock,
            buf,
            Box::new(move |res| match res {
                Ok((n, data)) => cb(Ok((n, data, None))),
                Err(_e) => cb(Err(RequestError::Network)),
            }),
        ),
    }
}

fn tls_recv_once(
    reactor: crate::reactor::ReactorHandle,
    sock: RawHandle,
    mut tls: Box<dyn TlsConnection>,
    mut buf: Vec<u8>,
    retries: u32,
    cb: RecvDoneCallback,
) {
    if retries >= MAX_TLS_POLL_RETRIES {
        return cb(Err(RequestError::Network));
    }

    let event = match tls.recv(&mut buf) {
        Ok((TlsStatus::None, n)) => return cb(Ok((n, buf, Some(tls)))),
        Ok((TlsStatus::WantRead, _)) => PollEvent::Read,
        Ok((TlsStatus::WantWrite, _)) => PollEvent::Write,
        // The peer closed the TLS session cleanly mid-read: surface it the
        // same way a plain socket EOF does, as zero bytes.
        Ok((TlsStatus::Shutdown, _)) => return cb(Ok((0, buf, Some(tls)))),
        Ok((TlsStatus::Fatal, _)) | Err(_) => return cb(Err(RequestError::Network)),
    };

    let reactor2 = reactor.clone();
    reactor.borrow_mut().poll(
        sock,
        event,
        false,
        Box::new(move |res| match res {
            Ok(_) => tls_recv_once(reactor2, sock, tls, buf, retries + 1, cb),
            Err(_) => cb(Err(RequestError::Network)),
        }),
    );
}

/// Blocking-style accumulation fallback for a response body that did not
/// fully arrive in the first read: pull more bytes directly (outside the
/// reactor's completion plumbing is not possible here, so this loops the
/// same recv-then-retry shape the server's connection module uses).
fn read_body_loop(
    client: Rc<Client>,
    key: PoolKey,
    reactor: crate::reactor::ReactorHandle,
    sock: RawHandle,
    tls: Option<Box<dyn TlsConnection>>,
    status: u16,
    mut headers: Headers,
    mode: crate::body::BodyMode,
    pending: &mut Vec<u8>,
    cb: ResponseCallback,
) {
    let needed = match mode {
        crate::body::BodyMode::Fixed(n) => n,
        _ => pending.len() + 64 * 1024,
    };

    if pending.len() >= needed {
        let body = std::mem::take(pending);
        finish(client, key, sock, tls, status, headers, body, cb);
        return;
    }

    let chunk = vec![0u8; 4096];
    let r2 = reactor.clone();
    let pending_owned = std::mem::take(pending);
    async_recv(
        reactor,
        sock,
        tls,
        chunk,
        Box::new(move |res| match res {
            Ok((n, data, tls)) if n > 0 => {
                let mut pending_owned = pending_owned;
                pending_owned.extend_from_slice(&data[..n]);
                read_body_loop(client, key, r2, sock, tls, status, headers, mode, &mut pending_owned, cb);
            }
            Ok((_, _, tls)) => {
                let body = pending_owned;
                headers.finish_chunked_trailer(body.len());
                finish(client, key, sock, tls, status, headers, body, cb);
            }
            Err(e) => cb(Err(e)),
        }),
    );
}

fn finish(client: Rc<Client>, key: PoolKey, sock: RawHandle, tls: Option<Box<dyn TlsConnection>>, status: u16, headers: Headers, body: Vec<u8>, cb: ResponseCallback) {
    let must_close = headers.get("connection").map(|v| v.eq_ignore_ascii_case("close")).unwrap_or(false);
    let mut response = Response::new(status);
    response.headers = headers;
    response.set_body(body);
    response.must_close = must_close;

    if !must_close {
        client.release(key, sock, tls);
    }

    cb(Ok(response));
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_status_and_headers(head: &[u8]) -> Result<(u16, Headers), RequestError> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.split("\r\n");
    let status_line = lines.next().ok_or(RequestError::Network)?;
    let mut parts = status_line.splitn(3, ' ');
    let _version = parts.next().ok_or(RequestError::Network)?;
    let status: u16 = parts.next().ok_or(RequestError::Network)?.parse().map_err(|_| RequestError::Network)?;

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.append(name.trim(), value.trim());
        }
    }
    Ok((status, headers))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_url_splits_scheme_host_port_path() {
        let url = parse_url("http://example.com:8080/a/b?c=1").unwrap();
        assert_eq!(url.scheme, "http");
        assert_eq!(url.host, "example.com");
        assert_eq!(url.port, 8080);
        assert_eq!(url.path_and_query, "/a/b?c=1");
    }

    #[test]
    fn parse_url_defaults_port_by_scheme() {
        assert_eq!(parse_url("https://example.com/").unwrap().port, 443);
        assert_eq!(parse_url("http://example.com/").unwrap().port, 80);
    }

    #[test]
    fn parse_url_rejects_missing_scheme() {
        assert!(matches!(parse_url("example.com/"), Err(RequestError::BadUrl)));
    }

    #[test]
    fn parse_status_and_headers_reads_status_code() {
        let (status, headers) = parse_status_and_headers(b"HTTP/1.1 200 OK\r\ncontent-length: 5").unwrap();
        assert_eq!(status, 200);
        assert_eq!(headers.get("content-length"), Some("5"));
    }

    /// A reactor stub that only records what `send` was given and reports
    /// every `recv` as an immediate EOF, enough to exercise `write_request`
    /// without a real socket.
    struct RecordingReactor {
        sent: std::rc::Rc<std::cell::RefCell<Vec<u8>>>,
    }

    impl crate::reactor::Reactor for RecordingReactor {
        fn accept(&mut self, _l: RawHandle, _cb: crate::reactor::Callback<(RawHandle, std::net::SocketAddr)>) {
            unimplemented!()
        }
        fn connect(&mut self, _e: std::net::SocketAddr, _cb: crate::reactor::Callback<RawHandle>) {
            unimplemented!()
        }
        fn send(&mut self, _s: RawHandle, buf: Vec<u8>, cb: crate::reactor::Callback<crate::reactor::IoResult>) {
            self.sent.borrow_mut().extend_from_slice(&buf);
            let n = buf.len();
            cb(Ok((n, buf)));
        }
        fn recv(&mut self, _s: RawHandle, buf: Vec<u8>, cb: crate::reactor::Callback<crate::reactor::IoResult>) {
            cb(Ok((0, buf)));
        }
        fn read_at(&mut self, _f: RawHandle, _o: i64, _b: Vec<u8>, _cb: crate::reactor::Callback<crate::reactor::IoResult>) {
            unimplemented!()
        }
        fn write_at(&mut self, _f: RawHandle, _o: i64, _b: Vec<u8>, _cb: crate::reactor::Callback<crate::reactor::IoResult>) {
            unimplemented!()
        }
        fn seek(&mut self, _f: RawHandle, _o: i64, _w: crate::reactor::Whence, _cb: crate::reactor::Callback<u64>) {
            unimplemented!()
        }
        fn open(&mut self, _p: std::path::PathBuf, _f: i32, _m: u32, _cb: crate::reactor::Callback<RawHandle>) {
            unimplemented!()
        }
        fn close(&mut self, _c: RawHandle, _cb: crate::reactor::Callback<bool>) {
            unimplemented!()
        }
        fn poll(&mut self, _f: RawHandle, _e: PollEvent, _m: bool, _cb: crate::reactor::Callback<PollEvent>) {
            unimplemented!()
        }
        fn timeout(&mut self, _d: std::time::Duration, _cb: crate::reactor::Callback<()>) {
            unimplemented!()
        }
        fn timeout_remove(&mut self, _h: crate::reactor::token::Token) -> bool {
            false
        }
        fn next_tick(&mut self, _cb: crate::reactor::Callback<()>) {
            unimplemented!()
        }
        fn tick(&mut self, _block: bool) -> usize {
            0
        }
        fn num_waiting(&self) -> usize {
            0
        }
    }

    fn test_client(sent: std::rc::Rc<std::cell::RefCell<Vec<u8>>>) -> Rc<Client> {
        let reactor: crate::reactor::ReactorHandle = std::rc::Rc::new(std::cell::RefCell::new(RecordingReactor { sent }));
        let config = crate::config::ClientConfig {
            timeout: std::time::Duration::from_secs(30),
            ignore_redirects: false,
            cors_mode: "no-cors".to_string(),
            credentials: "same-origin".to_string(),
            pool_max_idle_per_host: 4,
        };
        Rc::new(Client::new(
            reactor,
            config,
            std::rc::Rc::new(crate::dns::StdResolver),
            std::rc::Rc::new(crate::tls::NullTlsClient),
        ))
    }

    #[test]
    fn write_request_sets_all_four_default_headers_for_empty_body() {
        let sent = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let client = test_client(sent.clone());
        let url = parse_url("http://example.com/").unwrap();
        let key = PoolKey { host: url.host.clone(), scheme: url.scheme, port: url.port };
        let options = RequestOptions::new(Method::Get, "http://example.com/");
        write_request(client, key, 0, None, url, options, Box::new(|_| {}));

        let wire = String::from_utf8(sent.borrow().clone()).unwrap();
        assert!(wire.contains("content-length: 0\r\n"), "{wire}");
        assert!(wire.contains("accept: */*\r\n"), "{wire}");
        assert!(wire.contains(&format!("user-agent: {USER_AGENT}\r\n")), "{wire}");
        assert!(wire.contains("host: example.com:80\r\n"), "{wire}");
    }

    #[test]
    fn write_request_does_not_override_caller_supplied_headers() {
        let sent = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let client = test_client(sent.clone());
        let url = parse_url("http://example.com/").unwrap();
        let key = PoolKey { host: url.host.clone(), scheme: url.scheme, port: url.port };
        let mut options = RequestOptions::new(Method::Get, "http://example.com/");
        options.headers.set("user-agent", "my-app/1.0");
        write_request(client, key, 0, None, url, options, Box::new(|_| {}));

        let wire = String::from_utf8(sent.borrow().clone()).unwrap();
        assert!(wire.contains("user-agent: my-app/1.0\r\n"), "{wire}");
        assert!(!wire.contains(USER_AGENT), "{wire}");
    }
}
