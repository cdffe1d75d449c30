//! Per-connection state machine (§4.4): Idle -> ReadingLine -> ReadingHeaders
//! -> ReadingBody -> InHandler -> Writing -> Closing/Closed.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::body::{select_mode, BodyMode};
use crate::config::ServerConfig;
use crate::headers::Headers;
use crate::http::request::{parse_request_line, Method, Request, RequestLineError};
use crate::http::response::Response;
use crate::http::writer::respond;
use crate::reactor::{recv_all, send_all, Callback, RawHandle, ReactorHandle};
use crate::router::Router;
use crate::scanner::find_crlf;

/// Everything a connection's step functions need that doesn't change
/// across the life of the connection, bundled so it threads through the
/// callback chain as one cheap clone (two `Arc` bumps, one `Copy` addr)
/// instead of a growing parameter list.
#[derive(Clone)]
struct Ctx {
    router: Arc<Router>,
    config: Arc<ServerConfig>,
    client_endpoint: SocketAddr,
}

/// A connection's accumulated-but-not-yet-consumed input. Threaded by
/// value through the completion-callback chain below rather than stored
/// on a long-lived `Connection` record, since every step either finishes
/// the request or re-submits exactly one more `recv`.
struct InBuf {
    data: Vec<u8>,
    start: usize,
}

impl InBuf {
    fn new() -> Self {
        InBuf { data: Vec::new(), start: 0 }
    }

    fn unread(&self) -> &[u8] {
        &self.data[self.start..]
    }

    fn consume(&mut self, n: usize) {
        self.start += n;
        if self.start == self.data.len() {
            self.data.clear();
            self.start = 0;
        }
    }

    fn extend(&mut self, bytes: &[u8]) {
        if self.start > 0 {
            self.data.drain(0..self.start);
            self.start = 0;
        }
        self.data.extend_from_slice(bytes);
    }
}

/// Begin driving one connection: read bytes until a full request-line +
/// headers + body have been parsed, dispatch to `router`, write the
/// response. The connection itself stays in the caller's `Pool`; this
/// module only supplies the per-step logic, threaded through by value
/// (`InBuf`, parsed headers, ...) across the completion callbacks.
pub fn drive(
    reactor: ReactorHandle,
    sock: RawHandle,
    conn_idx: usize,
    router: Arc<Router>,
    config: Arc<ServerConfig>,
    client_endpoint: SocketAddr,
) {
    let ctx = Ctx { router, config, client_endpoint };
    read_line(reactor, sock, conn_idx, ctx, InBuf::new());
}

pub fn try_parse_request_line(line: &str) -> Result<(Method, String, u8, u8), u16> {
    match parse_request_line(line) {
        Ok(rl) => Ok((rl.method, rl.target, rl.version_major, rl.version_minor)),
        Err(RequestLineError::InvalidMethod) => Err(501),
        Err(RequestLineError::MalformedLine) | Err(RequestLineError::InvalidVersion) => Err(400),
    }
}

/// Try to pull one CRLF-terminated line out of `inbuf`, returning the line
/// (without the CRLF) and advancing the consumed cursor, or `None` if more
/// bytes are needed.
fn take_line(inbuf: &mut InBuf) -> Option<Vec<u8>> {
    let unread = inbuf.unread();
    let at = find_crlf(unread)?;
    let line = unread[..at].to_vec();
    inbuf.consume(at + 2);
    Some(line)
}

fn read_line(reactor: ReactorHandle, sock: RawHandle, conn_idx: usize, ctx: Ctx, mut inbuf: InBuf) {
    if let Some(line) = take_line(&mut inbuf) {
        let text = String::from_utf8_lossy(&line).into_owned();
        on_request_line(reactor, sock, conn_idx, ctx, inbuf, text);
        return;
    }

    let buf = vec![0u8; 4096];
    let r2 = reactor.clone();
    recv_all_once(
        reactor,
        sock,
        buf,
        Box::new(move |res| match res {
            Ok((n, data)) if n > 0 => {
                inbuf.extend(&data[..n]);
                read_line(r2, sock, conn_idx, ctx, inbuf);
            }
            _ => {
                // peer closed or errored before sending a full line; drop
                // the connection (caller observes state via the pool).
            }
        }),
    );
}

fn on_request_line(reactor: ReactorHandle, sock: RawHandle, conn_idx: usize, ctx: Ctx, inbuf: InBuf, line: String) {
    match try_parse_request_line(&line) {
        Ok(parts) => read_headers(reactor, sock, conn_idx, ctx, inbuf, parts, Headers::new()),
        Err(status) => {
            let response = Response::new(status);
            respond(reactor, sock, response, 1, false, false, Box::new(|_| {}));
        }
    }
}

fn read_headers(
    reactor: ReactorHandle,
    sock: RawHandle,
    conn_idx: usize,
    ctx: Ctx,
    mut inbuf: InBuf,
    parts: (Method, String, u8, u8),
    mut headers: Headers,
) {
    loop {
        match take_line(&mut inbuf) {
            Some(line) if line.is_empty() => {
                if let Err(_e) = headers.validate_received() {
                    let response = Response::new(400);
                    respond(reactor, sock, response, parts.3, false, false, Box::new(|_| {}));
                    return;
                }
                read_body(reactor, sock, conn_idx, ctx, inbuf, parts, headers);
                return;
            }
            Some(line) => {
                let text = String::from_utf8_lossy(&line).into_owned();
                if let Some((name, value)) = text.split_once(':') {
                    headers.append(name.trim(), value.trim());
                }
            }
            None => break,
        }
    }

    let buf = vec![0u8; 4096];
    let r2 = reactor.clone();
    recv_all_once(
        reactor,
        sock,
        buf,
        Box::new(move |res| match res {
            Ok((n, data)) if n > 0 => {
                inbuf.extend(&data[..n]);
                read_headers(r2, sock, conn_idx, ctx, inbuf, parts, headers);
            }
            _ => {}
        }),
    );
}

fn read_body(
    reactor: ReactorHandle,
    sock: RawHandle,
    conn_idx: usize,
    ctx: Ctx,
    inbuf: InBuf,
    parts: (Method, String, u8, u8),
    headers: Headers,
) {
    let mode = match select_mode(&headers, ctx.config.connection_allowed_size) {
        Ok(m) => m,
        Err(e) => {
            let response = Response::new(e.status_code());
            respond(reactor, sock, response, parts.3, false, false, Box::new(|_| {}));
            return;
        }
    };

    match mode {
        BodyMode::Empty => dispatch(reactor, sock, conn_idx, ctx, parts, headers, Vec::new()),
        BodyMode::Fixed(n) => read_fixed_body(reactor, sock, conn_idx, ctx, inbuf, parts, headers, n),
        BodyMode::Chunked => {
            // Reassembling the full chunked algorithm on top of async
            // completions mirrors body::read_chunked but drives recv via
            // the reactor instead of a synchronous provider; delegated to
            // a dedicated async chunk reader below.
            read_chunked_body(reactor, sock, conn_idx, ctx, inbuf, parts, headers, Vec::new())
        }
    }
}

fn read_fixed_body(
    reactor: ReactorHandle,
    sock: RawHandle,
    conn_idx: usize,
    ctx: Ctx,
    mut inbuf: InBuf,
    parts: (Method, String, u8, u8),
    headers: Headers,
    n: usize,
) {
    if inbuf.unread().len() >= n {
        let body = inbuf.unread()[..n].to_vec();
        inbuf.consume(n);
        dispatch(reactor, sock, conn_idx, ctx, parts, headers, body);
        return;
    }

    let buf = vec![0u8; 4096];
    let r2 = reactor.clone();
    recv_all_once(
        reactor,
        sock,
        buf,
        Box::new(move |res| match res {
            Ok((m, data)) if m > 0 => {
                inbuf.extend(&data[..m]);
                read_fixed_body(r2, sock, conn_idx, ctx, inbuf, parts, headers, n);
            }
            _ => {}
        }),
    );
}

fn read_chunked_body(
    reactor: ReactorHandle,
    sock: RawHandle,
    conn_idx: usize,
    ctx: Ctx,
    mut inbuf: InBuf,
    parts: (Method, String, u8, u8),
    mut headers: Headers,
    mut body: Vec<u8>,
) {
    loop {
        match take_line(&mut inbuf) {
            Some(size_line) => {
                let text = String::from_utf8_lossy(&size_line);
                let size_str = text.split(';').next().unwrap_or("").trim();
                let size = match usize::from_str_radix(size_str, 16) {
                    Ok(n) => n,
                    Err(_) => {
                        let response = Response::new(400);
                        respond(reactor, sock, response, parts.3, false, false, Box::new(|_| {}));
                        return;
                    }
                };

                if size == 0 {
                    read_trailers(reactor, sock, conn_idx, ctx, inbuf, parts, headers, body);
                    return;
                }

                if inbuf.unread().len() < size + 2 {
                    let buf = vec![0u8; 4096];
                    let r2 = reactor.clone();
                    // put the size line back conceptually by re-deriving it
                    // next pass is avoided: stash state via closure capture.
                    let size_line_owned = size_line;
                    recv_all_once(
                        reactor,
                        sock,
                        buf,
                        Box::new(move |res| match res {
                            Ok((m, data)) if m > 0 => {
                                let mut inbuf = inbuf;
                                inbuf.extend(&data[..m]);
                                // Re-insert the already-consumed size line so the
                                // loop can re-parse it along with the new bytes.
                                let mut restored = Vec::with_capacity(size_line_owned.len() + 2 + inbuf.unread().len());
                                restored.extend_from_slice(&size_line_owned);
                                restored.extend_from_slice(b"\r\n");
                                restored.extend_from_slice(inbuf.unread());
                                let mut inbuf2 = InBuf::new();
                                inbuf2.extend(&restored);
                                read_chunked_body(r2, sock, conn_idx, ctx, inbuf2, parts, headers, body);
                            }
                            _ => {}
                        }),
                    );
                    return;
                }

                if body.len() + size > ctx.config.connection_allowed_size {
                    let response = Response::new(413);
                    respond(reactor, sock, response, parts.3, false, false, Box::new(|_| {}));
                    return;
                }

                body.extend_from_slice(&inbuf.unread()[..size]);
                inbuf.consume(size + 2);
            }
            None => {
                let buf = vec![0u8; 4096];
                let r2 = reactor.clone();
                recv_all_once(
                    reactor,
                    sock,
                    buf,
                    Box::new(move |res| match res {
                        Ok((m, data)) if m > 0 => {
                            inbuf.extend(&data[..m]);
                            read_chunked_body(r2, sock, conn_idx, ctx, inbuf, parts, headers, body);
                        }
                        _ => {}
                    }),
                );
                return;
            }
        }
    }
}

fn read_trailers(
    reactor: ReactorHandle,
    sock: RawHandle,
    conn_idx: usize,
    ctx: Ctx,
    mut inbuf: InBuf,
    parts: (Method, String, u8, u8),
    mut headers: Headers,
    body: Vec<u8>,
) {
    loop {
        match take_line(&mut inbuf) {
            Some(line) if line.is_empty() => {
                headers.finish_chunked_trailer(body.len());
                dispatch(reactor, sock, conn_idx, ctx, parts, headers, body);
                return;
            }
            Some(line) => {
                let text = String::from_utf8_lossy(&line).into_owned();
                if let Some((name, value)) = text.split_once(':') {
                    let name = name.trim();
                    if crate::headers::is_forbidden_trailer_header(name) {
                        let response = Response::new(400);
                        respond(reactor, sock, response, parts.3, false, false, Box::new(|_| {}));
                        return;
                    }
                    headers.append(name, value.trim());
                }
            }
            None => {
                let buf = vec![0u8; 4096];
                let r2 = reactor.clone();
                recv_all_once(
                    reactor,
                    sock,
                    buf,
                    Box::new(move |res| match res {
                        Ok((m, data)) if m > 0 => {
                            inbuf.extend(&data[..m]);
                            read_trailers(r2, sock, conn_idx, ctx, inbuf, parts, headers, body);
                        }
                        _ => {}
                    }),
                );
                return;
            }
        }
    }
}

fn dispatch(
    reactor: ReactorHandle,
    sock: RawHandle,
    conn_idx: usize,
    ctx: Ctx,
    parts: (Method, String, u8, u8),
    headers: Headers,
    body: Vec<u8>,
) {
    let (method, target, major, minor) = parts;
    let is_head_as_get = method == Method::Head && ctx.config.redirect_head_to_get;
    let effective_method = if is_head_as_get { Method::Get } else { method };

    let mut request = Request::new(
        crate::http::request::RequestLine {
            method: effective_method,
            target,
            version_major: major,
            version_minor: minor,
        },
        headers,
        ctx.client_endpoint,
    );
    request.is_head_as_get = is_head_as_get;
    request.body = Some(body);

    let wants_close = request.wants_close() || request.is_http_1_0();
    let mut response = ctx.router.dispatch(&request);
    response.must_close = response.must_close || wants_close;

    if method == Method::Head {
        response.headers.set("connection", if response.must_close { "close" } else { "keep-alive" });
        let mut headers_only = Response::new(response.status);
        headers_only.headers = response.headers;
        headers_only.cookies = response.cookies;
        respond(
            reactor,
            sock,
            headers_only,
            minor,
            method == Method::Connect,
            true,
            Box::new(move |_| {
                let _ = conn_idx;
            }),
        );
        return;
    }

    response
        .headers
        .set("connection", if response.must_close { "close" } else { "keep-alive" });
    respond(
        reactor,
        sock,
        response,
        minor,
        method == Method::Connect,
        false,
        Box::new(move |_| {
            let _ = conn_idx;
        }),
    );
}

/// Thin wrapper matching `recv_all`'s shape but surfacing a single
/// best-effort `recv` (one syscall, not looped to fill the buffer) since
/// the connection state machine wants to react to partial reads directly
/// rather than block until `buf` is full.
fn recv_all_once(reactor: ReactorHandle, sock: RawHandle, buf: Vec<u8>, cb: Callback<(usize, Vec<u8>)>) {
    let len = buf.len();
    reactor.borrow_mut().recv(
        sock,
        buf,
        Box::new(move |res| match res {
            Ok((n, data)) => {
                let mut data = data;
                data.truncate(len.min(data.len()).max(n));
                cb(Ok((n, data)))
            }
            Err(e) => cb(Err(e)),
        }),
    );
}

#[allow(unused)]
fn send_response_raw(reactor: ReactorHandle, sock: RawHandle, wire: Vec<u8>, cb: Callback<usize>) {
    send_all(reactor, sock, wire, cb);
}
