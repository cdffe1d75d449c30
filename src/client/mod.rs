//! HTTP/1.1 client (§4.5 "Client state machine", §4.6 "Connection pool").

pub mod connection;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::config::ClientConfig;
use crate::dns::Resolver;
use crate::error::RequestError;
use crate::headers::Headers;
use crate::http::request::Method;
use crate::http::response::Response;
use crate::pool::{Handle, Pool};
use crate::reactor::ReactorHandle;
use crate::tls::{TlsClient, TlsConnection};

/// A single outbound request's call-time options (§6 "client config
/// options"); anything not set here falls back to the client's
/// `ClientConfig` defaults.
pub struct RequestOptions {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub cookies: Vec<(String, String)>,
    pub ignore_redirects: Option<bool>,
}

impl RequestOptions {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        RequestOptions {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: Vec::new(),
            cookies: Vec::new(),
            ignore_redirects: None,
        }
    }
}

pub type ResponseCallback = Box<dyn FnOnce(Result<Response, RequestError>)>;

/// Idle, kept-alive connections, pooled per §4.6 by `(host, scheme,
/// port)` rather than by resolved IP (§13 Open Question decision): DNS
/// can return different IPs for the same logical origin across lookups,
/// and pooling by origin is what actually saves a handshake on reuse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub host: String,
    pub scheme: &'static str,
    pub port: u16,
}

/// A single idle kept-alive connection. `tls` holds the established TLS
/// session for `https://` origins so a reused connection skips the
/// handshake entirely (§4.5 step 4 only runs on a fresh connect).
pub struct PooledConnection {
    pub sock: crate::reactor::RawHandle,
    pub tls: Option<Box<dyn TlsConnection>>,
}

impl Default for PooledConnection {
    fn default() -> Self {
        PooledConnection { sock: -1, tls: None }
    }
}

pub struct Client {
    pub reactor: ReactorHandle,
    pub config: ClientConfig,
    pub resolver: Rc<dyn Resolver>,
    pub tls: Rc<dyn TlsClient>,
    idle: RefCell<HashMap<PoolKey, Vec<Handle>>>,
    connections: RefCell<Pool<PooledConnection>>,
}

impl Client {
    pub fn new(reactor: ReactorHandle, config: ClientConfig, resolver: Rc<dyn Resolver>, tls: Rc<dyn TlsClient>) -> Self {
        Client {
            reactor,
            config,
            resolver,
            tls,
            idle: RefCell::new(HashMap::new()),
            connections: RefCell::new(Pool::new()),
        }
    }

    /// Pop a pooled idle connection for `key`, if any (§4.6 "acquire"),
    /// along with its established TLS session (`None` for plaintext
    /// origins) so a reused connection can skip the handshake.
    pub fn acquire(&self, key: &PoolKey) -> Option<(crate::reactor::RawHandle, Option<Box<dyn TlsConnection>>)> {
        let mut idle = self.idle.borrow_mut();
        let handles = idle.get_mut(key)?;
        let handle = handles.pop()?;
        if handles.is_empty() {
            idle.remove(key);
        }
        let mut connections = self.connections.borrow_mut();
        let entry = connections.get_mut(handle);
        let sock = entry.sock;
        let tls = entry.tls.take();
        connections.release(handle);
        Some((sock, tls))
    }

    /// Return a connection to the pool for reuse (§4.6 "release"), keeping
    /// its TLS session alive so the next `acquire` doesn't re-handshake.
    pub fn release(&self, key: PoolKey, sock: crate::reactor::RawHandle, tls: Option<Box<dyn TlsConnection>>) {
        let mut connections = self.connections.borrow_mut();
        let (handle, slot) = connections.get_new();
        slot.sock = sock;
        slot.tls = tls;
        drop(connections);
        self.idle.borrow_mut().entry(key).or_default().push(handle);
    }

    pub fn request(self: &Rc<Self>, options: RequestOptions, cb: ResponseCallback) {
        connection::send_request(self.clone(), options, cb);
    }
}
