//! TLS vtable (§6 "TLS vtable"): a small fakeable collaborator trait so
//! the client/server state machines can drive a handshake and stream
//! reads/writes without depending on a concrete TLS library, mirroring
//! how the reactor itself is hidden behind a trait object.

use crate::reactor::RawHandle;

/// Outcome of a single TLS operation (§6): most operations either make
/// progress, or need the underlying socket to become readable/writable
/// before they can proceed, matching OpenSSL/rustls-style non-blocking
/// handshake state machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsStatus {
    None,
    WantRead,
    WantWrite,
    Shutdown,
    Fatal,
}

#[derive(Debug)]
pub struct TlsError(pub String);

impl std::fmt::Display for TlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tls error: {}", self.0)
    }
}

impl std::error::Error for TlsError {}

/// A TLS implementation pluggable behind this vtable. Every method takes
/// `&mut self` on the connection object returned by `connection_create`;
/// `TlsClient` itself only holds process-wide configuration (trust
/// roots, ALPN protocols, ...).
pub trait TlsClient {
    fn connection_create(&self, socket: RawHandle, host: &str) -> Box<dyn TlsConnection>;
}

pub trait TlsConnection {
    /// Drive the handshake forward one step. Returns `WantRead`/
    /// `WantWrite` until the handshake completes (`None`).
    fn connect(&mut self) -> Result<TlsStatus, TlsError>;
    fn send(&mut self, bytes: &[u8]) -> Result<(TlsStatus, usize), TlsError>;
    fn recv(&mut self, buf: &mut [u8]) -> Result<(TlsStatus, usize), TlsError>;
    fn shutdown(&mut self) -> Result<TlsStatus, TlsError>;
}

/// A null/passthrough implementation for plaintext connections and for
/// tests: `connect` completes immediately and `send`/`recv` are meant to
/// never be reached because callers only construct one when a request
/// targets `https://`.
pub struct NullTlsClient;

impl TlsClient for NullTlsClient {
    fn connection_create(&self, _socket: RawHandle, _host: &str) -> Box<dyn TlsConnection> {
        Box::new(NullTlsConnection)
    }
}

struct NullTlsConnection;

impl TlsConnection for NullTlsConnection {
    fn connect(&mut self) -> Result<TlsStatus, TlsError> {
        Ok(TlsStatus::None)
    }

    fn send(&mut self, _bytes: &[u8]) -> Result<(TlsStatus, usize), TlsError> {
        Err(TlsError("null TLS client cannot send".to_string()))
    }

    fn recv(&mut self, _buf: &mut [u8]) -> Result<(TlsStatus, usize), TlsError> {
        Err(TlsError("null TLS client cannot recv".to_string()))
    }

    fn shutdown(&mut self) -> Result<TlsStatus, TlsError> {
        Ok(TlsStatus::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_client_completes_handshake_immediately() {
        let client = NullTlsClient;
        let mut conn = client.connection_create(3, "example.com");
        assert_eq!(conn.connect().unwrap(), TlsStatus::None);
    }
}
