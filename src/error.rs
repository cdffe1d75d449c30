//! Shared error taxonomy.
//!
//! Mirrors the teacher's `config::ConfigError`: plain enums with manual
//! `Display`/`Error` impls, no external error-derive crate.

use std::fmt;

/// Errors a [`crate::scanner::Scanner`] can report to its callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanError {
    /// The token would exceed `max_token_size` before the split function
    /// is satisfied.
    TooLong,
    /// A split function reported a token shorter than it claimed to need.
    TooShort,
    /// A split function returned an invalid byte count.
    BadReadCount,
    /// A split function tried to un-consume bytes.
    NegativeAdvance,
    /// A split function advanced past the end of the buffered region.
    AdvancedTooFar,
    /// Too many consecutive zero-progress reads.
    NoProgress,
    /// The underlying provider hit EOF with no token pending.
    Eof,
    /// The underlying provider hit EOF mid-token.
    UnexpectedEof,
    /// An unclassified network error surfaced while filling the buffer.
    Unknown,
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanError::TooLong => "token exceeded max_token_size",
            ScanError::TooShort => "split function produced a short token",
            ScanError::BadReadCount => "split function returned an invalid byte count",
            ScanError::NegativeAdvance => "split function advanced backwards",
            ScanError::AdvancedTooFar => "split function advanced past the buffered region",
            ScanError::NoProgress => "too many consecutive empty reads",
            ScanError::Eof => "end of stream",
            ScanError::UnexpectedEof => "end of stream mid-token",
            ScanError::Unknown => "unknown scan error",
        };
        f.write_str(s)
    }
}

impl std::error::Error for ScanError {}

impl From<NetworkError> for ScanError {
    fn from(e: NetworkError) -> Self {
        match e {
            NetworkError::ConnectionClosed => ScanError::Eof,
            NetworkError::Timeout => ScanError::NoProgress,
            _ => ScanError::Unknown,
        }
    }
}

/// Errors the [`crate::body::BodyReader`] can report; a superset of
/// [`ScanError`] plus an HTTP status mapping helper (§4.3/§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyError {
    TooLong,
    TooShort,
    BadReadCount,
    NegativeAdvance,
    AdvancedTooFar,
    NoProgress,
    Eof,
    UnexpectedEof,
    Unknown,
}

impl From<ScanError> for BodyError {
    fn from(e: ScanError) -> Self {
        match e {
            ScanError::TooLong => BodyError::TooLong,
            ScanError::TooShort => BodyError::TooShort,
            ScanError::BadReadCount => BodyError::BadReadCount,
            ScanError::NegativeAdvance => BodyError::NegativeAdvance,
            ScanError::AdvancedTooFar => BodyError::AdvancedTooFar,
            ScanError::NoProgress => BodyError::NoProgress,
            ScanError::Eof => BodyError::Eof,
            ScanError::UnexpectedEof => BodyError::UnexpectedEof,
            ScanError::Unknown => BodyError::Unknown,
        }
    }
}

impl fmt::Display for BodyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BodyError::TooLong => "body exceeded the configured maximum",
            BodyError::TooShort => "body decoder produced a short chunk",
            BodyError::BadReadCount => "body decoder read an invalid byte count",
            BodyError::NegativeAdvance => "body decoder advanced backwards",
            BodyError::AdvancedTooFar => "body decoder advanced past the buffered region",
            BodyError::NoProgress => "body decoder made no progress",
            BodyError::Eof => "end of stream while reading body",
            BodyError::UnexpectedEof => "end of stream mid-body",
            BodyError::Unknown => "unknown body error",
        };
        f.write_str(s)
    }
}

impl std::error::Error for BodyError {}

impl BodyError {
    /// Map a body error to the HTTP status code a handler should respond
    /// with, per §4.3/§7.
    pub fn status_code(&self) -> u16 {
        match self {
            BodyError::TooLong => 413,
            BodyError::TooShort | BodyError::BadReadCount => 400,
            BodyError::NegativeAdvance | BodyError::AdvancedTooFar => 500,
            BodyError::Eof | BodyError::UnexpectedEof => 400,
            BodyError::NoProgress => 400,
            BodyError::Unknown => 500,
        }
    }
}

/// Reactor/network-level errors (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkError {
    ConnectionClosed,
    Aborted,
    Refused,
    Timeout,
    WouldBlock,
    HostUnreachable,
    Shutdown,
    NotConnected,
    Unknown,
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetworkError::ConnectionClosed => "connection closed",
            NetworkError::Aborted => "operation aborted",
            NetworkError::Refused => "connection refused",
            NetworkError::Timeout => "operation timed out",
            NetworkError::WouldBlock => "operation would block",
            NetworkError::HostUnreachable => "host unreachable",
            NetworkError::Shutdown => "connection is shutting down",
            NetworkError::NotConnected => "not connected",
            NetworkError::Unknown => "unknown network error",
        };
        f.write_str(s)
    }
}

impl std::error::Error for NetworkError {}

impl NetworkError {
    /// Classify a raw OS errno the way the reactor backends need to.
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::ECONNRESET | libc::EPIPE => NetworkError::ConnectionClosed,
            libc::ECONNABORTED => NetworkError::Aborted,
            libc::ECONNREFUSED => NetworkError::Refused,
            libc::ETIMEDOUT => NetworkError::Timeout,
            libc::EWOULDBLOCK if libc::EWOULDBLOCK != libc::EAGAIN => NetworkError::WouldBlock,
            libc::EAGAIN => NetworkError::WouldBlock,
            libc::EHOSTUNREACH => NetworkError::HostUnreachable,
            libc::ENOTCONN => NetworkError::NotConnected,
            _ => NetworkError::Unknown,
        }
    }
}

/// A reactor operation's terminal result: either a byte count / handle
/// and success, a classified network error, or a raw OS errno (§4.1,§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsError {
    Network(NetworkError),
    Errno(i32),
}

impl fmt::Display for OsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsError::Network(n) => write!(f, "{n}"),
            OsError::Errno(e) => write!(f, "os error {e}"),
        }
    }
}

impl std::error::Error for OsError {}

/// Errors the client core dispatches to its user callback (§4.5/§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    None,
    BadUrl,
    Dns,
    Network,
    Cors,
    Timeout,
    Aborted,
    Unknown,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestError::None => "no error",
            RequestError::BadUrl => "malformed URL",
            RequestError::Dns => "DNS resolution failed",
            RequestError::Network => "network error",
            RequestError::Cors => "blocked by CORS policy",
            RequestError::Timeout => "request timed out",
            RequestError::Aborted => "request aborted",
            RequestError::Unknown => "unknown request error",
        };
        f.write_str(s)
    }
}

impl std::error::Error for RequestError {}
