//! `grow-httpd`: a cross-platform, completion-based HTTP/1.1 core.
//!
//! Three layers, leaves first: a completion reactor over `io_uring`
//! (Linux) or `mio` (macOS/BSD kqueue, Windows IOCP), a callback-driven
//! scanner and body reader built on it, and the HTTP/1.1 server/client
//! state machines built on those.

pub mod arena;
pub mod body;
pub mod client;
pub mod config;
pub mod dns;
pub mod error;
pub mod headers;
pub mod http;
pub mod pool;
pub mod reactor;
pub mod router;
pub mod scanner;
pub mod server;
pub mod tls;
