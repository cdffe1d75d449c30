//! HTTP/1.1 wire-level types: request/response records (§3) and the
//! streaming response writer (§4.7).

pub mod request;
pub mod response;
pub mod writer;

pub use request::{Method, Request};
pub use response::{Cookie, Response, SameSite};
pub use writer::{build_heading, respond, StreamingWriter};
