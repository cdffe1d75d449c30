//! Request routing surface (§6 "Router surface"): a handler is a plain
//! function from `Request` to `Response`; pattern matching on the path
//! itself is intentionally out of scope (§1) and left to the embedder.

use std::collections::HashMap;
use std::sync::Arc;

use crate::http::request::{Method, Request};
use crate::http::response::Response;

pub type Handler = Arc<dyn Fn(&Request) -> Response + Send + Sync>;

/// Exact `(method, path)` match router. Embedders wanting pattern or
/// prefix matching register their own handler that does the matching
/// itself and populates `Request::path_params` before further dispatch;
/// this type only supplies the default exact-match behavior.
pub struct Router {
    routes: HashMap<(Method, String), Handler>,
    not_found: Handler,
}

fn default_not_found(_req: &Request) -> Response {
    Response::new(404)
}

impl Router {
    pub fn new() -> Self {
        Router {
            routes: HashMap::new(),
            not_found: Arc::new(default_not_found),
        }
    }

    pub fn route(&mut self, method: Method, path: impl Into<String>, handler: Handler) {
        self.routes.insert((method, path.into()), handler);
    }

    pub fn set_not_found(&mut self, handler: Handler) {
        self.not_found = handler;
    }

    pub fn dispatch(&self, request: &Request) -> Response {
        match self.routes.get(&(request.method, request.url.path.clone())) {
            Some(handler) => handler(request),
            None => (self.not_found)(request),
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Headers;
    use crate::http::request::RequestLine;

    fn make_request(method: Method, target: &str) -> Request {
        Request::new(
            RequestLine {
                method,
                target: target.to_string(),
                version_major: 1,
                version_minor: 1,
            },
            Headers::new(),
            "127.0.0.1:1234".parse().unwrap(),
        )
    }

    #[test]
    fn dispatches_exact_match() {
        let mut router = Router::new();
        router.route(Method::Get, "/ping", Arc::new(|_req| {
            let mut r = Response::new(200);
            r.set_body(b"pong".to_vec());
            r
        }));
        let response = router.dispatch(&make_request(Method::Get, "/ping"));
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"pong");
    }

    #[test]
    fn falls_back_to_not_found() {
        let router = Router::new();
        let response = router.dispatch(&make_request(Method::Get, "/missing"));
        assert_eq!(response.status, 404);
    }

    #[test]
    fn method_is_part_of_the_route_key() {
        let mut router = Router::new();
        router.route(Method::Post, "/items", Arc::new(|_req| Response::new(201)));
        assert_eq!(router.dispatch(&make_request(Method::Get, "/items")).status, 404);
        assert_eq!(router.dispatch(&make_request(Method::Post, "/items")).status, 201);
    }
}
