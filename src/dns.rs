//! DNS vtable (§6 "DNS vtable"): hostname resolution as a pluggable,
//! callback-driven collaborator so the client state machine doesn't pay
//! for (or depend on) a specific resolver implementation.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use crate::error::RequestError;

#[derive(Debug, Clone)]
pub struct DnsRecord {
    pub addrs: Vec<IpAddr>,
}

pub type DnsCallback = Box<dyn FnOnce(Result<DnsRecord, RequestError>)>;

pub trait Resolver {
    /// Resolve `hostname`; `cb` is invoked exactly once with the result.
    /// The default `StdResolver` below resolves synchronously and calls
    /// back inline, but the trait itself makes no such promise so an
    /// async resolver can be substituted without touching callers.
    fn resolve(&self, hostname: &str, cb: DnsCallback);
}

/// Resolves via `std::net::ToSocketAddrs`, which shells out to the
/// platform resolver (`getaddrinfo` on Unix). Blocking, but kept off the
/// reactor's hot path since DNS lookups are rare relative to requests on
/// a warm connection pool.
pub struct StdResolver;

impl Resolver for StdResolver {
    fn resolve(&self, hostname: &str, cb: DnsCallback) {
        let lookup = format!("{hostname}:0");
        match lookup.to_socket_addrs() {
            Ok(addrs) => {
                let addrs: Vec<IpAddr> = addrs.map(|a: SocketAddr| a.ip()).collect();
                if addrs.is_empty() {
                    cb(Err(RequestError::Dns));
                } else {
                    cb(Ok(DnsRecord { addrs }));
                }
            }
            Err(_) => cb(Err(RequestError::Dns)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn resolves_localhost() {
        let resolver = StdResolver;
        let result = Rc::new(RefCell::new(None));
        let result2 = result.clone();
        resolver.resolve("localhost", Box::new(move |r| *result2.borrow_mut() = Some(r)));
        let outcome = result.borrow();
        assert!(outcome.as_ref().unwrap().is_ok());
    }

    #[test]
    fn unresolvable_host_reports_dns_error() {
        let resolver = StdResolver;
        let result = Rc::new(RefCell::new(None));
        let result2 = result.clone();
        resolver.resolve(
            "this-host-name-should-never-resolve.invalid",
            Box::new(move |r| *result2.borrow_mut() = Some(r)),
        );
        let outcome = result.borrow();
        assert!(matches!(outcome.as_ref().unwrap(), Err(RequestError::Dns)));
    }
}
