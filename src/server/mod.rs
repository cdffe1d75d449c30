//! HTTP/1.1 server worker loop (§4.4, §5 concurrency model): one reactor
//! per worker thread, `SO_REUSEPORT` listeners so the kernel load-balances
//! accepted connections across workers, no cross-thread sharing of
//! connection state.

pub mod connection;

use std::cell::RefCell;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::reactor::{RawHandle, Reactor, ReactorHandle};
use crate::router::Router;

#[cfg(target_os = "linux")]
fn new_reactor(ring_size: u32) -> io::Result<ReactorHandle> {
    let reactor = crate::reactor::uring::UringReactor::new(ring_size)?;
    Ok(Rc::new(RefCell::new(reactor)))
}

#[cfg(target_os = "linux")]
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    crate::reactor::uring::create_listener_with_reuseport(addr)
}

#[cfg(not(target_os = "linux"))]
fn new_reactor(ring_size: u32) -> io::Result<ReactorHandle> {
    let reactor = crate::reactor::mio_backend::MioReactor::new(ring_size as usize)?;
    Ok(Rc::new(RefCell::new(reactor)))
}

#[cfg(not(target_os = "linux"))]
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    crate::reactor::mio_backend::create_listener_with_reuseport(addr)
}

/// Shared signal flipped by `shutdown()`; each worker polls it between
/// accepts (§4.4 "graceful shutdown").
pub struct ShutdownSignal(AtomicBool);

impl ShutdownSignal {
    pub fn new() -> Self {
        ShutdownSignal(AtomicBool::new(false))
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Start `config.thread_count` worker threads (0 means "one per CPU"),
/// each running its own single-threaded reactor and accept loop, and
/// block until every worker returns.
pub fn run(config: ServerConfig, router: Router) -> io::Result<()> {
    let addr: SocketAddr = config
        .listen
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid listen address: {e}")))?;

    let thread_count = if config.thread_count == 0 {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    } else {
        config.thread_count
    };

    let config = Arc::new(config);
    let router = Arc::new(router);
    let shutdown = Arc::new(ShutdownSignal::new());

    info!(threads = thread_count, %addr, "starting http server");

    let mut handles = Vec::with_capacity(thread_count);
    for worker_id in 0..thread_count {
        let config = Arc::clone(&config);
        let router = Arc::clone(&router);
        let shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name(format!("http-worker-{worker_id}"))
            .spawn(move || {
                if let Err(e) = worker_loop(worker_id, addr, config, router, shutdown) {
                    error!(worker = worker_id, error = %e, "worker exited with error");
                }
            })?;
        handles.push(handle);
    }

    for handle in handles {
        let _ = handle.join();
    }

    Ok(())
}

fn worker_loop(
    worker_id: usize,
    addr: SocketAddr,
    config: Arc<ServerConfig>,
    router: Arc<Router>,
    shutdown: Arc<ShutdownSignal>,
) -> io::Result<()> {
    let reactor = new_reactor(config.ring_size)?;
    let listener = create_listener(addr)?;
    let listener_fd = listener.as_raw_fd();

    info!(worker = worker_id, fd = listener_fd, "worker listening");

    accept_loop(reactor, listener_fd, router, config, shutdown);
    Ok(())
}

fn accept_loop(
    reactor: ReactorHandle,
    listener_fd: RawHandle,
    router: Arc<Router>,
    config: Arc<ServerConfig>,
    shutdown: Arc<ShutdownSignal>,
) {
    schedule_accept(reactor.clone(), listener_fd, router.clone(), config.clone(), shutdown.clone());

    while !shutdown.is_set() {
        let mut r = reactor.borrow_mut();
        if r.num_waiting() == 0 {
            break;
        }
        r.tick(true);
    }
}

fn schedule_accept(
    reactor: ReactorHandle,
    listener_fd: RawHandle,
    router: Arc<Router>,
    config: Arc<ServerConfig>,
    shutdown: Arc<ShutdownSignal>,
) {
    if shutdown.is_set() {
        return;
    }

    let r2 = reactor.clone();
    reactor.borrow_mut().accept(
        listener_fd,
        Box::new(move |res| {
            match res {
                Ok((fd, peer_addr)) => {
                    let r3 = r2.clone();
                    let router2 = router.clone();
                    let config2 = config.clone();
                    // Keep accepting concurrently with draining this
                    // connection; each connection drives itself to
                    // completion through `connection::drive`.
                    schedule_accept(r2.clone(), listener_fd, router.clone(), config.clone(), shutdown.clone());
                    connection::drive(r3, fd, fd as usize, router2, config2, peer_addr);
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    // A failed accept still has to re-arm the listener:
                    // the mio backend no longer self-rearms (rearming is
                    // the caller's job, same as `uring.rs`), so skipping
                    // this would permanently stop the worker's accept
                    // loop on the first transient accept error.
                    schedule_accept(r2, listener_fd, router, config, shutdown);
                }
            }
        }),
    );
}
