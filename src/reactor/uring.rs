//! Linux `io_uring` reactor backend.
//!
//! Grounded on `runtime::uring::event_loop`'s `worker_loop`/`submit_*`/
//! `handle_*` shape: one ring per worker thread, tokens correlate
//! completions back to pending operations, `create_listener_with_reuseport`
//! reused verbatim. Generalized from the teacher's fixed
//! accept/read/write/Connection trio to the full [`super::Reactor`]
//! operation set, with each pending operation (and any buffer or sockaddr
//! storage it needs to stay alive until completion) owned by a
//! [`slab::Slab`] keyed by the same token submitted as `user_data`.

use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::time::Duration;

use io_uring::{opcode, types, IoUring};
use slab::Slab;
use tracing::{debug, trace, warn};

use crate::error::{NetworkError, OsError};
use crate::reactor::token::Token;
use crate::reactor::{Callback, PollEvent, RawHandle, Reactor, Whence};

enum PendingOp {
    Accept {
        cb: Callback<(RawHandle, SocketAddr)>,
        storage: Box<libc::sockaddr_storage>,
        len: Box<libc::socklen_t>,
    },
    Connect {
        cb: Callback<RawHandle>,
        fd: RawHandle,
        addr: Box<socket2::SockAddr>,
    },
    Recv {
        cb: Callback<(usize, Vec<u8>)>,
        buf: Vec<u8>,
    },
    Send {
        cb: Callback<(usize, Vec<u8>)>,
        buf: Vec<u8>,
    },
    ReadAt {
        cb: Callback<(usize, Vec<u8>)>,
        buf: Vec<u8>,
    },
    WriteAt {
        cb: Callback<(usize, Vec<u8>)>,
        buf: Vec<u8>,
    },
    Close {
        cb: Callback<bool>,
    },
    Poll {
        cb: Callback<PollEvent>,
        event: PollEvent,
    },
    Timeout {
        cb: Callback<()>,
        _ts: Box<types::Timespec>,
    },
    Open {
        cb: Callback<RawHandle>,
        _path: std::ffi::CString,
    },
}

/// One `io_uring` instance per worker thread (§4.1 "single reactor runs on
/// a single OS thread").
pub struct UringReactor {
    ring: IoUring,
    pending: Slab<PendingOp>,
    next_tick_queue: Vec<Callback<()>>,
}

impl UringReactor {
    pub fn new(ring_size: u32) -> std::io::Result<Self> {
        Ok(UringReactor {
            ring: IoUring::new(ring_size)?,
            pending: Slab::new(),
            next_tick_queue: Vec::new(),
        })
    }

    fn push(&mut self, entry: io_uring::squeue::Entry, op: PendingOp) {
        let token = self.pending.insert(op);
        let entry = entry.user_data(token as u64);
        unsafe {
            if self.ring.submission().push(&entry).is_err() {
                warn!("io_uring submission queue full, dropping operation");
                self.pending.remove(token);
            }
        }
    }

    fn dispatch(&mut self, token: usize, result: i32) {
        let op = match self.pending.try_remove(token) {
            Some(op) => op,
            None => {
                warn!(token, "completion for unknown token");
                return;
            }
        };

        match op {
            PendingOp::Accept { cb, storage, .. } => {
                if result < 0 {
                    cb(Err(errno_result(result)));
                    return;
                }
                let fd = result;
                let addr = unsafe { socket2::SockAddr::new(*storage, (*storage).ss_family as _) }
                    .as_socket();
                match addr {
                    Some(addr) => cb(Ok((fd, addr))),
                    None => cb(Ok((fd, SocketAddr::from(([0, 0, 0, 0], 0))))),
                }
            }
            PendingOp::Connect { cb, fd, .. } => {
                if result < 0 {
                    cb(Err(errno_result(result)));
                } else {
                    cb(Ok(fd));
                }
            }
            PendingOp::Recv { cb, buf } => complete_io(cb, result, buf),
            PendingOp::Send { cb, buf } => complete_io(cb, result, buf),
            PendingOp::ReadAt { cb, buf } => complete_io(cb, result, buf),
            PendingOp::WriteAt { cb, buf } => complete_io(cb, result, buf),
            PendingOp::Close { cb } => cb(Ok(result >= 0)),
            PendingOp::Poll { cb, event } => {
                if result < 0 {
                    cb(Err(errno_result(result)));
                } else {
                    cb(Ok(event));
                }
            }
            PendingOp::Timeout { cb, .. } => {
                // ETIME is the expected "fired" result; cancellation
                // (ECANCELED) also resolves the callback so call sites
                // never hang on a removed timeout.
                cb(Ok(()));
            }
            PendingOp::Open { cb, .. } => {
                if result < 0 {
                    cb(Err(errno_result(result)));
                } else {
                    cb(Ok(result));
                }
            }
        }
    }
}

fn errno_result(result: i32) -> OsError {
    let errno = -result;
    match NetworkError::from_errno(errno) {
        NetworkError::Unknown => OsError::Errno(errno),
        network => OsError::Network(network),
    }
}

fn complete_io(cb: Callback<(usize, Vec<u8>)>, result: i32, buf: Vec<u8>) {
    if result < 0 {
        cb(Err(errno_result(result)));
    } else {
        cb(Ok((result as usize, buf)));
    }
}

impl Reactor for UringReactor {
    fn accept(&mut self, listener: RawHandle, cb: Callback<(RawHandle, SocketAddr)>) {
        let storage = Box::new(unsafe { std::mem::zeroed::<libc::sockaddr_storage>() });
        let len = Box::new(std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t);
        let storage_ptr = storage.as_ref() as *const _ as *mut libc::sockaddr;
        let len_ptr = len.as_ref() as *const _ as *mut libc::socklen_t;
        let entry = opcode::Accept::new(types::Fd(listener), storage_ptr, len_ptr).build();
        self.push(entry, PendingOp::Accept { cb, storage, len });
    }

    fn connect(&mut self, endpoint: SocketAddr, cb: Callback<RawHandle>) {
        let domain = match endpoint {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        };
        let socket = match socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))
        {
            Ok(s) => s,
            Err(e) => {
                cb(Err(OsError::Errno(e.raw_os_error().unwrap_or(-1))));
                return;
            }
        };
        if let Err(e) = socket.set_nonblocking(true) {
            cb(Err(OsError::Errno(e.raw_os_error().unwrap_or(-1))));
            return;
        }
        let fd = socket.as_raw_fd();
        std::mem::forget(socket); // ownership transfers to the caller via the returned fd
        let addr = Box::new(socket2::SockAddr::from(endpoint));
        let entry = opcode::Connect::new(types::Fd(fd), addr.as_ptr(), addr.len()).build();
        self.push(entry, PendingOp::Connect { cb, fd, addr });
    }

    fn send(&mut self, sock: RawHandle, buf: Vec<u8>, cb: Callback<(usize, Vec<u8>)>) {
        let entry =
            opcode::Send::new(types::Fd(sock), buf.as_ptr(), buf.len() as u32).build();
        self.push(entry, PendingOp::Send { cb, buf });
    }

    fn recv(&mut self, sock: RawHandle, mut buf: Vec<u8>, cb: Callback<(usize, Vec<u8>)>) {
        let entry =
            opcode::Recv::new(types::Fd(sock), buf.as_mut_ptr(), buf.len() as u32).build();
        self.push(entry, PendingOp::Recv { cb, buf });
    }

    fn read_at(&mut self, fd: RawHandle, offset: i64, mut buf: Vec<u8>, cb: Callback<(usize, Vec<u8>)>) {
        let off = if offset < 0 { u64::MAX } else { offset as u64 };
        let entry = opcode::Read::new(types::Fd(fd), buf.as_mut_ptr(), buf.len() as u32)
            .offset(off)
            .build();
        self.push(entry, PendingOp::ReadAt { cb, buf });
    }

    fn write_at(&mut self, fd: RawHandle, offset: i64, buf: Vec<u8>, cb: Callback<(usize, Vec<u8>)>) {
        let off = if offset < 0 { u64::MAX } else { offset as u64 };
        let entry = opcode::Write::new(types::Fd(fd), buf.as_ptr(), buf.len() as u32)
            .offset(off)
            .build();
        self.push(entry, PendingOp::WriteAt { cb, buf });
    }

    fn seek(&mut self, fd: RawHandle, offset: i64, whence: Whence, cb: Callback<u64>) {
        // io_uring has no seek opcode; lseek never blocks on a regular
        // file, so this runs synchronously rather than round-tripping
        // through the ring.
        let whence_flag = match whence {
            Whence::Start => libc::SEEK_SET,
            Whence::Current => libc::SEEK_CUR,
            Whence::End => libc::SEEK_END,
        };
        let result = unsafe { libc::lseek(fd, offset, whence_flag) };
        if result < 0 {
            cb(Err(OsError::Errno(unsafe { *libc::__errno_location() })));
        } else {
            cb(Ok(result as u64));
        }
    }

    fn open(&mut self, path: PathBuf, flags: i32, mode: u32, cb: Callback<RawHandle>) {
        let path = match std::ffi::CString::new(path.as_os_str().as_encoded_bytes()) {
            Ok(p) => p,
            Err(_) => {
                cb(Err(OsError::Errno(libc::EINVAL)));
                return;
            }
        };
        let entry = opcode::OpenAt::new(types::Fd(libc::AT_FDCWD), path.as_ptr())
            .flags(flags)
            .mode(mode)
            .build();
        self.push(entry, PendingOp::Open { cb, _path: path });
    }

    fn close(&mut self, closable: RawHandle, cb: Callback<bool>) {
        let entry = opcode::Close::new(types::Fd(closable)).build();
        self.push(entry, PendingOp::Close { cb });
    }

    fn poll(&mut self, fd: RawHandle, event: PollEvent, multi: bool, cb: Callback<PollEvent>) {
        let flags = match event {
            PollEvent::Read => libc::POLLIN as u32,
            PollEvent::Write => libc::POLLOUT as u32,
        };
        let entry = opcode::PollAdd::new(types::Fd(fd), flags)
            .multi(multi)
            .build();
        self.push(entry, PendingOp::Poll { cb, event });
    }

    fn timeout(&mut self, dur: Duration, cb: Callback<()>) {
        let ts = Box::new(types::Timespec::new().sec(dur.as_secs()).nsec(dur.subsec_nanos()));
        let entry = opcode::Timeout::new(ts.as_ref() as *const _).build();
        self.push(entry, PendingOp::Timeout { cb, _ts: ts });
    }

    fn timeout_remove(&mut self, handle: Token) -> bool {
        if !self.pending.contains(handle) {
            return false;
        }
        let entry = opcode::AsyncCancel::new(handle as u64).build().user_data(u64::MAX);
        unsafe {
            let _ = self.ring.submission().push(&entry);
        }
        true
    }

    fn next_tick(&mut self, cb: Callback<()>) {
        self.next_tick_queue.push(cb);
    }

    fn tick(&mut self, block: bool) -> usize {
        let due = std::mem::take(&mut self.next_tick_queue);
        let mut processed = due.len();
        for cb in due {
            cb(Ok(()));
        }

        let wait_nr = if block && !self.pending.is_empty() { 1 } else { 0 };
        if let Err(e) = self.ring.submit_and_wait(wait_nr) {
            warn!(error = %e, "io_uring submit_and_wait failed");
            return processed;
        }

        let completions: Vec<(u64, i32)> = self
            .ring
            .completion()
            .map(|cqe| (cqe.user_data(), cqe.result()))
            .collect();

        for (token, result) in completions {
            if token == u64::MAX {
                // bookkeeping completion for an AsyncCancel submission itself
                continue;
            }
            trace!(token, result, "io_uring completion");
            processed += 1;
            self.dispatch(token as usize, result);
        }

        processed
    }

    fn num_waiting(&self) -> usize {
        self.pending.len() + self.next_tick_queue.len()
    }
}

/// Bind with `SO_REUSEPORT` so every worker thread owns its own listener
/// and accepts independently (§5, SPEC_FULL §11). Kept near-verbatim from
/// the teacher's `create_listener_with_reuseport`.
pub fn create_listener_with_reuseport(addr: SocketAddr) -> std::io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_port(true)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    debug!(%addr, "bound SO_REUSEPORT listener");
    Ok(socket.into())
}
