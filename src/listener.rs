//! The `listen_tcp` mode's accept loop.
//!
//! Binds a wildcard IPv6 socket (so an IPv4-mapped peer and a native IPv6
//! peer both arrive as 16-byte addresses) and accepts one connection at a
//! time. `accept` is a thin wrapper over the raw syscall through `nix`
//! rather than `std::net::TcpListener`, because `std`'s accept loop retries
//! on `EINTR` internally — this jail needs `EINTR` to surface so the
//! supervisor can go reap exited children in between connections.

use std::net::Ipv6Addr;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use nix::sys::socket::{
    accept, bind, getpeername, listen, setsockopt, socket, sockopt, AddressFamily, Backlog,
    SockFlag, SockType, SockaddrIn6,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to create listening socket: {0}")]
    Create(#[source] nix::Error),
    #[error("failed to bind to port {port}: {source}")]
    Bind { port: u16, source: nix::Error },
    #[error("failed to listen: {0}")]
    Listen(#[source] nix::Error),
}

pub struct Listener {
    fd: OwnedFd,
}

/// A distinguished return from `accept_one`: the accept syscall was
/// interrupted by a signal (typically `SIGCHLD`) and the supervisor should
/// service its reaper loop before accepting again.
pub enum Accepted {
    Connection {
        fd: OwnedFd,
        remote: [u8; 16],
        remote_text: String,
    },
    Interrupted,
}

impl Listener {
    pub fn bind(port: u16) -> Result<Self, ListenerError> {
        let fd = socket(
            AddressFamily::Inet6,
            SockType::Stream,
            SockFlag::empty(),
            None,
        )
        .map_err(ListenerError::Create)?;

        setsockopt(&fd, sockopt::ReuseAddr, &true).map_err(ListenerError::Create)?;

        let addr = SockaddrIn6::from(std::net::SocketAddrV6::new(
            Ipv6Addr::UNSPECIFIED,
            port,
            0,
            0,
        ));
        bind(fd.as_raw_fd(), &addr).map_err(|source| ListenerError::Bind { port, source })?;

        listen(&fd, Backlog::MAXCONN).map_err(ListenerError::Listen)?;

        Ok(Self { fd })
    }

    /// Blocks until a connection arrives, the call is interrupted by a
    /// signal, or an unrecoverable error occurs.
    pub fn accept_one(&self) -> nix::Result<Accepted> {
        match accept(self.fd.as_raw_fd()) {
            Ok(raw) => {
                // SAFETY: `accept` just returned ownership of this fd.
                let conn: OwnedFd = unsafe { std::os::fd::FromRawFd::from_raw_fd(raw) };
                let (remote, remote_text) = peer_addr(conn.as_raw_fd())?;
                Ok(Accepted::Connection {
                    fd: conn,
                    remote,
                    remote_text,
                })
            }
            Err(nix::Error::EINTR) => Ok(Accepted::Interrupted),
            Err(e) => Err(e),
        }
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

fn peer_addr(fd: RawFd) -> nix::Result<([u8; 16], String)> {
    let addr: SockaddrIn6 = getpeername(fd)?;
    let octets = addr.ip().octets();
    let text = format!("{}:{}", Ipv6Addr::from(octets), addr.port());
    Ok((octets, text))
}

/// Best-effort `TCP_CORK`; failure is logged by the caller and never fatal,
/// matching the teacher's general tolerance for non-essential setsockopt
/// calls.
pub fn cork(fd: RawFd, on: bool) -> nix::Result<()> {
    let val: nix::libc::c_int = if on { 1 } else { 0 };
    let ret = unsafe {
        nix::libc::setsockopt(
            fd,
            nix::libc::IPPROTO_TCP,
            nix::libc::TCP_CORK,
            &val as *const _ as *const nix::libc::c_void,
            std::mem::size_of::<nix::libc::c_int>() as nix::libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(nix::Error::last());
    }
    Ok(())
}
