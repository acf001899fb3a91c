/*! The kernel socket: lifecycle, datagram exchange, group membership.

A netlink socket is a datagram socket bound to a kernel bus.  The kernel
assigns the port id on bind; every reply the kernel sends back to us is
stamped with that port, which is how [`Sock::recv`] tells our traffic
apart from a stray datagram.

Each socket also owns the sequence counter used to stamp requests.  It is
seeded from the wall clock on open, so a process that crashes and
restarts within the same second does not hand the kernel sequence numbers
it has just seen.
*/

use crate::error::{Error, Result};
use crate::msg::MsgBuf;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::*;

// rtnetlink multicast groups, from linux/rtnetlink.h.
pub const RTNLGRP_NONE: u32 = 0;
pub const RTNLGRP_LINK: u32 = 1;
pub const RTNLGRP_NOTIFY: u32 = 2;
pub const RTNLGRP_NEIGH: u32 = 3;
pub const RTNLGRP_TC: u32 = 4;
pub const RTNLGRP_IPV4_IFADDR: u32 = 5;
pub const RTNLGRP_IPV4_ROUTE: u32 = 7;
pub const RTNLGRP_IPV6_IFADDR: u32 = 9;
pub const RTNLGRP_IPV6_ROUTE: u32 = 11;
/// The highest group id the kernel currently defines (RTNLGRP_STATS).
pub const RTNLGRP_MAX: u32 = 36;

/// An open netlink socket.
///
/// The socket, its port id and its sequence counter are single-owner:
/// nothing here is shared or locked.
pub struct Sock {
    fd: RawFd,
    port_id: u32,
    seqno: u32,
}

impl Sock {
    /// Open and bind a socket on the given netlink bus.
    ///
    /// The kernel picks the port id.  Extended acknowledgement reporting
    /// is disabled, so error messages carry only the classic error
    /// header the framer understands.
    pub fn open(bus: i32, flags: i32) -> Result<Sock> {
        let fd = unsafe { libc::socket(libc::AF_NETLINK, libc::SOCK_RAW | flags, bus) };
        if fd < 0 {
            return Err(last_os_error());
        }
        let mut sock = Sock {
            fd,
            port_id: 0,
            seqno: 0,
        };

        let cap: libc::c_int = 1;
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_NETLINK,
                libc::NETLINK_CAP_ACK,
                &cap as *const libc::c_int as *const libc::c_void,
                mem::size_of_val(&cap) as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(last_os_error());
        }

        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        let ret = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(last_os_error());
        }

        // Learn the port id the kernel picked for us.
        let mut addr_len = mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockname(
                fd,
                &mut addr as *mut libc::sockaddr_nl as *mut libc::sockaddr,
                &mut addr_len,
            )
        };
        if ret < 0 {
            return Err(last_os_error());
        }
        sock.port_id = addr.nl_pid;

        sock.seqno = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as u32)
            .unwrap_or(0);

        debug!("opened netlink socket: bus:{} port:{}", bus, sock.port_id);
        Ok(sock)
    }

    /// Open on the routing bus with close-on-exec, the only bus the link
    /// codec speaks.
    pub fn open_route() -> Result<Sock> {
        Sock::open(libc::NETLINK_ROUTE, libc::SOCK_CLOEXEC)
    }

    /// The raw file descriptor, for callers that poll over the socket.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// The port id the kernel bound this socket to.
    pub fn port_id(&self) -> u32 {
        self.port_id
    }

    /// Allocate the sequence number for the next request.
    pub fn next_seqno(&mut self) -> u32 {
        self.seqno = self.seqno.wrapping_add(1);
        self.seqno
    }

    /// Send one composed message.
    ///
    /// A netlink datagram goes out whole; a short write would be a
    /// protocol violation, not a condition to handle.  Transient
    /// failures (EAGAIN, ECONNRESET, EINTR, ENOBUFS, ENOMEM) come back
    /// as errors; anything else the kernel could report here is a
    /// caller bug.
    pub fn send(&self, buf: &MsgBuf) -> Result<()> {
        debug_assert!(!buf.is_empty());

        let bytes = buf.as_bytes();
        let ret = unsafe {
            libc::sendto(
                self.fd,
                bytes.as_ptr() as *const libc::c_void,
                bytes.len(),
                0,
                std::ptr::null(),
                0,
            )
        };
        if ret < 0 {
            return Err(last_os_error());
        }
        debug_assert_eq!(ret as usize, bytes.len());
        trace!("sent {} bytes", bytes.len());
        Ok(())
    }

    /// Receive one datagram into `buf` and return its length.
    ///
    /// The buffer always has room for the largest datagram the kernel
    /// may send.  A datagram with an inconsistent leading header is
    /// malformed; one stamped with a foreign port id was never meant
    /// for us.
    pub fn recv(&self, buf: &mut MsgBuf) -> Result<usize> {
        let space = buf.recv_space();
        let ret = unsafe {
            libc::recv(
                self.fd,
                space.as_mut_ptr() as *mut libc::c_void,
                space.len(),
                0,
            )
        };
        if ret < 0 {
            return Err(last_os_error());
        }
        let len = ret as usize;
        debug_assert!(len > 0);
        buf.set_len(len);

        let msg = match buf.msg() {
            Some(msg) => msg,
            None => return Err(Error::Malformed),
        };
        if msg.port_id() != self.port_id {
            return Err(Error::NoProcess);
        }
        trace!("received {} bytes: {}", len, msg);
        Ok(len)
    }

    /// Subscribe to an rtnetlink multicast group.
    pub fn join_group(&self, group: u32) -> Result<()> {
        self.group_membership(libc::NETLINK_ADD_MEMBERSHIP, group)
    }

    /// Unsubscribe from an rtnetlink multicast group.
    pub fn leave_group(&self, group: u32) -> Result<()> {
        self.group_membership(libc::NETLINK_DROP_MEMBERSHIP, group)
    }

    fn group_membership(&self, op: libc::c_int, group: u32) -> Result<()> {
        debug_assert!(group > RTNLGRP_NONE);
        debug_assert!(group <= RTNLGRP_MAX);

        let group = group as libc::c_int;
        let ret = unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_NETLINK,
                op,
                &group as *const libc::c_int as *const libc::c_void,
                mem::size_of_val(&group) as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(last_os_error());
        }
        Ok(())
    }

    /// A socket that exists only to stamp headers in tests.
    #[cfg(test)]
    pub(crate) fn stub(port_id: u32, seqno: u32) -> Sock {
        Sock {
            fd: -1,
            port_id,
            seqno,
        }
    }
}

impl Drop for Sock {
    fn drop(&mut self) {
        // close(2) is retried on EINTR via the raw descriptor.
        while unsafe { libc::close(self.fd) } < 0 {
            if io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
                break;
            }
        }
    }
}

/// The calling thread's errno, folded into the taxonomy.  EINTR and
/// ENOMEM land on their dedicated variants; the rest stay [`Error::Os`].
fn last_os_error() -> Error {
    let errno = io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(libc::EIO);
    match errno {
        libc::EINTR => Error::Interrupted,
        libc::ENOMEM => Error::NoMemory,
        _ => Error::Os(-errno),
    }
}
