// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::ptr::{self, NonNull};
use std::time::Duration;
use std::{io, mem};

use super::addr::LinkAddr;
use super::sndrcv::RecvFlags;
use super::{
    tpacket_req3, tpacket_stats, PacketStatistics, PACKET_HDRLEN, PACKET_RX_RING,
    PACKET_STATISTICS, PACKET_VERSION,
};
use crate::Interface;

/// An `AF_PACKET`/`SOCK_RAW` socket that receives link-layer packets.
#[derive(Debug)]
pub struct PacketSocket {
    fd: RawFd,
}

impl PacketSocket {
    /// Create a new packet socket.
    ///
    /// By default, packet sockets do not receive packets on any protocol or interface; to begin
    /// receiving packets, call [`PacketSocket::bind()`].
    ///
    /// # Permissions
    ///
    /// A program must have the `CAP_NET_RAW` capability in order for this call to succeed;
    /// otherwise, `EPERM` will be returned.
    pub fn new() -> io::Result<PacketSocket> {
        // Set the socket to receive no packets by default (protocol: 0)
        match unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW | libc::SOCK_CLOEXEC, 0) } {
            ..=-1 => Err(io::Error::last_os_error()),
            fd => Ok(PacketSocket { fd }),
        }
    }

    /// Bind the socket to an interface and begin receiving packets of the given link-layer
    /// `protocol` (in host byte order; `libc::ETH_P_ALL` receives everything).
    pub fn bind(&self, iface: Interface, protocol: u16) -> io::Result<()> {
        let sockaddr = libc::sockaddr_ll {
            sll_family: libc::AF_PACKET as u16,
            sll_protocol: protocol.to_be(),
            sll_ifindex: iface.index()? as i32,
            sll_hatype: 0,
            sll_pkttype: 0,
            sll_halen: 0,
            sll_addr: [0u8; 8],
        };

        match unsafe {
            libc::bind(
                self.fd,
                ptr::addr_of!(sockaddr) as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as u32,
            )
        } {
            0 => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }

    /// Indicates whether nonblocking I/O is enabled for the socket.
    pub fn nonblocking(&self) -> io::Result<bool> {
        match unsafe { libc::fcntl(self.fd, libc::F_GETFL, 0) } {
            ..=-1 => Err(io::Error::last_os_error()),
            fl => Ok((fl & libc::O_NONBLOCK) != 0),
        }
    }

    /// Configures the socket's behavior when blocking would occur for calls to
    /// [`recv_from()`](PacketSocket::recv_from()).
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        let mut fl = match unsafe { libc::fcntl(self.fd, libc::F_GETFL, 0) } {
            ..=-1 => return Err(io::Error::last_os_error()),
            f => f,
        };

        if nonblocking {
            fl |= libc::O_NONBLOCK;
        } else {
            fl &= !libc::O_NONBLOCK;
        }

        match unsafe { libc::fcntl(self.fd, libc::F_SETFL, fl) } {
            0 => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }

    /// Blocks until the socket becomes readable or `timeout` elapses (`None` waits forever).
    ///
    /// For a mapped ring, readability means at least one block has been handed to userspace.
    /// Returns `false` on timeout. An interrupted wait is reported as a timeout.
    pub fn poll_readable(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN | libc::POLLERR,
            revents: 0,
        };

        let timeout_ms = match timeout {
            None => -1,
            Some(t) => libc::c_int::try_from(t.as_millis()).unwrap_or(libc::c_int::MAX),
        };

        match unsafe { libc::poll(ptr::addr_of_mut!(pfd), 1, timeout_ms) } {
            ..=-1 => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
            0 => Ok(false),
            _ => Ok((pfd.revents & libc::POLLIN) != 0),
        }
    }

    /// Retrieves (and resets) the kernel's packet counters for this socket.
    #[inline]
    pub fn packet_stats(&self) -> io::Result<PacketStatistics> {
        let mut stats = tpacket_stats::default();
        let mut stats_len = mem::size_of::<tpacket_stats>() as u32;

        if unsafe {
            libc::getsockopt(
                self.fd,
                libc::SOL_PACKET,
                PACKET_STATISTICS,
                ptr::addr_of_mut!(stats) as *mut libc::c_void,
                ptr::addr_of_mut!(stats_len),
            ) != 0
        } {
            return Err(io::Error::last_os_error());
        }
        debug_assert!(stats_len as usize >= mem::size_of::<tpacket_stats>());

        Ok(PacketStatistics {
            packets_seen: stats.tp_packets as usize,
            packets_dropped: stats.tp_drops as usize,
        })
    }

    /// Receive a single packet into `buf`, returning the packet's length and link-layer address.
    ///
    /// When `flags` contains [`RecvFlags::TRUNC`], the returned length is the real length of the
    /// packet even if it was longer than `buf`.
    pub fn recv_from(&self, buf: &mut [u8], flags: RecvFlags) -> io::Result<(usize, LinkAddr)> {
        let mut sockaddr = libc::sockaddr_ll {
            sll_family: 0,
            sll_protocol: 0,
            sll_ifindex: 0,
            sll_hatype: 0,
            sll_pkttype: 0,
            sll_halen: 0,
            sll_addr: [0u8; 8],
        };
        let mut sockaddr_len = mem::size_of::<libc::sockaddr_ll>() as u32;

        match unsafe {
            libc::recvfrom(
                self.fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                flags.bits(),
                ptr::addr_of_mut!(sockaddr) as *mut libc::sockaddr,
                ptr::addr_of_mut!(sockaddr_len),
            )
        } {
            ..=-1 => Err(io::Error::last_os_error()),
            len => Ok((len as usize, LinkAddr::from(&sockaddr))),
        }
    }

    /// Sets the `PACKET_VERSION` socket option.
    pub(crate) fn set_version(&self, version: libc::c_int) -> io::Result<()> {
        if unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_PACKET,
                PACKET_VERSION,
                ptr::addr_of!(version) as *const libc::c_void,
                mem::size_of::<libc::c_int>() as u32,
            ) != 0
        } {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// Queries `PACKET_HDRLEN`: the length of the frame header the kernel writes for `version`.
    pub(crate) fn header_len(&self, version: libc::c_int) -> io::Result<usize> {
        let mut hdrlen: libc::c_int = version;
        let mut hdrlen_len = mem::size_of::<libc::c_int>() as u32;

        if unsafe {
            libc::getsockopt(
                self.fd,
                libc::SOL_PACKET,
                PACKET_HDRLEN,
                ptr::addr_of_mut!(hdrlen) as *mut libc::c_void,
                ptr::addr_of_mut!(hdrlen_len),
            ) != 0
        } {
            return Err(io::Error::last_os_error());
        }

        usize::try_from(hdrlen).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, "kernel reported a negative header length")
        })
    }

    /// Sets the `PACKET_RX_RING` socket option.
    pub(crate) fn set_rx_ring(&self, req: &tpacket_req3) -> io::Result<()> {
        if unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_PACKET,
                PACKET_RX_RING,
                req as *const tpacket_req3 as *const libc::c_void,
                mem::size_of::<tpacket_req3>() as u32,
            ) != 0
        } {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// Memory-map the socket's RX ring buffer.
    pub(crate) fn mmap_rx_ring(&self, map_length: usize) -> io::Result<NonNull<u8>> {
        let mapped = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_length,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd,
                0,
            )
        };

        if mapped == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        NonNull::new(mapped as *mut u8)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned a null mapping"))
    }
}

impl Drop for PacketSocket {
    #[inline]
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

impl AsRawFd for PacketSocket {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl IntoRawFd for PacketSocket {
    #[inline]
    fn into_raw_fd(self) -> RawFd {
        let fd = self.fd;
        mem::forget(self);
        fd
    }
}

impl FromRawFd for PacketSocket {
    /// Takes ownership of an already-open `AF_PACKET` socket descriptor.
    #[inline]
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        PacketSocket { fd }
    }
}
