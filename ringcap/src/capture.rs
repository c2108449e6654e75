// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Interchangeable capture strategies.
//!
//! Every backend is driven through the same three-step cycle: ask whether a packet is ready
//! ([`has_packet()`](Capture::has_packet)), borrow it ([`get_packet()`](Capture::get_packet)), and
//! hand it back ([`put_packet()`](Capture::put_packet)). The borrowed [`Packet`] ties up the
//! capture until it is dropped, so a packet can never be observed after it has been returned.

use std::os::fd::AsRawFd;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Error, SetupError};
use crate::linux::addr::LinkAddr;
use crate::linux::geometry::RingGeometry;
use crate::linux::mapped::MmapCapture;
use crate::linux::recv::RecvCapture;
use crate::linux::socket::PacketSocket;
use crate::linux::FrameStatus;
use crate::Interface;

/// Selects which capture backend [`open()`] sets up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CaptureMethod {
    /// Try the memory-mapped ring first and fall back to [`Recv`](CaptureMethod::Recv) if the
    /// kernel refuses it.
    #[default]
    Auto,
    /// Zero-copy `PACKET_RX_RING` (TPACKET_V3).
    Mapped,
    /// One `recvfrom()` per packet into a private buffer.
    Recv,
}

/// Settings used to set up a capture backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    pub method: CaptureMethod,
    /// Layout of the memory-mapped ring.
    pub geometry: RingGeometry,
    /// The number of bytes of each packet the copying backend retains.
    pub snap_len: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            method: CaptureMethod::Auto,
            geometry: RingGeometry::default(),
            snap_len: RingGeometry::DEFAULT_MAX_PACKET_SIZE as usize,
        }
    }
}

/// Per-session diagnostic counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub(crate) packets: u64,
    pub(crate) blocks_released: u64,
    pub(crate) malformed_blocks: u64,
    pub(crate) count_mismatches: u64,
}

impl CaptureStats {
    /// Packets handed back through `put_packet()`.
    #[inline]
    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Ring blocks returned to the kernel (always zero for copying backends).
    #[inline]
    pub fn blocks_released(&self) -> u64 {
        self.blocks_released
    }

    /// Ring blocks whose frame chain left the block and were dropped early.
    #[inline]
    pub fn malformed_blocks(&self) -> u64 {
        self.malformed_blocks
    }

    /// Ring blocks whose declared packet count differed from the frames actually chained.
    #[inline]
    pub fn count_mismatches(&self) -> u64 {
        self.count_mismatches
    }
}

/// Per-packet metadata reported alongside the packet bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct FrameInfo {
    pub timestamp: Option<Duration>,
    /// Length of the packet on the wire, which exceeds the captured bytes when truncated.
    pub wire_len: usize,
    pub status: FrameStatus,
    pub rx_hash: u32,
    pub vlan_tci: u32,
    pub vlan_tpid: u16,
}

/// A single captured link-layer packet, borrowed from its capture backend.
#[derive(Clone, Copy, Debug)]
pub struct Packet<'a> {
    data: &'a [u8],
    addr: LinkAddr,
    info: FrameInfo,
}

impl<'a> Packet<'a> {
    #[inline]
    pub(crate) fn new(data: &'a [u8], addr: LinkAddr, info: FrameInfo) -> Self {
        Packet { data, addr, info }
    }

    /// The captured bytes of the packet, starting at the link-layer header.
    ///
    /// For the memory-mapped backend this is a view straight into the ring; nothing is copied.
    /// Truncated packets hold only the first [`snaplen()`](Self::snaplen) bytes.
    #[inline]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// The packet length declared by the kernel.
    ///
    /// Equal to `data().len()` unless the packet was truncated.
    #[inline]
    pub fn len(&self) -> usize {
        self.info.wire_len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.info.wire_len == 0
    }

    /// The link-layer address information the packet was received with.
    #[inline]
    pub fn link_addr(&self) -> &LinkAddr {
        &self.addr
    }

    /// The link-layer protocol (EtherType) of the packet, in host byte order.
    #[inline]
    pub fn protocol(&self) -> u16 {
        self.addr.protocol()
    }

    /// The time the packet was received, if the backend records one.
    #[inline]
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.info.timestamp.map(|since_epoch| UNIX_EPOCH + since_epoch)
    }

    /// The number of bytes the kernel actually captured for this packet.
    #[inline]
    pub fn snaplen(&self) -> usize {
        self.data.len()
    }

    /// Indicates whether the packet exceeded the capture size and had to be truncated.
    #[inline]
    pub fn is_truncated(&self) -> bool {
        self.data.len() < self.info.wire_len
    }

    /// The kernel's status flags for the frame holding this packet.
    #[inline]
    pub fn status(&self) -> FrameStatus {
        self.info.status
    }

    /// Indicates there have been dropped packets since the last call to `packet_stats()` was
    /// made on the socket.
    #[inline]
    pub fn dropped_packets(&self) -> bool {
        self.info.status.contains(FrameStatus::LOSING)
    }

    /// The VLAN TCI value associated with the packet, if such a value exists.
    #[inline]
    pub fn vlan_tci(&self) -> Option<u32> {
        self.info
            .status
            .contains(FrameStatus::VLAN_VALID)
            .then_some(self.info.vlan_tci)
    }

    /// The VLAN TPID value associated with the packet, if such a value exists.
    #[inline]
    pub fn vlan_tpid(&self) -> Option<u16> {
        self.info
            .status
            .contains(FrameStatus::VLAN_TPID_VALID)
            .then_some(self.info.vlan_tpid)
    }

    /// The RX hash the kernel computed for the packet (zero unless requested).
    #[inline]
    pub fn rx_hash(&self) -> u32 {
        self.info.rx_hash
    }
}

/// A packet capture strategy bound to a single packet socket.
///
/// A capture is owned by exactly one consumer and driven sequentially; none of its methods block.
/// To wait for traffic, poll the descriptor returned by [`AsRawFd::as_raw_fd`] for readability
/// (see [`PacketSocket::poll_readable()`]).
pub trait Capture: AsRawFd + Send {
    /// Sets the backend up on an open, bound socket.
    ///
    /// On failure the socket is returned inside the [`SetupError`].
    fn setup(socket: PacketSocket, config: &CaptureConfig) -> Result<Self, SetupError>
    where
        Self: Sized;

    /// Indicates whether a packet can be retrieved without waiting.
    fn has_packet(&mut self) -> bool;

    /// Retrieves the current packet, or `None` if no packet is ready.
    ///
    /// Calling this repeatedly without an intervening [`put_packet()`](Capture::put_packet)
    /// returns the same packet.
    fn get_packet(&mut self) -> Option<Packet<'_>>;

    /// Acknowledges the current packet so the next call to `get_packet()` moves on.
    fn put_packet(&mut self);

    /// Releases the backend's capture resources. Further calls report no packets.
    ///
    /// Packets not yet retrieved are discarded. Calling `close()` more than once has no effect.
    fn close(&mut self);

    /// The backend in use.
    fn method(&self) -> CaptureMethod;

    fn stats(&self) -> CaptureStats;

    /// The socket packets are captured from.
    fn socket(&self) -> &PacketSocket;
}

/// Sets up a capture backend on `socket` as selected by `config.method`.
///
/// With [`CaptureMethod::Auto`], a memory-mapped ring is attempted first; if the kernel rejects
/// any step of its setup, the copying backend is used instead.
pub fn open(socket: PacketSocket, config: &CaptureConfig) -> Result<Box<dyn Capture>, SetupError> {
    match config.method {
        CaptureMethod::Mapped => Ok(Box::new(MmapCapture::setup(socket, config)?)),
        CaptureMethod::Recv => Ok(Box::new(RecvCapture::setup(socket, config)?)),
        CaptureMethod::Auto => match MmapCapture::setup(socket, config) {
            Ok(capture) => Ok(Box::new(capture)),
            Err(e) => {
                log::info!(
                    "{} ({}); falling back to recvfrom() capture",
                    e,
                    e.io_error()
                );
                Ok(Box::new(RecvCapture::setup(e.into_socket(), config)?))
            }
        },
    }
}

/// Opens a packet socket on `iface` receiving `protocol` (host byte order; `libc::ETH_P_ALL`
/// for all traffic) and sets up a capture backend on it.
///
/// # Errors
///
/// With [`CaptureMethod::Mapped`], an invalid `config.geometry` is reported as
/// [`Error::Geometry`] before any socket is opened.
pub fn open_interface(
    iface: Interface,
    protocol: u16,
    config: &CaptureConfig,
) -> Result<Box<dyn Capture>, Error> {
    if config.method == CaptureMethod::Mapped {
        config.geometry.validate()?;
    }

    let socket = PacketSocket::new()?;
    socket.bind(iface, protocol)?;
    log::debug!("bound packet socket to {:?}", iface.name());

    Ok(open(socket, config)?)
}

/// Hands up to `budget` ready packets to `f`, acknowledging each one after `f` returns.
///
/// Stops early once no packet is ready. Returns the number of packets handled.
pub fn drain<C, F>(capture: &mut C, budget: usize, mut f: F) -> usize
where
    C: Capture + ?Sized,
    F: FnMut(&Packet<'_>),
{
    let mut handled = 0;

    while handled < budget {
        match capture.get_packet() {
            Some(packet) => f(&packet),
            None => break,
        }
        capture.put_packet();
        handled += 1;
    }

    handled
}
