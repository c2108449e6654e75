// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! (Linux) `AF_PACKET`/`SOCK_RAW` capture backends.
//!
//! The zero-copy `PACKET_RX_RING` engine lives in [`mapped`], the copying fallback in [`recv`].
//! Both operate on a [`PacketSocket`](socket::PacketSocket) that the caller has opened and bound.
//!
//! To include all common linux-specific structures, simply add `use ringcap::linux::prelude::*`
//! to your source.

use std::mem;

use bitflags::bitflags;

pub mod addr;
pub mod geometry;
pub mod mapped;
#[doc(hidden)]
pub mod prelude;
pub mod recv;
pub mod region;
pub mod socket;
mod sndrcv;

pub use sndrcv::RecvFlags;

// Kept locally rather than relying on the `libc` release in use exporting them:

pub(crate) const PACKET_RX_RING: libc::c_int = 5;
pub(crate) const PACKET_STATISTICS: libc::c_int = 6;
pub(crate) const PACKET_VERSION: libc::c_int = 10;
pub(crate) const PACKET_HDRLEN: libc::c_int = 11;

pub(crate) const TPACKET_V3: libc::c_int = 2;

pub(crate) const PACKET_HOST: libc::c_uchar = 0;
pub(crate) const PACKET_BROADCAST: libc::c_uchar = 1;
pub(crate) const PACKET_MULTICAST: libc::c_uchar = 2;
pub(crate) const PACKET_OTHERHOST: libc::c_uchar = 3;
pub(crate) const PACKET_OUTGOING: libc::c_uchar = 4;
pub(crate) const PACKET_LOOPBACK: libc::c_uchar = 5;
pub(crate) const PACKET_USER: libc::c_uchar = 6;
pub(crate) const PACKET_KERNEL: libc::c_uchar = 7;

pub(crate) const TP_STATUS_KERNEL: u32 = 0;
pub(crate) const TP_STATUS_USER: u32 = 1 << 0;

pub(crate) const TPACKET_ALIGNMENT: usize = 16;

/// Per-frame overhead the kernel reserves in front of packet data: the aligned `tpacket_hdr`
/// followed by a `sockaddr_ll`.
pub(crate) const TPACKET_HDRLEN: usize =
    tpacket_align(mem::size_of::<tpacket_hdr>()) + mem::size_of::<libc::sockaddr_ll>();

// `struct tpacket_block_desc` layout (the `bh1` variant starts at byte 8).
pub(crate) const BLOCK_DESC_LEN: usize = 48;
pub(crate) const BD_BLOCK_STATUS: usize = 8;
pub(crate) const BD_NUM_PKTS: usize = 12;
pub(crate) const BD_OFFSET_TO_FIRST_PKT: usize = 16;
pub(crate) const BD_SEQ_NUM: usize = 24;

// `struct tpacket3_hdr` layout.
pub(crate) const TPACKET3_HDR_LEN: usize = 48;
pub(crate) const TP_NEXT_OFFSET: usize = 0;
pub(crate) const TP_SEC: usize = 4;
pub(crate) const TP_NSEC: usize = 8;
pub(crate) const TP_SNAPLEN: usize = 12;
pub(crate) const TP_LEN: usize = 16;
pub(crate) const TP_STATUS: usize = 20;
pub(crate) const TP_MAC: usize = 24;
pub(crate) const TP_RXHASH: usize = 28;
pub(crate) const TP_VLAN_TCI: usize = 32;
pub(crate) const TP_VLAN_TPID: usize = 36;

// `struct sockaddr_ll` layout.
pub(crate) const SOCKADDR_LL_LEN: usize = 20;
pub(crate) const SLL_PROTOCOL: usize = 2;
pub(crate) const SLL_IFINDEX: usize = 4;
pub(crate) const SLL_HATYPE: usize = 8;
pub(crate) const SLL_PKTTYPE: usize = 10;
pub(crate) const SLL_HALEN: usize = 11;
pub(crate) const SLL_ADDR: usize = 12;

/// The TPACKET_V1 frame header. Only its size matters here, since it fixes `TPACKET_HDRLEN`.
#[repr(C)]
#[allow(non_camel_case_types)]
#[allow(dead_code)]
pub(crate) struct tpacket_hdr {
    pub tp_status: libc::c_ulong,
    pub tp_len: libc::c_uint,
    pub tp_snaplen: libc::c_uint,
    pub tp_mac: libc::c_ushort,
    pub tp_net: libc::c_ushort,
    pub tp_sec: libc::c_uint,
    pub tp_usec: libc::c_uint,
}

#[repr(C)]
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug)]
pub(crate) struct tpacket_req3 {
    pub tp_block_size: libc::c_uint,
    pub tp_block_nr: libc::c_uint,
    pub tp_frame_size: libc::c_uint,
    pub tp_frame_nr: libc::c_uint,
    pub tp_retire_blk_tov: libc::c_uint,
    pub tp_sizeof_priv: libc::c_uint,
    pub tp_feature_req_word: libc::c_uint,
}

impl tpacket_req3 {
    /// A request that asks the kernel to tear down an existing ring.
    pub(crate) const RELEASE: Self = Self {
        tp_block_size: 0,
        tp_block_nr: 0,
        tp_frame_size: 0,
        tp_frame_nr: 0,
        tp_retire_blk_tov: 0,
        tp_sizeof_priv: 0,
        tp_feature_req_word: 0,
    };
}

#[repr(C)]
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct tpacket_stats {
    pub tp_packets: libc::c_uint,
    pub tp_drops: libc::c_uint,
}

bitflags! {
    /// Status bits the kernel reports for an individual received frame.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct FrameStatus: u32 {
        /// The frame is owned by userspace.
        const USER = 1 << 0;
        /// The packet exceeded the frame and was truncated; a full copy is queued for `recv()`.
        const COPY = 1 << 1;
        /// Packets have been dropped since the last `PACKET_STATISTICS` query.
        const LOSING = 1 << 2;
        /// Checksum will be computed in hardware (outgoing packets with offload).
        const CSUM_NOT_READY = 1 << 3;
        /// `tp_vlan_tci` holds a valid value.
        const VLAN_VALID = 1 << 4;
        /// The block holding this frame was retired by the timer rather than by filling up.
        const BLK_TMO = 1 << 5;
        /// `tp_vlan_tpid` holds a valid value.
        const VLAN_TPID_VALID = 1 << 6;
        /// The transport checksum was validated by the kernel.
        const CSUM_VALID = 1 << 7;
    }
}

/// Packet statistics reported by the kernel for a packet socket.
///
/// Reading the statistics resets the kernel-side counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketStatistics {
    pub(crate) packets_seen: usize,
    pub(crate) packets_dropped: usize,
}

impl PacketStatistics {
    /// The number of packets that passed the socket since the last query.
    #[inline]
    pub fn packets_seen(&self) -> usize {
        self.packets_seen
    }

    /// The number of packets the kernel dropped since the last query.
    #[inline]
    pub fn packets_dropped(&self) -> usize {
        self.packets_dropped
    }
}

// ==============================================
//              Helper Functions
// ==============================================

pub(crate) const fn tpacket_align(len: usize) -> usize {
    // identical to TPACKET_ALIGN(), but const and safe
    (len + TPACKET_ALIGNMENT - 1) & !(TPACKET_ALIGNMENT - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_libc() {
        assert_eq!(mem::size_of::<libc::tpacket_block_desc>(), BLOCK_DESC_LEN);
        assert_eq!(mem::size_of::<libc::tpacket3_hdr>(), TPACKET3_HDR_LEN);
        assert_eq!(mem::size_of::<libc::sockaddr_ll>(), SOCKADDR_LL_LEN);
        assert_eq!(mem::size_of::<tpacket_req3>(), mem::size_of::<libc::tpacket_req3>());
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn hdrlen_on_64_bit() {
        assert_eq!(TPACKET_HDRLEN, 52);
    }

    #[test]
    fn align() {
        assert_eq!(tpacket_align(0), 0);
        assert_eq!(tpacket_align(1), 16);
        assert_eq!(tpacket_align(48), 48);
        assert_eq!(tpacket_align(65588), 65600);
    }
}
