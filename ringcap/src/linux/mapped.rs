// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Zero-copy capture through a TPACKET_V3 `PACKET_RX_RING`.
//!
//! The kernel fills the ring one block at a time and flips each block's status word to
//! `TP_STATUS_USER` once the block is full (or its retire timer fires). [`MmapCapture`] picks up
//! filled blocks in round-robin order, walks the chain of variable-length frames inside each one,
//! and hands the whole block back to the kernel once its last frame has been acknowledged.
//!
//! Every offset read out of the shared memory is checked against the bounds of the block that
//! contains it. A block whose frame chain points outside of itself is handed back to the kernel
//! undelivered and counted in [`CaptureStats::malformed_blocks()`].

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::addr::LinkAddr;
use super::geometry::RingGeometry;
use super::region::{BlockView, RingRegion};
use super::socket::PacketSocket;
use super::{
    tpacket_align, tpacket_req3, FrameStatus, BD_BLOCK_STATUS, BD_NUM_PKTS,
    BD_OFFSET_TO_FIRST_PKT, BD_SEQ_NUM, BLOCK_DESC_LEN, SOCKADDR_LL_LEN, TPACKET3_HDR_LEN,
    TPACKET_V3, TP_LEN, TP_MAC, TP_NEXT_OFFSET, TP_NSEC, TP_RXHASH, TP_SEC, TP_SNAPLEN,
    TP_STATUS, TP_STATUS_KERNEL, TP_STATUS_USER, TP_VLAN_TCI, TP_VLAN_TPID,
};
use crate::capture::{Capture, CaptureConfig, CaptureMethod, CaptureStats, FrameInfo, Packet};
use crate::error::{SetupError, SetupStage};

/// A decoded frame header whose every extent has been checked against its block.
#[derive(Clone, Copy, Debug)]
struct Frame {
    /// Offset of the frame header from the start of the block.
    offset: usize,
    next_offset: u32,
    /// Offset of the packet data from the start of the block.
    data_offset: usize,
    len: usize,
    addr: LinkAddr,
    info: FrameInfo,
}

/// Position within the block currently being drained.
#[derive(Clone, Copy, Debug)]
struct Cursor {
    block: usize,
    /// Packet count the kernel stored in the block descriptor. Diagnostic only; the frame chain
    /// decides where the block ends.
    declared: u32,
    seq: u64,
    consumed: u32,
    frame: Frame,
}

/// The consumer side of a mapped ring: block scanning, frame iteration and block release.
pub(crate) struct RxRing {
    region: RingRegion,
    hdrlen: usize,
    /// The block the next scan starts from.
    lastblock: usize,
    cursor: Option<Cursor>,
    stats: CaptureStats,
}

impl RxRing {
    /// Wraps a ring region whose frames carry `hdrlen`-byte headers (as reported by
    /// `PACKET_HDRLEN`).
    pub(crate) fn new(region: RingRegion, hdrlen: usize) -> Self {
        RxRing {
            region,
            hdrlen,
            lastblock: 0,
            cursor: None,
            stats: CaptureStats::default(),
        }
    }

    #[inline]
    fn block_ready(block: &BlockView<'_>) -> bool {
        block
            .atomic_u32(BD_BLOCK_STATUS)
            .map_or(false, |status| {
                status.load(Ordering::Acquire) & TP_STATUS_USER != 0
            })
    }

    /// Finds the first block owned by userspace, visiting every block once starting from
    /// `lastblock`.
    pub(crate) fn find_filled_block(&self) -> Option<usize> {
        let block_cnt = self.region.block_cnt();

        (0..block_cnt)
            .map(|i| (self.lastblock + i) % block_cnt)
            .find(|&index| {
                self.region
                    .block(index)
                    .map_or(false, |block| Self::block_ready(&block))
            })
    }

    /// Decodes the frame header at `offset`, rejecting it if the header, its link-layer address or
    /// its captured bytes extend past the end of the block.
    ///
    /// `tp_len` may exceed `tp_snaplen` when the kernel truncated the packet; only the captured
    /// bytes are held in the block.
    fn decode_frame(&self, block: &BlockView<'_>, offset: usize) -> Option<Frame> {
        if offset < BLOCK_DESC_LEN {
            return None;
        }
        block.bytes(offset, TPACKET3_HDR_LEN)?;

        let next_offset = block.read_u32(offset + TP_NEXT_OFFSET)?;
        let sec = block.read_u32(offset + TP_SEC)?;
        let nsec = block.read_u32(offset + TP_NSEC)?;
        let snaplen = block.read_u32(offset + TP_SNAPLEN)? as usize;
        let len = block.read_u32(offset + TP_LEN)? as usize;
        let status = FrameStatus::from_bits_retain(block.read_u32(offset + TP_STATUS)?);
        let mac = block.read_u16(offset + TP_MAC)? as usize;

        let addr_offset = offset.checked_add(tpacket_align(self.hdrlen))?;
        let raw_addr = block.array::<SOCKADDR_LL_LEN>(addr_offset)?;

        let captured = len.min(snaplen);
        let data_offset = offset.checked_add(mac)?;
        block.bytes(data_offset, captured)?;

        Some(Frame {
            offset,
            next_offset,
            data_offset,
            len: captured,
            addr: LinkAddr::from_raw(&raw_addr),
            info: FrameInfo {
                timestamp: Some(Duration::new(sec.into(), nsec)),
                wire_len: len,
                status,
                rx_hash: block.read_u32(offset + TP_RXHASH)?,
                vlan_tci: block.read_u32(offset + TP_VLAN_TCI)?,
                vlan_tpid: block.read_u16(offset + TP_VLAN_TPID)?,
            },
        })
    }

    /// Locates the first frame of a block userspace owns.
    fn first_frame(&self, index: usize) -> Option<Cursor> {
        let block = self.region.block(index)?;
        let declared = block.read_u32(BD_NUM_PKTS)?;
        let seq = block.read_u64(BD_SEQ_NUM)?;
        let first = block.read_u32(BD_OFFSET_TO_FIRST_PKT)? as usize;

        Some(Cursor {
            block: index,
            declared,
            seq,
            consumed: 0,
            frame: self.decode_frame(&block, first)?,
        })
    }

    /// Moves the cursor to the first frame of the next filled block.
    ///
    /// Malformed blocks encountered along the way are released, so at most one pass over the ring
    /// is made.
    fn open_next_block(&mut self) -> bool {
        for _ in 0..self.region.block_cnt() {
            let Some(index) = self.find_filled_block() else {
                return false;
            };

            match self.first_frame(index) {
                Some(cursor) => {
                    log::trace!(
                        "draining ring block {} (seq {}, {} packets)",
                        index,
                        cursor.seq,
                        cursor.declared
                    );
                    self.cursor = Some(cursor);
                    return true;
                }
                None => self.release_malformed(index, "first frame lies outside the block"),
            }
        }

        false
    }

    /// Hands block `index` back to the kernel and resumes scanning from it.
    fn release_block(&mut self, index: usize) {
        if let Some(status) = self
            .region
            .block(index)
            .and_then(|block| block.atomic_u32(BD_BLOCK_STATUS))
        {
            status.store(TP_STATUS_KERNEL, Ordering::Release);
        }

        self.lastblock = index;
        self.cursor = None;
        self.stats.blocks_released += 1;
    }

    fn release_malformed(&mut self, index: usize, reason: &str) {
        log::warn!("dropping malformed ring block {}: {}", index, reason);
        self.stats.malformed_blocks += 1;
        self.release_block(index);
    }

    pub(crate) fn has_packet(&mut self) -> bool {
        self.cursor.is_some() || self.open_next_block()
    }

    pub(crate) fn get_packet(&mut self) -> Option<Packet<'_>> {
        if !self.has_packet() {
            return None;
        }

        let Cursor { block, frame, .. } = self.cursor?;
        let data = self
            .region
            .block(block)?
            .bytes(frame.data_offset, frame.len)?;

        Some(Packet::new(data, frame.addr, frame.info))
    }

    pub(crate) fn put_packet(&mut self) {
        let Some(mut cursor) = self.cursor else {
            return;
        };

        self.stats.packets += 1;
        cursor.consumed += 1;

        if cursor.frame.next_offset == 0 {
            if cursor.consumed != cursor.declared {
                self.stats.count_mismatches += 1;
                log::debug!(
                    "ring block {} declared {} packets but chained {}",
                    cursor.block,
                    cursor.declared,
                    cursor.consumed
                );
            }
            self.release_block(cursor.block);
            return;
        }

        let next = cursor
            .frame
            .offset
            .checked_add(cursor.frame.next_offset as usize);
        let frame = match (next, self.region.block(cursor.block)) {
            (Some(next), Some(block)) => self.decode_frame(&block, next),
            _ => None,
        };

        match frame {
            Some(frame) => {
                cursor.frame = frame;
                self.cursor = Some(cursor);
            }
            None => self.release_malformed(cursor.block, "next frame lies outside the block"),
        }
    }

    #[inline]
    pub(crate) fn stats(&self) -> CaptureStats {
        self.stats
    }
}

/// A capture session reading packets directly out of a memory-mapped TPACKET_V3 ring.
///
/// Packets returned by [`get_packet()`](Capture::get_packet) borrow the ring itself; the block
/// holding them is only returned to the kernel once every packet in it has been acknowledged with
/// [`put_packet()`](Capture::put_packet).
pub struct MmapCapture {
    // Declared before `socket` so that the mapping is torn down before the descriptor is closed.
    ring: Option<RxRing>,
    socket: PacketSocket,
    geometry: RingGeometry,
    hdrlen: usize,
    closed_stats: CaptureStats,
}

fn setup_failed(stage: SetupStage, source: io::Error, socket: PacketSocket) -> SetupError {
    log::warn!("packet ring setup failed during {}: {}", stage, source);
    SetupError::new(stage, source, socket)
}

impl MmapCapture {
    /// The layout of the ring in use.
    #[inline]
    pub fn geometry(&self) -> &RingGeometry {
        &self.geometry
    }

    /// The length of the frame header reported by the kernel.
    #[inline]
    pub fn header_len(&self) -> usize {
        self.hdrlen
    }

    /// Indicates whether [`close()`](Capture::close) has released the ring.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.ring.is_none()
    }
}

impl Capture for MmapCapture {
    /// Switches `socket` to TPACKET_V3, allocates a receive ring shaped by `config.geometry` and
    /// maps it into the process.
    ///
    /// If mapping fails after the ring was allocated, the ring is released again before the
    /// socket is handed back.
    fn setup(socket: PacketSocket, config: &CaptureConfig) -> Result<Self, SetupError> {
        let geometry = config.geometry;

        if let Err(e) = geometry.validate() {
            return Err(setup_failed(SetupStage::Geometry, e.into(), socket));
        }

        if let Err(e) = socket.set_version(TPACKET_V3) {
            return Err(setup_failed(SetupStage::Version, e, socket));
        }

        let hdrlen = match socket.header_len(TPACKET_V3) {
            Ok(hdrlen) => hdrlen,
            Err(e) => return Err(setup_failed(SetupStage::HeaderLength, e, socket)),
        };

        if let Err(e) = socket.set_rx_ring(&geometry.rx_request()) {
            return Err(setup_failed(SetupStage::RingRequest, e, socket));
        }

        let ptr = match socket.mmap_rx_ring(geometry.map_length()) {
            Ok(ptr) => ptr,
            Err(e) => {
                if let Err(release) = socket.set_rx_ring(&tpacket_req3::RELEASE) {
                    log::debug!("failed to release unmapped packet ring: {}", release);
                }
                return Err(setup_failed(SetupStage::Mapping, e, socket));
            }
        };

        // SAFETY: `ptr` is a fresh mapping of exactly `map_length()` bytes that only this region
        // will unmap.
        let region = unsafe {
            RingRegion::from_mapping(
                ptr,
                geometry.block_size() as usize,
                geometry.block_cnt() as usize,
            )
        };

        log::info!(
            "mapped {}-byte packet ring ({} blocks of {} bytes, hdrlen {})",
            region.len(),
            geometry.block_cnt(),
            geometry.block_size(),
            hdrlen
        );

        Ok(MmapCapture {
            ring: Some(RxRing::new(region, hdrlen)),
            socket,
            geometry,
            hdrlen,
            closed_stats: CaptureStats::default(),
        })
    }

    #[inline]
    fn has_packet(&mut self) -> bool {
        self.ring.as_mut().map_or(false, RxRing::has_packet)
    }

    #[inline]
    fn get_packet(&mut self) -> Option<Packet<'_>> {
        self.ring.as_mut()?.get_packet()
    }

    #[inline]
    fn put_packet(&mut self) {
        if let Some(ring) = self.ring.as_mut() {
            ring.put_packet();
        }
    }

    fn close(&mut self) {
        if let Some(ring) = self.ring.take() {
            self.closed_stats = ring.stats();
            log::debug!("unmapping {}-byte packet ring", ring.region.len());
        }
    }

    #[inline]
    fn method(&self) -> CaptureMethod {
        CaptureMethod::Mapped
    }

    fn stats(&self) -> CaptureStats {
        self.ring
            .as_ref()
            .map_or(self.closed_stats, RxRing::stats)
    }

    #[inline]
    fn socket(&self) -> &PacketSocket {
        &self.socket
    }
}

impl AsRawFd for MmapCapture {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linux::{SLL_HALEN, SLL_IFINDEX, SLL_PROTOCOL};
    use std::os::fd::FromRawFd;
    use std::time::{SystemTime, UNIX_EPOCH};

    const BLOCK: usize = 1024;
    const HDRLEN: usize = TPACKET3_HDR_LEN;
    const MAC: usize = tpacket_align(HDRLEN + SOCKADDR_LL_LEN);

    fn put_u16(buf: &mut [u8], at: usize, value: u16) {
        buf[at..at + 2].copy_from_slice(&value.to_ne_bytes());
    }

    fn put_u32(buf: &mut [u8], at: usize, value: u32) {
        buf[at..at + 4].copy_from_slice(&value.to_ne_bytes());
    }

    fn put_u64(buf: &mut [u8], at: usize, value: u64) {
        buf[at..at + 8].copy_from_slice(&value.to_ne_bytes());
    }

    fn ring(block_cnt: usize) -> RxRing {
        RxRing::new(RingRegion::heap(BLOCK, block_cnt), HDRLEN)
    }

    fn block_mut(ring: &mut RxRing, index: usize) -> &mut [u8] {
        &mut ring.region.bytes_mut()[index * BLOCK..(index + 1) * BLOCK]
    }

    /// Lays out `frames` as `(protocol, len)` pairs in block `index` and hands the block to
    /// userspace, the way the kernel would.
    fn fill_block(ring: &mut RxRing, index: usize, declared: u32, frames: &[(u16, usize)]) {
        let block = block_mut(ring, index);
        put_u32(block, BD_NUM_PKTS, declared);
        put_u32(block, BD_OFFSET_TO_FIRST_PKT, BLOCK_DESC_LEN as u32);
        put_u64(block, BD_SEQ_NUM, index as u64 + 1);

        let mut offset = BLOCK_DESC_LEN;
        for (i, &(protocol, len)) in frames.iter().enumerate() {
            let next = if i + 1 == frames.len() {
                0
            } else {
                tpacket_align(MAC + len)
            };

            put_u32(block, offset + TP_NEXT_OFFSET, next as u32);
            put_u32(block, offset + TP_SEC, 1_700_000_000);
            put_u32(block, offset + TP_NSEC, i as u32);
            put_u32(block, offset + TP_SNAPLEN, len as u32);
            put_u32(block, offset + TP_LEN, len as u32);
            put_u32(block, offset + TP_STATUS, FrameStatus::USER.bits());
            put_u16(block, offset + TP_MAC, MAC as u16);

            let sll = offset + tpacket_align(HDRLEN);
            block[sll + SLL_PROTOCOL..sll + SLL_PROTOCOL + 2]
                .copy_from_slice(&protocol.to_be_bytes());
            block[sll + SLL_IFINDEX..sll + SLL_IFINDEX + 4].copy_from_slice(&2i32.to_ne_bytes());
            block[sll + SLL_HALEN] = 6;

            block[offset + MAC..offset + MAC + len].fill(i as u8 + 1);
            offset += next;
        }

        put_u32(block, BD_BLOCK_STATUS, TP_STATUS_USER);
    }

    fn block_status(ring: &RxRing, index: usize) -> u32 {
        ring.region
            .block(index)
            .and_then(|block| block.read_u32(BD_BLOCK_STATUS))
            .unwrap()
    }

    /// Drains every ready packet, returning `(protocol, len, first byte)` for each.
    fn drain_all(ring: &mut RxRing) -> Vec<(u16, usize, u8)> {
        let mut seen = Vec::new();
        while let Some(packet) = ring.get_packet() {
            let first = packet.data().first().copied().unwrap_or(0);
            seen.push((packet.protocol(), packet.len(), first));
            ring.put_packet();
        }
        seen
    }

    #[test]
    fn drains_blocks_in_order() {
        let mut ring = ring(2);
        fill_block(&mut ring, 0, 2, &[(0x0800, 64), (0x86dd, 128)]);

        assert!(ring.has_packet());
        let packet = ring.get_packet().unwrap();
        assert_eq!(packet.len(), 64);
        assert_eq!(packet.data().len(), 64);
        assert_eq!(packet.protocol(), 0x0800);
        ring.put_packet();

        // the block stays with userspace until its last frame is acknowledged
        assert_eq!(block_status(&ring, 0), TP_STATUS_USER);

        let packet = ring.get_packet().unwrap();
        assert_eq!(packet.len(), 128);
        assert_eq!(packet.protocol(), 0x86dd);
        ring.put_packet();

        assert_eq!(block_status(&ring, 0), TP_STATUS_KERNEL);
        assert_eq!(ring.lastblock, 0);
        assert!(!ring.has_packet());

        fill_block(&mut ring, 1, 1, &[(0x0806, 40)]);
        assert!(ring.has_packet());
        let packet = ring.get_packet().unwrap();
        assert_eq!(packet.len(), 40);
        assert_eq!(packet.protocol(), 0x0806);
        ring.put_packet();

        assert_eq!(block_status(&ring, 1), TP_STATUS_KERNEL);
        assert_eq!(ring.lastblock, 1);

        let stats = ring.stats();
        assert_eq!(stats.packets(), 3);
        assert_eq!(stats.blocks_released(), 2);
        assert_eq!(stats.malformed_blocks(), 0);
        assert_eq!(stats.count_mismatches(), 0);
    }

    #[test]
    fn scan_starts_at_last_released_block() {
        for start in 0..4 {
            for ready in 0u8..16 {
                let mut ring = ring(4);
                ring.lastblock = start;
                for index in 0..4 {
                    if ready & (1 << index) != 0 {
                        put_u32(block_mut(&mut ring, index), BD_BLOCK_STATUS, TP_STATUS_USER);
                    }
                }

                let expected = (0..4)
                    .map(|i| (start + i) % 4)
                    .find(|index| ready & (1 << index) != 0);
                assert_eq!(ring.find_filled_block(), expected, "start {start}, ready {ready:04b}");
            }
        }
    }

    #[test]
    fn wraps_around_the_ring() {
        let mut ring = ring(3);
        fill_block(&mut ring, 2, 1, &[(0x0800, 60)]);
        fill_block(&mut ring, 0, 1, &[(0x0806, 42)]);
        ring.lastblock = 2;

        assert_eq!(
            drain_all(&mut ring),
            vec![(0x0800, 60, 1), (0x0806, 42, 1)]
        );
        assert_eq!(ring.lastblock, 0);
    }

    #[test]
    fn idle_ring_is_left_untouched() {
        let mut ring = ring(2);
        ring.lastblock = 1;

        assert!(!ring.has_packet());
        assert!(ring.get_packet().is_none());
        ring.put_packet();

        assert_eq!(ring.lastblock, 1);
        assert!(ring.cursor.is_none());
        assert_eq!(ring.stats(), CaptureStats::default());
    }

    #[test]
    fn repeated_get_returns_the_same_packet() {
        let mut ring = ring(1);
        fill_block(&mut ring, 0, 2, &[(0x0800, 64), (0x0800, 80)]);

        assert_eq!(ring.get_packet().map(|p| p.len()), Some(64));
        assert_eq!(ring.get_packet().map(|p| p.len()), Some(64));
        ring.put_packet();
        assert_eq!(ring.get_packet().map(|p| p.len()), Some(80));
    }

    #[test]
    fn chain_terminator_overrides_declared_count() {
        let mut ring = ring(2);
        fill_block(&mut ring, 0, 5, &[(0x0800, 64), (0x0800, 64)]);
        fill_block(&mut ring, 1, 1, &[(0x86dd, 70), (0x86dd, 71), (0x86dd, 72)]);

        assert_eq!(
            drain_all(&mut ring),
            vec![
                (0x0800, 64, 1),
                (0x0800, 64, 2),
                (0x86dd, 70, 1),
                (0x86dd, 71, 2),
                (0x86dd, 72, 3),
            ]
        );
        assert_eq!(ring.stats().count_mismatches(), 2);
        assert_eq!(ring.stats().blocks_released(), 2);
        assert_eq!(ring.stats().malformed_blocks(), 0);
    }

    #[test]
    fn frame_metadata() {
        let mut ring = ring(1);
        fill_block(&mut ring, 0, 1, &[(0x0800, 64)]);

        let packet = ring.get_packet().unwrap();
        assert_eq!(
            packet.timestamp(),
            Some(UNIX_EPOCH + Duration::from_secs(1_700_000_000))
        );
        assert!(packet.timestamp() < Some(SystemTime::now()));
        assert_eq!(packet.snaplen(), 64);
        assert!(!packet.is_truncated());
        assert_eq!(packet.status(), FrameStatus::USER);
        assert_eq!(packet.link_addr().if_index(), 2);
        assert_eq!(packet.vlan_tci(), None);
        assert!(packet.data().iter().all(|&b| b == 1));
    }

    #[test]
    fn next_offset_past_block_releases_it() {
        let mut ring = ring(1);
        fill_block(&mut ring, 0, 2, &[(0x0800, 64), (0x0800, 64)]);
        put_u32(block_mut(&mut ring, 0), BLOCK_DESC_LEN + TP_NEXT_OFFSET, 5000);

        assert_eq!(ring.get_packet().map(|p| p.len()), Some(64));
        ring.put_packet();

        assert!(!ring.has_packet());
        assert_eq!(block_status(&ring, 0), TP_STATUS_KERNEL);
        assert_eq!(ring.stats().malformed_blocks(), 1);
        assert_eq!(ring.stats().packets(), 1);
    }

    #[test]
    fn first_frame_past_block_is_skipped() {
        let mut ring = ring(2);
        fill_block(&mut ring, 0, 1, &[(0x0800, 64)]);
        fill_block(&mut ring, 1, 1, &[(0x0806, 42)]);
        put_u32(block_mut(&mut ring, 0), BD_OFFSET_TO_FIRST_PKT, 4000);

        assert_eq!(drain_all(&mut ring), vec![(0x0806, 42, 1)]);
        assert_eq!(block_status(&ring, 0), TP_STATUS_KERNEL);
        assert_eq!(ring.stats().malformed_blocks(), 1);
        assert_eq!(ring.stats().blocks_released(), 2);
    }

    #[test]
    fn first_frame_inside_descriptor_is_rejected() {
        let mut ring = ring(1);
        fill_block(&mut ring, 0, 1, &[(0x0800, 64)]);
        put_u32(block_mut(&mut ring, 0), BD_OFFSET_TO_FIRST_PKT, 0);

        assert!(!ring.has_packet());
        assert_eq!(ring.stats().malformed_blocks(), 1);
    }

    #[test]
    fn truncated_frame_is_delivered() {
        let mut ring = ring(1);
        fill_block(&mut ring, 0, 2, &[(0x0800, 64), (0x0806, 42)]);
        let block = block_mut(&mut ring, 0);
        put_u32(block, BLOCK_DESC_LEN + TP_LEN, 5000);
        put_u32(
            block,
            BLOCK_DESC_LEN + TP_STATUS,
            (FrameStatus::USER | FrameStatus::COPY).bits(),
        );

        let packet = ring.get_packet().unwrap();
        assert_eq!(packet.len(), 5000);
        assert_eq!(packet.snaplen(), 64);
        assert_eq!(packet.data().len(), 64);
        assert!(packet.is_truncated());
        assert!(packet.status().contains(FrameStatus::COPY));
        ring.put_packet();

        assert_eq!(drain_all(&mut ring), vec![(0x0806, 42, 2)]);
        assert_eq!(block_status(&ring, 0), TP_STATUS_KERNEL);
        assert_eq!(ring.stats().malformed_blocks(), 0);
        assert_eq!(ring.stats().packets(), 2);
    }

    #[test]
    fn captured_bytes_past_block_are_not_delivered() {
        let mut ring = ring(1);
        fill_block(&mut ring, 0, 1, &[(0x0800, 64)]);
        let block = block_mut(&mut ring, 0);
        put_u32(block, BLOCK_DESC_LEN + TP_SNAPLEN, 5000);
        put_u32(block, BLOCK_DESC_LEN + TP_LEN, 5000);

        assert!(ring.get_packet().is_none());
        assert_eq!(block_status(&ring, 0), TP_STATUS_KERNEL);
        assert_eq!(ring.stats().malformed_blocks(), 1);
        assert_eq!(ring.stats().packets(), 0);
    }

    #[test]
    fn zero_length_packet_is_delivered() {
        let mut ring = ring(1);
        fill_block(&mut ring, 0, 1, &[(0x0800, 0)]);

        let packet = ring.get_packet().unwrap();
        assert_eq!(packet.len(), 0);
        assert!(packet.is_empty());
        assert!(packet.data().is_empty());
        assert!(!packet.is_truncated());
        ring.put_packet();

        assert!(!ring.has_packet());
        assert_eq!(block_status(&ring, 0), TP_STATUS_KERNEL);
        assert_eq!(ring.stats().blocks_released(), 1);
        assert_eq!(ring.stats().malformed_blocks(), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        assert!(fd >= 0);

        let mut rx = ring(1);
        fill_block(&mut rx, 0, 1, &[(0x0800, 64)]);

        let mut capture = MmapCapture {
            ring: Some(rx),
            socket: unsafe { PacketSocket::from_raw_fd(fd) },
            geometry: RingGeometry::default(),
            hdrlen: HDRLEN,
            closed_stats: CaptureStats::default(),
        };

        assert!(capture.has_packet());
        capture.put_packet();
        assert_eq!(capture.stats().packets(), 1);

        capture.close();
        assert!(capture.is_closed());
        capture.close();

        assert!(!capture.has_packet());
        assert!(capture.get_packet().is_none());
        capture.put_packet();
        assert_eq!(capture.stats().packets(), 1);
        assert_eq!(capture.as_raw_fd(), fd);
    }

    #[test]
    fn setup_hands_back_socket_on_failure() {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        assert!(fd >= 0);
        let socket = unsafe { PacketSocket::from_raw_fd(fd) };

        let err = match MmapCapture::setup(socket, &CaptureConfig::default()) {
            Ok(_) => panic!("non-packet socket accepted a packet ring"),
            Err(e) => e,
        };
        // 64 KiB-page systems reject the default geometry before the socket is touched
        assert!(matches!(
            err.stage(),
            SetupStage::Version | SetupStage::Geometry
        ));
        assert_eq!(err.into_socket().as_raw_fd(), fd);
    }
}
