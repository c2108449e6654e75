// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Block/frame layout of a `PACKET_RX_RING`.

use once_cell::sync::Lazy;

use super::{tpacket_align, tpacket_req3, TPACKET_ALIGNMENT, TPACKET_HDRLEN};
use crate::error::GeometryError;

static PAGE_SIZE: Lazy<usize> = Lazy::new(|| {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        size if size > 0 => size as usize,
        _ => 4096,
    }
});

/// The page size of the running system, as used to validate block sizes.
#[inline]
pub fn page_size() -> usize {
    *PAGE_SIZE
}

/// The shape of a memory-mapped receive ring: how many blocks it holds, how many frames fit in
/// each block and how large each frame slot is.
///
/// A `RingGeometry` is computed once before setup and never changes for the lifetime of a capture
/// session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingGeometry {
    /// The number of blocks allocated to the ring buffer.
    block_cnt: u32,
    /// The number of maximum-sized frames that fit in a single block.
    frames_per_block: u32,
    /// The size of a frame slot: the largest packet plus per-frame header overhead, rounded up to
    /// [`TPACKET_ALIGNMENT`].
    ///
    /// Frames in a TPACKET_V3 block are variable-length, so this only bounds the largest frame;
    /// small packets do not waste the remainder of the slot.
    frame_size: u32,
    /// `frames_per_block * frame_size`. Always a multiple of the page size.
    block_size: u32,
    /// Milliseconds after which the kernel retires a partially filled block to userspace.
    retire_timeout: u32,
}

impl RingGeometry {
    /// 32 blocks of 256 frames each.
    pub const DEFAULT_BLOCK_CNT: u32 = 32;
    pub const DEFAULT_FRAMES_PER_BLOCK: u32 = 256;
    /// The largest packet the default geometry is sized for.
    pub const DEFAULT_MAX_PACKET_SIZE: u32 = 65536;
    /// Block retirement timeout (in milliseconds).
    pub const DEFAULT_RETIRE_TIMEOUT: u32 = 20;

    /// Derives a ring geometry able to hold `frames_per_block` packets of up to `max_packet_size`
    /// bytes in each of `block_cnt` blocks.
    ///
    /// # Errors
    ///
    /// Returns a [`GeometryError`] if any count is zero, if a derived size overflows the
    /// kernel's 32-bit request fields, or if the resulting block size is not a multiple of the
    /// system page size.
    pub fn new(
        block_cnt: u32,
        frames_per_block: u32,
        max_packet_size: u32,
    ) -> Result<Self, GeometryError> {
        let frame_size = (max_packet_size as usize)
            .checked_add(TPACKET_HDRLEN + TPACKET_ALIGNMENT - 1)
            .map(|len| len & !(TPACKET_ALIGNMENT - 1))
            .and_then(|len| u32::try_from(len).ok())
            .ok_or(GeometryError::Overflow)?;

        let block_size = frames_per_block
            .checked_mul(frame_size)
            .ok_or(GeometryError::Overflow)?;

        let geometry = RingGeometry {
            block_cnt,
            frames_per_block,
            frame_size,
            block_size,
            retire_timeout: Self::DEFAULT_RETIRE_TIMEOUT,
        };

        geometry.validate()?;
        Ok(geometry)
    }

    /// Sets the block retirement timeout, in milliseconds.
    ///
    /// A timeout of `0` would select the kernel's own heuristic, so it is bumped to `1`.
    #[inline]
    pub fn with_retire_timeout(mut self, timeout_ms: u32) -> Self {
        self.retire_timeout = timeout_ms.max(1);
        self
    }

    /// Checks the geometry against the constraints the kernel enforces on `PACKET_RX_RING`.
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.block_cnt == 0 {
            return Err(GeometryError::NoBlocks);
        }

        if self.frames_per_block == 0 {
            return Err(GeometryError::NoFrames);
        }

        if (self.frame_size as usize) < TPACKET_HDRLEN {
            return Err(GeometryError::FrameTooSmall {
                frame_size: self.frame_size,
                min: TPACKET_HDRLEN,
            });
        }

        if self.frame_size as usize % TPACKET_ALIGNMENT != 0 {
            return Err(GeometryError::FrameMisaligned {
                frame_size: self.frame_size,
            });
        }

        if self.block_size as usize % page_size() != 0 {
            return Err(GeometryError::BlockNotPageAligned {
                block_size: self.block_size,
                page_size: page_size(),
            });
        }

        self.block_cnt
            .checked_mul(self.frames_per_block)
            .ok_or(GeometryError::Overflow)?;

        let map_length = (self.block_size as usize)
            .checked_mul(self.block_cnt as usize)
            .ok_or(GeometryError::Overflow)?;
        if map_length > isize::MAX as usize {
            return Err(GeometryError::Overflow);
        }

        Ok(())
    }

    #[inline]
    pub fn block_cnt(&self) -> u32 {
        self.block_cnt
    }

    #[inline]
    pub fn frames_per_block(&self) -> u32 {
        self.frames_per_block
    }

    #[inline]
    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    #[inline]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// The total number of frame slots across all blocks.
    #[inline]
    pub fn frame_cnt(&self) -> u32 {
        self.block_cnt.saturating_mul(self.frames_per_block)
    }

    /// The size of the shared mapping (`block_size * block_cnt`).
    #[inline]
    pub fn map_length(&self) -> usize {
        self.block_size as usize * self.block_cnt as usize
    }

    #[inline]
    pub fn retire_timeout(&self) -> u32 {
        self.retire_timeout
    }

    /// Builds a geometry without checking it, for exercising validation failures.
    #[cfg(test)]
    pub(crate) fn unchecked(block_cnt: u32, frames_per_block: u32, frame_size: u32) -> Self {
        RingGeometry {
            block_cnt,
            frames_per_block,
            frame_size,
            block_size: frames_per_block.saturating_mul(frame_size),
            retire_timeout: Self::DEFAULT_RETIRE_TIMEOUT,
        }
    }

    /// The `PACKET_RX_RING` request describing this geometry.
    pub(crate) fn rx_request(&self) -> tpacket_req3 {
        tpacket_req3 {
            tp_block_size: self.block_size,
            tp_block_nr: self.block_cnt,
            tp_frame_size: self.frame_size,
            tp_frame_nr: self.frame_cnt(),
            tp_retire_blk_tov: self.retire_timeout,
            tp_sizeof_priv: 0,
            tp_feature_req_word: 0,
        }
    }
}

impl Default for RingGeometry {
    fn default() -> Self {
        let frame_size =
            tpacket_align(Self::DEFAULT_MAX_PACKET_SIZE as usize + TPACKET_HDRLEN) as u32;

        RingGeometry {
            block_cnt: Self::DEFAULT_BLOCK_CNT,
            frames_per_block: Self::DEFAULT_FRAMES_PER_BLOCK,
            frame_size,
            block_size: Self::DEFAULT_FRAMES_PER_BLOCK * frame_size,
            retire_timeout: Self::DEFAULT_RETIRE_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn default_geometry() {
        let geometry = RingGeometry::default();
        assert_eq!(geometry.frame_size(), 65600);
        assert_eq!(geometry.block_size(), 256 * 65600);
        assert_eq!(geometry.frame_cnt(), 32 * 256);
        assert_eq!(geometry.map_length(), 32 * 256 * 65600);
        assert_eq!(geometry.retire_timeout(), 20);
    }

    #[test]
    fn derived_frame_size_is_aligned() {
        let geometry = RingGeometry::new(4, 256, 1500).unwrap();
        assert_eq!(geometry.frame_size() as usize % TPACKET_ALIGNMENT, 0);
        assert!(geometry.frame_size() as usize >= 1500 + TPACKET_HDRLEN);
        assert_eq!(geometry.block_size(), 256 * geometry.frame_size());
    }

    #[test]
    fn rejects_zero_counts() {
        assert_eq!(RingGeometry::new(0, 256, 1500), Err(GeometryError::NoBlocks));
        assert_eq!(RingGeometry::new(4, 0, 1500), Err(GeometryError::NoFrames));
    }

    #[test]
    fn rejects_overflow() {
        assert_eq!(
            RingGeometry::new(4, u32::MAX, 1500),
            Err(GeometryError::Overflow)
        );
        assert_eq!(
            RingGeometry::new(4, 1, u32::MAX),
            Err(GeometryError::Overflow)
        );
    }

    #[test]
    fn rejects_unaligned_block() {
        // a single 1500-byte frame never fills a page exactly
        assert!(matches!(
            RingGeometry::new(4, 1, 1500),
            Err(GeometryError::BlockNotPageAligned { .. })
        ));
    }

    #[test]
    fn request_mirrors_geometry() {
        let geometry = RingGeometry::default().with_retire_timeout(0);
        let req = geometry.rx_request();
        assert_eq!(req.tp_block_nr, geometry.block_cnt());
        assert_eq!(req.tp_block_size, geometry.block_size());
        assert_eq!(req.tp_frame_size, geometry.frame_size());
        assert_eq!(req.tp_frame_nr, geometry.frame_cnt());
        assert_eq!(req.tp_retire_blk_tov, 1);
        assert_eq!(req.tp_sizeof_priv, 0);
    }
}
