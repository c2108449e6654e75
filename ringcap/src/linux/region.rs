// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Ownership of the memory shared between the kernel and a capture session.
//!
//! A [`RingRegion`] is the single owner of the mapping. Everything else reaches into it through a
//! [`BlockView`], a borrowed `(region, offset, length)` triple whose accessors check every read
//! against the block's bounds before touching memory. No raw pointer into the mapping escapes this
//! module, and the borrow checker keeps views from outliving the mapping.

use std::ptr::NonNull;
use std::sync::atomic::AtomicU32;
use std::{mem, slice};

#[cfg(test)]
use std::alloc::{self, Layout};

/// What keeps the memory behind a [`RingRegion`] alive.
enum Backing {
    /// Shared with the kernel through `mmap()`; released with `munmap()`.
    Mapped,
    /// Heap memory laid out like a ring, used to exercise the engine without a kernel.
    #[cfg(test)]
    Heap(Layout),
}

/// The owning handle of a packet ring's memory.
pub struct RingRegion {
    ptr: NonNull<u8>,
    len: usize,
    block_size: usize,
    backing: Backing,
}

// SAFETY: the region is only ever accessed through `&self`/`&mut self` of its single owner; the
// kernel side of the mapping synchronizes solely through the atomic block status words.
unsafe impl Send for RingRegion {}

impl RingRegion {
    /// Takes ownership of a mapping of `block_cnt` blocks of `block_size` bytes each.
    ///
    /// # Safety
    ///
    /// `ptr` must be the start of a live `mmap()` of exactly `block_size * block_cnt` bytes that
    /// nothing else will unmap.
    pub(crate) unsafe fn from_mapping(ptr: NonNull<u8>, block_size: usize, block_cnt: usize) -> Self {
        RingRegion {
            ptr,
            len: block_size * block_cnt,
            block_size,
            backing: Backing::Mapped,
        }
    }

    /// Allocates zeroed, page-independent heap memory with the same layout as a mapped ring.
    #[cfg(test)]
    pub(crate) fn heap(block_size: usize, block_cnt: usize) -> Self {
        let len = block_size * block_cnt;
        let layout = Layout::from_size_align(len, mem::align_of::<u64>()).unwrap();
        let ptr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) }).unwrap();

        RingRegion {
            ptr,
            len,
            block_size,
            backing: Backing::Heap(layout),
        }
    }

    /// The total length of the region in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub fn block_cnt(&self) -> usize {
        self.len / self.block_size
    }

    /// A bounds-checked view of block `index`, or `None` if no such block exists.
    #[inline]
    pub fn block(&self, index: usize) -> Option<BlockView<'_>> {
        if index >= self.block_cnt() {
            return None;
        }

        Some(BlockView {
            region: self,
            offset: index * self.block_size,
            len: self.block_size,
        })
    }

    /// Mutable access to the raw bytes of the region, for building synthetic rings in tests.
    #[cfg(test)]
    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: heap regions are exclusively owned; `&mut self` rules out live views.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for RingRegion {
    fn drop(&mut self) {
        match self.backing {
            Backing::Mapped => unsafe {
                if libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len) != 0 {
                    log::warn!(
                        "failed to unmap {}-byte packet ring: {}",
                        self.len,
                        std::io::Error::last_os_error()
                    );
                }
            },
            #[cfg(test)]
            Backing::Heap(layout) => unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) },
        }
    }
}

/// A non-owning, bounds-checked window onto one block of a [`RingRegion`].
///
/// All offsets taken by the accessors are relative to the start of the block.
#[derive(Clone, Copy)]
pub struct BlockView<'a> {
    region: &'a RingRegion,
    offset: usize,
    len: usize,
}

impl<'a> BlockView<'a> {
    /// The length of the block in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// The offset of the block from the start of the region.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Checks that `[offset, offset + len)` lies inside the block and returns a pointer to it.
    #[inline]
    fn checked_ptr(&self, offset: usize, len: usize) -> Option<*const u8> {
        let end = offset.checked_add(len)?;
        if end > self.len {
            return None;
        }

        // SAFETY: `self.offset + end <= region.len`, so the pointer stays within the mapping.
        Some(unsafe { self.region.ptr.as_ptr().add(self.offset + offset) as *const u8 })
    }

    /// A shared atomic view of the naturally aligned 32-bit word at `offset`.
    #[inline]
    pub fn atomic_u32(&self, offset: usize) -> Option<&'a AtomicU32> {
        let ptr = self.checked_ptr(offset, mem::size_of::<AtomicU32>())?;
        if ptr as usize % mem::align_of::<AtomicU32>() != 0 {
            return None;
        }

        // SAFETY: in bounds, aligned, and `AtomicU32` has the same layout as `u32`. Shared words
        // are only ever mutated atomically from this side of the mapping.
        Some(unsafe { &*(ptr as *const AtomicU32) })
    }

    #[inline]
    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        let ptr = self.checked_ptr(offset, mem::size_of::<u16>())?;
        // SAFETY: bounds checked above.
        Some(unsafe { (ptr as *const u16).read_unaligned() })
    }

    #[inline]
    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        let ptr = self.checked_ptr(offset, mem::size_of::<u32>())?;
        // SAFETY: bounds checked above.
        Some(unsafe { (ptr as *const u32).read_unaligned() })
    }

    #[inline]
    pub fn read_u64(&self, offset: usize) -> Option<u64> {
        let ptr = self.checked_ptr(offset, mem::size_of::<u64>())?;
        // SAFETY: bounds checked above.
        Some(unsafe { (ptr as *const u64).read_unaligned() })
    }

    /// A borrowed, zero-copy slice of `len` bytes starting at `offset`.
    #[inline]
    pub fn bytes(&self, offset: usize, len: usize) -> Option<&'a [u8]> {
        let ptr = self.checked_ptr(offset, len)?;
        // SAFETY: bounds checked above; the slice borrows the region, so it cannot outlive it.
        Some(unsafe { slice::from_raw_parts(ptr, len) })
    }

    /// Copies `N` bytes starting at `offset` out of the block.
    #[inline]
    pub fn array<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(offset, N)?);
        Some(out)
    }
}
