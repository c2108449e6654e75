// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Zero-copy link-layer packet capture for Linux.
//!
//! `ringcap` receives raw packets from an `AF_PACKET` socket through a memory-mapped TPACKET_V3
//! receive ring. Packets are read in place out of the memory the kernel writes them to, and whole
//! blocks of packets are handed back to the kernel once they have been consumed. Where the ring
//! cannot be set up, the same [`Capture`] interface is served by a copying `recvfrom()` backend.
//!
//! ```no_run
//! use ringcap::{drain, open, CaptureConfig, Interface, PacketSocket};
//!
//! # fn main() -> ringcap::Result<()> {
//! let socket = PacketSocket::new()?;
//! socket.bind(Interface::new_raw(b"eth0")?, libc::ETH_P_ALL as u16)?;
//!
//! let mut capture = open(socket, &CaptureConfig::default())?;
//! loop {
//!     capture.socket().poll_readable(None)?;
//!     drain(capture.as_mut(), 64, |packet| {
//!         println!("{:#06x}: {} bytes", packet.protocol(), packet.len());
//!     });
//! }
//! # }
//! ```

// Show required OS/features on docs.rs.
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

#[cfg(target_os = "linux")]
pub mod capture;
#[cfg(target_os = "linux")]
pub mod error;
#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(all(target_os = "linux", feature = "mio"))]
pub mod mio;
#[cfg(all(target_os = "linux", feature = "tokio"))]
pub mod tokio;

#[cfg(target_os = "linux")]
pub use capture::{
    drain, open, open_interface, Capture, CaptureConfig, CaptureMethod, CaptureStats, Packet,
};
#[cfg(target_os = "linux")]
pub use error::{Error, GeometryError, Result, SetupError, SetupStage};
#[cfg(target_os = "linux")]
pub use linux::addr::{LinkAddr, MacAddr, PacketType};
#[cfg(target_os = "linux")]
pub use linux::geometry::RingGeometry;
#[cfg(target_os = "linux")]
pub use linux::mapped::MmapCapture;
#[cfg(target_os = "linux")]
pub use linux::recv::RecvCapture;
#[cfg(target_os = "linux")]
pub use linux::socket::PacketSocket;
#[cfg(target_os = "linux")]
pub use linux::{FrameStatus, PacketStatistics};

use std::ffi::CStr;
use std::fmt;
use std::io;

const INTERNAL_MAX_INTERFACE_NAME_LEN: usize = libc::IF_NAMESIZE - 1;

/// An identifier associated with a particular network device.
///
/// Network interfaces are not guaranteed to be static; network devices can be added and removed,
/// and an interface that once pointed to one device may end up pointing to another during the
/// course of a program's lifetime. In general, an `Interface` should be used soon after it is
/// constructed.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Interface {
    /// The stored name of the interface, always null-terminated.
    name: [u8; Self::MAX_INTERFACE_NAME_LEN + 1],
    is_catchall: bool,
}

impl Interface {
    const ANY: &'static [u8] = b"any";

    /// The maximum length (in bytes) that an interface name can be.
    pub const MAX_INTERFACE_NAME_LEN: usize = INTERNAL_MAX_INTERFACE_NAME_LEN;

    /// A special catch-all interface identifier that captures on all operational interfaces.
    pub fn any() -> Self {
        let mut name = [0u8; Self::MAX_INTERFACE_NAME_LEN + 1];
        name[..Self::ANY.len()].copy_from_slice(Self::ANY);

        Self {
            name,
            is_catchall: true,
        }
    }

    /// Returns an `Interface` corresponding to the given `if_name`, if such an interface exists.
    ///
    /// # Errors
    ///
    /// Returns [InvalidData](io::ErrorKind::InvalidData) if `if_name` is longer than
    /// [`MAX_INTERFACE_NAME_LEN`](Self::MAX_INTERFACE_NAME_LEN) bytes.
    ///
    /// Otherwise, any returned error indicates that `if_name` does not correspond with a valid
    /// interface.
    #[inline]
    pub fn new(if_name: &CStr) -> io::Result<Self> {
        Self::new_raw(if_name.to_bytes())
    }

    /// Returns an `Interface` corresponding to the given `if_name`, if such an interface exists.
    ///
    /// `if_name` must not contain any null bytes, including a terminating one.
    ///
    /// # Errors
    ///
    /// Returns [InvalidData](io::ErrorKind::InvalidData) if `if_name` is too long or contains a
    /// null byte. Otherwise, any returned error indicates that `if_name` does not correspond with
    /// a valid interface.
    pub fn new_raw(if_name: &[u8]) -> io::Result<Self> {
        if if_name.len() > Self::MAX_INTERFACE_NAME_LEN || if_name.contains(&0x00) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "malformed interface name",
            ));
        }

        let mut name = [0u8; Self::MAX_INTERFACE_NAME_LEN + 1];
        name[..if_name.len()].copy_from_slice(if_name);

        let interface = Interface {
            name,
            is_catchall: false,
        };

        interface.index()?;
        Ok(interface)
    }

    /// Returns an `Interface` corresponding to the given interface index.
    ///
    /// An index of `0` denotes the catch-all interface.
    ///
    /// # Errors
    ///
    /// Any returned error indicates that `if_index` does not correspond to a valid interface.
    pub fn from_index(if_index: u32) -> io::Result<Self> {
        if if_index == 0 {
            return Ok(Self::any());
        }

        let mut name = [0u8; Self::MAX_INTERFACE_NAME_LEN + 1];
        match unsafe { libc::if_indextoname(if_index, name.as_mut_ptr() as *mut libc::c_char) } {
            ptr if ptr.is_null() => Err(io::Error::last_os_error()),
            _ => Ok(Self {
                name,
                is_catchall: false,
            }),
        }
    }

    /// The raw index of the network interface (`0` for the catch-all interface).
    #[inline]
    pub fn index(&self) -> io::Result<u32> {
        if self.is_catchall {
            return Ok(0);
        }

        match unsafe { libc::if_nametoindex(self.name.as_ptr() as *const libc::c_char) } {
            0 => Err(io::Error::last_os_error()),
            i => Ok(i),
        }
    }

    /// Indicates whether this is the catch-all interface returned by [`any()`](Self::any).
    #[inline]
    pub fn is_any(&self) -> bool {
        self.is_catchall
    }

    /// The name of the interface.
    pub fn name(&self) -> &CStr {
        // SAFETY: `name` always holds a null byte in its final position.
        unsafe { CStr::from_ptr(self.name.as_ptr() as *const libc::c_char) }
    }

    /// The raw byte name of the interface, including its terminating null byte.
    pub fn name_raw(&self) -> &[u8] {
        self.name().to_bytes_with_nul()
    }
}

impl fmt::Debug for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface")
            .field("name", &self.name())
            .field("is_catchall", &self.is_catchall)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_round_trip() {
        let lo = Interface::new_raw(b"lo").unwrap();
        let index = lo.index().unwrap();
        assert_ne!(index, 0);

        let by_index = Interface::from_index(index).unwrap();
        assert_eq!(by_index.name().to_bytes(), b"lo");
        assert_eq!(by_index.name_raw(), b"lo\0");
    }

    #[test]
    fn catchall_interface() {
        let any = Interface::any();
        assert!(any.is_any());
        assert_eq!(any.index().unwrap(), 0);
        assert_eq!(any.name().to_bytes(), b"any");
        assert_eq!(Interface::from_index(0).unwrap(), any);
    }

    #[test]
    fn rejects_malformed_names() {
        let too_long = [b'a'; Interface::MAX_INTERFACE_NAME_LEN + 1];
        assert_eq!(
            Interface::new_raw(&too_long).unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
        assert_eq!(
            Interface::new_raw(b"e\0th0").unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }
}
