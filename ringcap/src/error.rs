// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types returned while configuring and setting up capture sessions.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::linux::socket::PacketSocket;

/// A ring geometry the kernel would refuse (or that cannot be represented in its request).
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("ring must contain at least one block")]
    NoBlocks,
    #[error("blocks must contain at least one frame")]
    NoFrames,
    #[error("frame size {frame_size} is smaller than the {min}-byte frame header")]
    FrameTooSmall { frame_size: u32, min: usize },
    #[error("frame size {frame_size} is not a multiple of the 16-byte TPACKET alignment")]
    FrameMisaligned { frame_size: u32 },
    #[error("block size {block_size} is not a multiple of the {page_size}-byte page size")]
    BlockNotPageAligned { block_size: u32, page_size: usize },
    #[error("ring dimensions overflow the kernel's request fields")]
    Overflow,
}

/// The step of capture setup that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupStage {
    /// The requested ring geometry was invalid.
    Geometry,
    /// `PACKET_VERSION` was rejected.
    Version,
    /// `PACKET_HDRLEN` could not be queried.
    HeaderLength,
    /// `PACKET_RX_RING` was rejected (commonly `EPERM` or `ENOMEM`).
    RingRequest,
    /// The ring could not be memory-mapped.
    Mapping,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SetupStage::Geometry => "ring geometry validation",
            SetupStage::Version => "packet version negotiation",
            SetupStage::HeaderLength => "frame header length query",
            SetupStage::RingRequest => "ring allocation",
            SetupStage::Mapping => "ring mapping",
        })
    }
}

/// A capture backend could not be set up on a socket.
///
/// Nothing of the failed backend outlives this error: any mapping made before the failure has
/// already been released. The socket is handed back through [`into_socket()`](Self::into_socket)
/// so that the caller can retry with a different backend.
#[derive(Debug, Error)]
#[error("capture setup failed during {stage}")]
pub struct SetupError {
    stage: SetupStage,
    #[source]
    source: io::Error,
    socket: PacketSocket,
}

impl SetupError {
    #[inline]
    pub(crate) fn new(stage: SetupStage, source: io::Error, socket: PacketSocket) -> Self {
        Self {
            stage,
            source,
            socket,
        }
    }

    /// The setup step that failed.
    #[inline]
    pub fn stage(&self) -> SetupStage {
        self.stage
    }

    /// The OS error that caused the failure.
    #[inline]
    pub fn io_error(&self) -> &io::Error {
        &self.source
    }

    /// Recovers the socket the failed setup was attempted on.
    #[inline]
    pub fn into_socket(self) -> PacketSocket {
        self.socket
    }
}

/// Errors returned from the crate's top-level entry points.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error("invalid ring geometry: {0}")]
    Geometry(#[from] GeometryError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<GeometryError> for io::Error {
    #[inline]
    fn from(value: GeometryError) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_error_into_io() {
        let err: io::Error = GeometryError::NoBlocks.into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(err.to_string(), "ring must contain at least one block");
    }

    #[test]
    fn stage_display() {
        assert_eq!(SetupStage::RingRequest.to_string(), "ring allocation");
        assert_eq!(SetupStage::Mapping.to_string(), "ring mapping");
    }
}
