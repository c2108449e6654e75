// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Copying capture through one `recvfrom()` per packet.
//!
//! Used wherever a memory-mapped ring is unavailable (older kernels, restricted sandboxes, or
//! when ring allocation fails under memory pressure).

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::addr::LinkAddr;
use super::sndrcv::RecvFlags;
use super::socket::PacketSocket;
use crate::capture::{Capture, CaptureConfig, CaptureMethod, CaptureStats, FrameInfo, Packet};
use crate::error::SetupError;

#[derive(Clone, Copy, Debug)]
struct Received {
    /// Bytes of the packet held in the buffer.
    captured: usize,
    /// Length of the packet as queued on the socket.
    wire_len: usize,
    addr: LinkAddr,
    timestamp: Option<Duration>,
}

/// A capture session that copies each packet out of the socket into a private buffer.
pub struct RecvCapture {
    socket: PacketSocket,
    buf: Vec<u8>,
    current: Option<Received>,
    closed: bool,
    stats: CaptureStats,
}

impl RecvCapture {
    /// The largest number of bytes retained for each packet.
    #[inline]
    pub fn snap_len(&self) -> usize {
        self.buf.len()
    }

    /// Pulls the next queued packet off the socket without blocking.
    fn recv_next(&mut self) -> Option<Received> {
        match self
            .socket
            .recv_from(&mut self.buf, RecvFlags::DONT_WAIT | RecvFlags::TRUNC)
        {
            Ok((len, addr)) => {
                if len > self.buf.len() {
                    log::trace!("truncated {}-byte packet to {} bytes", len, self.buf.len());
                }

                Some(Received {
                    captured: len.min(self.buf.len()),
                    wire_len: len,
                    addr,
                    timestamp: SystemTime::now().duration_since(UNIX_EPOCH).ok(),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => None,
            Err(e) => {
                log::debug!("recvfrom() on packet socket failed: {}", e);
                None
            }
        }
    }
}

impl Capture for RecvCapture {
    /// Allocates a receive buffer of `config.snap_len` bytes (at least one).
    ///
    /// This backend needs nothing from the kernel beyond a readable socket, so setup never fails.
    fn setup(socket: PacketSocket, config: &CaptureConfig) -> Result<Self, SetupError> {
        let snap_len = config.snap_len.max(1);
        log::info!("capturing with recvfrom() ({}-byte snap length)", snap_len);

        Ok(RecvCapture {
            socket,
            buf: vec![0u8; snap_len],
            current: None,
            closed: false,
            stats: CaptureStats::default(),
        })
    }

    fn has_packet(&mut self) -> bool {
        if self.closed {
            return false;
        }

        if self.current.is_none() {
            self.current = self.recv_next();
        }

        self.current.is_some()
    }

    fn get_packet(&mut self) -> Option<Packet<'_>> {
        if !self.has_packet() {
            return None;
        }

        let received = self.current?;
        let info = FrameInfo {
            timestamp: received.timestamp,
            wire_len: received.wire_len,
            ..FrameInfo::default()
        };

        Some(Packet::new(
            &self.buf[..received.captured],
            received.addr,
            info,
        ))
    }

    #[inline]
    fn put_packet(&mut self) {
        if self.current.take().is_some() {
            self.stats.packets += 1;
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.current = None;
            self.buf = Vec::new();
        }
    }

    #[inline]
    fn method(&self) -> CaptureMethod {
        CaptureMethod::Recv
    }

    #[inline]
    fn stats(&self) -> CaptureStats {
        self.stats
    }

    #[inline]
    fn socket(&self) -> &PacketSocket {
        &self.socket
    }
}

impl AsRawFd for RecvCapture {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}
