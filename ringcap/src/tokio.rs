// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Waiting for packets on a `tokio` runtime.

use std::io;
use std::os::fd::{AsRawFd, RawFd};

use ::tokio::io::unix::AsyncFd;

use crate::capture::{drain, Capture, Packet};

/// The capture's descriptor, registered with the reactor without taking ownership of it.
struct CaptureFd(RawFd);

impl AsRawFd for CaptureFd {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// A capture backend whose readiness is driven by the `tokio` reactor.
pub struct AsyncCapture {
    // Deregistered before `capture` closes the descriptor.
    io: AsyncFd<CaptureFd>,
    capture: Box<dyn Capture>,
}

impl AsyncCapture {
    /// Registers `capture` with the current runtime's reactor.
    ///
    /// Must be called from within a `tokio` runtime.
    pub fn new(capture: Box<dyn Capture>) -> io::Result<Self> {
        let io = AsyncFd::new(CaptureFd(capture.as_raw_fd()))?;
        Ok(AsyncCapture { io, capture })
    }

    /// Waits until a packet is ready to be retrieved.
    pub async fn ready(&mut self) -> io::Result<()> {
        loop {
            if self.capture.has_packet() {
                return Ok(());
            }

            let mut guard = self.io.readable().await?;
            if self.capture.has_packet() {
                return Ok(());
            }
            guard.clear_ready();
        }
    }

    /// Waits for the next packet and retrieves it.
    ///
    /// The packet must be acknowledged with [`put_packet()`](Self::put_packet) before the next
    /// one can be retrieved.
    pub async fn get_packet(&mut self) -> io::Result<Packet<'_>> {
        self.ready().await?;
        self.capture
            .get_packet()
            .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))
    }

    #[inline]
    pub fn put_packet(&mut self) {
        self.capture.put_packet();
    }

    /// Waits for traffic, then hands up to `budget` ready packets to `f`.
    pub async fn drain<F>(&mut self, budget: usize, f: F) -> io::Result<usize>
    where
        F: FnMut(&Packet<'_>),
    {
        self.ready().await?;
        Ok(drain(self.capture.as_mut(), budget, f))
    }

    #[inline]
    pub fn capture(&self) -> &dyn Capture {
        self.capture.as_ref()
    }

    #[inline]
    pub fn capture_mut(&mut self) -> &mut dyn Capture {
        self.capture.as_mut()
    }

    /// Deregisters the capture from the reactor and returns it.
    pub fn into_inner(self) -> Box<dyn Capture> {
        let AsyncCapture { io, capture } = self;
        drop(io.into_inner());
        capture
    }
}

impl AsRawFd for AsyncCapture {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.capture.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{open, CaptureConfig, CaptureMethod};
    use crate::linux::socket::PacketSocket;
    use std::os::fd::FromRawFd;
    use std::time::Duration;

    fn recv_capture() -> (AsyncCapture, libc::c_int) {
        let mut fds = [0 as libc::c_int; 2];
        let ret = unsafe {
            libc::socketpair(
                libc::AF_UNIX,
                libc::SOCK_DGRAM | libc::SOCK_NONBLOCK,
                0,
                fds.as_mut_ptr(),
            )
        };
        assert_eq!(ret, 0);

        let socket = unsafe { PacketSocket::from_raw_fd(fds[0]) };
        let config = CaptureConfig {
            method: CaptureMethod::Recv,
            ..CaptureConfig::default()
        };
        let capture = open(socket, &config).unwrap();
        (AsyncCapture::new(capture).unwrap(), fds[1])
    }

    #[::tokio::test]
    async fn wakes_on_traffic() {
        let (mut capture, peer) = recv_capture();

        let pending =
            ::tokio::time::timeout(Duration::from_millis(20), capture.ready()).await;
        assert!(pending.is_err());

        let data = [7u8; 16];
        let sent = unsafe { libc::send(peer, data.as_ptr() as *const libc::c_void, data.len(), 0) };
        assert_eq!(sent, 16);

        let packet = capture.get_packet().await.unwrap();
        assert_eq!(packet.data(), &data);
        capture.put_packet();

        assert_eq!(capture.capture().stats().packets(), 1);
        unsafe { libc::close(peer) };
    }
}
