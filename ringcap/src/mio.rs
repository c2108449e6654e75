// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Registering capture backends with a `mio` event loop.
//!
//! A capture is readable once a ring block (or a queued packet, for the copying backend) is
//! waiting. Readiness events from `mio` are edge-triggered, so drain with
//! [`drain()`](crate::capture::drain) until it reports zero packets before polling again.

use std::io;
use std::os::fd::AsRawFd;

use ::mio::event::Source;
use ::mio::unix::SourceFd;
use ::mio::{Interest, Registry, Token};

use crate::capture::Capture;
use crate::linux::mapped::MmapCapture;
use crate::linux::recv::RecvCapture;

macro_rules! impl_source {
    ($($ty:ty),*) => {
        $(
            impl Source for $ty {
                fn register(
                    &mut self,
                    registry: &Registry,
                    token: Token,
                    interests: Interest,
                ) -> io::Result<()> {
                    SourceFd(&self.as_raw_fd()).register(registry, token, interests)
                }

                fn reregister(
                    &mut self,
                    registry: &Registry,
                    token: Token,
                    interests: Interest,
                ) -> io::Result<()> {
                    SourceFd(&self.as_raw_fd()).reregister(registry, token, interests)
                }

                fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
                    SourceFd(&self.as_raw_fd()).deregister(registry)
                }
            }
        )*
    };
}

impl_source!(MmapCapture, RecvCapture, dyn Capture);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{drain, open, CaptureConfig, CaptureMethod};
    use crate::linux::socket::PacketSocket;
    use ::mio::{Events, Poll};
    use std::os::fd::FromRawFd;
    use std::time::Duration;

    #[test]
    fn readable_when_packets_queue() {
        let mut fds = [0 as libc::c_int; 2];
        let ret = unsafe {
            libc::socketpair(libc::AF_UNIX, libc::SOCK_DGRAM, 0, fds.as_mut_ptr())
        };
        assert_eq!(ret, 0);

        let socket = unsafe { PacketSocket::from_raw_fd(fds[0]) };
        let config = CaptureConfig {
            method: CaptureMethod::Recv,
            ..CaptureConfig::default()
        };
        let mut capture = open(socket, &config).unwrap();

        let mut poll = Poll::new().unwrap();
        let mut events = Events::with_capacity(4);
        poll.registry()
            .register(&mut capture, Token(7), Interest::READABLE)
            .unwrap();

        poll.poll(&mut events, Some(Duration::from_millis(10)))
            .unwrap();
        assert!(events.is_empty());

        let data = [1u8, 2, 3];
        let sent = unsafe { libc::send(fds[1], data.as_ptr() as *const libc::c_void, 3, 0) };
        assert_eq!(sent, 3);

        poll.poll(&mut events, Some(Duration::from_secs(1))).unwrap();
        assert!(events.iter().any(|e| e.token() == Token(7) && e.is_readable()));
        assert_eq!(drain(capture.as_mut(), 16, |p| assert_eq!(p.data(), &data)), 1);

        poll.registry().deregister(&mut capture).unwrap();
        unsafe { libc::close(fds[1]) };
    }
}
