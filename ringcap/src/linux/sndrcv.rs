// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use bitflags::bitflags;

bitflags! {
    /// Flags to modify a call to `recv_from()`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct RecvFlags: libc::c_int {
        /// Causes `recv()` to return immediately if no datagrams are ready to be read (nonblocking).
        const DONT_WAIT = libc::MSG_DONTWAIT;
        /// Causes `recv()` to return a datagram without removing that datagram from the recv queue.
        const PEEK = libc::MSG_PEEK;
        /// Causes `recv()` to return the real length of the packet when truncated.
        const TRUNC = libc::MSG_TRUNC;
    }
}
