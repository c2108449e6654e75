// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::fmt::{self, Debug, Display};
use std::str::FromStr;

use thiserror::Error;

use super::{
    PACKET_BROADCAST, PACKET_HOST, PACKET_KERNEL, PACKET_LOOPBACK, PACKET_MULTICAST,
    PACKET_OTHERHOST, PACKET_OUTGOING, PACKET_USER, SLL_ADDR, SLL_HALEN, SLL_HATYPE, SLL_IFINDEX,
    SLL_PKTTYPE, SLL_PROTOCOL, SOCKADDR_LL_LEN,
};

/// A Media Access Control (MAC) address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr {
    addr: [u8; 6],
}

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr { addr: [0xff; 6] };

    #[inline]
    pub fn octets(&self) -> [u8; 6] {
        self.addr
    }
}

impl From<[u8; 6]> for MacAddr {
    #[inline]
    fn from(value: [u8; 6]) -> Self {
        Self { addr: value }
    }
}

impl From<MacAddr> for [u8; 6] {
    #[inline]
    fn from(value: MacAddr) -> Self {
        value.addr
    }
}

impl Debug for MacAddr {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MacAddr").field(&format_args!("{}", self)).finish()
    }
}

impl Display for MacAddr {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.addr[0], self.addr[1], self.addr[2], self.addr[3], self.addr[4], self.addr[5]
        )
    }
}

/// A string could not be parsed as a [`MacAddr`].
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum MacAddrParseError {
    #[error("invalid length MAC address")]
    InvalidLength,
    #[error("invalid character in MAC address: expected colon/dash")]
    InvalidDelimiter,
    #[error("invalid character in MAC address: expected hexadecimal value")]
    InvalidHex,
}

#[inline]
fn hex_value(b: u8) -> Result<u8, MacAddrParseError> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(10 + (b - b'a')),
        b'A'..=b'F' => Ok(10 + (b - b'A')),
        _ => Err(MacAddrParseError::InvalidHex),
    }
}

impl FromStr for MacAddr {
    type Err = MacAddrParseError;

    /// Parses `XX:XX:XX:XX:XX:XX`, `XX-XX-XX-XX-XX-XX` or unseparated `XXXXXXXXXXXX`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut addr = [0u8; 6];
        let bytes = s.as_bytes();

        if let Some(delim @ (b':' | b'-')) = bytes.get(2) {
            if bytes.len() != 17 {
                return Err(MacAddrParseError::InvalidLength);
            }

            for (idx, chunk) in bytes.chunks(3).enumerate() {
                if let Some(sep) = chunk.get(2) {
                    if sep != delim {
                        return Err(MacAddrParseError::InvalidDelimiter);
                    }
                }
                addr[idx] = (hex_value(chunk[0])? << 4) | hex_value(chunk[1])?;
            }
        } else {
            if bytes.len() != 12 {
                return Err(MacAddrParseError::InvalidLength);
            }

            for (idx, pair) in bytes.chunks(2).enumerate() {
                addr[idx] = (hex_value(pair[0])? << 4) | hex_value(pair[1])?;
            }
        }

        Ok(Self { addr })
    }
}

/// The direction/class of a captured packet relative to the capturing host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketType {
    /// Addressed to the local host.
    Host,
    /// Link-layer broadcast.
    Broadcast,
    /// Link-layer multicast.
    Multicast,
    /// Addressed to another host (seen in promiscuous mode).
    OtherHost,
    /// Sent by the local host.
    Outgoing,
    Loopback,
    User,
    Kernel,
    Unknown(u8),
}

impl From<u8> for PacketType {
    #[inline]
    fn from(value: u8) -> Self {
        match value {
            PACKET_HOST => PacketType::Host,
            PACKET_BROADCAST => PacketType::Broadcast,
            PACKET_MULTICAST => PacketType::Multicast,
            PACKET_OTHERHOST => PacketType::OtherHost,
            PACKET_OUTGOING => PacketType::Outgoing,
            PACKET_LOOPBACK => PacketType::Loopback,
            PACKET_USER => PacketType::User,
            PACKET_KERNEL => PacketType::Kernel,
            other => PacketType::Unknown(other),
        }
    }
}

/// The link-layer address information the kernel attaches to a captured packet.
///
/// This is a decoded `sockaddr_ll`. The protocol is stored in host byte order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkAddr {
    protocol: u16,
    if_index: u32,
    hatype: u16,
    pkttype: u8,
    halen: u8,
    addr: [u8; 8],
}

impl LinkAddr {
    /// Decodes the raw bytes of a `sockaddr_ll`, converting the protocol from network order.
    pub(crate) fn from_raw(raw: &[u8; SOCKADDR_LL_LEN]) -> Self {
        let mut addr = [0u8; 8];
        addr.copy_from_slice(&raw[SLL_ADDR..SLL_ADDR + 8]);

        LinkAddr {
            protocol: u16::from_be_bytes([raw[SLL_PROTOCOL], raw[SLL_PROTOCOL + 1]]),
            if_index: i32::from_ne_bytes([
                raw[SLL_IFINDEX],
                raw[SLL_IFINDEX + 1],
                raw[SLL_IFINDEX + 2],
                raw[SLL_IFINDEX + 3],
            ]) as u32,
            hatype: u16::from_ne_bytes([raw[SLL_HATYPE], raw[SLL_HATYPE + 1]]),
            pkttype: raw[SLL_PKTTYPE],
            halen: raw[SLL_HALEN].min(8),
            addr,
        }
    }

    /// The link-layer protocol (EtherType) of the packet, in host byte order.
    #[inline]
    pub fn protocol(&self) -> u16 {
        self.protocol
    }

    /// The index of the interface the packet was captured on.
    #[inline]
    pub fn if_index(&self) -> u32 {
        self.if_index
    }

    /// The ARP hardware type of the interface (e.g. `ARPHRD_ETHER`).
    #[inline]
    pub fn hardware_type(&self) -> u16 {
        self.hatype
    }

    #[inline]
    pub fn packet_type(&self) -> PacketType {
        PacketType::from(self.pkttype)
    }

    /// The source hardware address of the packet.
    #[inline]
    pub fn hardware_addr(&self) -> &[u8] {
        &self.addr[..self.halen as usize]
    }

    /// The source hardware address as a MAC address, if it is six bytes long.
    #[inline]
    pub fn mac_addr(&self) -> Option<MacAddr> {
        let octets: [u8; 6] = self.hardware_addr().try_into().ok()?;
        Some(MacAddr::from(octets))
    }
}

impl From<&libc::sockaddr_ll> for LinkAddr {
    fn from(value: &libc::sockaddr_ll) -> Self {
        LinkAddr {
            protocol: u16::from_be(value.sll_protocol),
            if_index: value.sll_ifindex as u32,
            hatype: value.sll_hatype,
            pkttype: value.sll_pkttype,
            halen: value.sll_halen.min(8),
            addr: value.sll_addr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_parse_and_display() {
        let mac: MacAddr = "00:1b:21:3A:4c:5D".parse().unwrap();
        assert_eq!(mac.octets(), [0x00, 0x1b, 0x21, 0x3a, 0x4c, 0x5d]);
        assert_eq!(mac.to_string(), "00:1B:21:3A:4C:5D");

        let dashed: MacAddr = "00-1b-21-3a-4c-5d".parse().unwrap();
        assert_eq!(dashed, mac);

        let bare: MacAddr = "001b213a4c5d".parse().unwrap();
        assert_eq!(bare, mac);
    }

    #[test]
    fn mac_parse_errors() {
        assert_eq!(
            "00:1b:21:3a:4c".parse::<MacAddr>(),
            Err(MacAddrParseError::InvalidLength)
        );
        assert_eq!(
            "00:1b-21:3a:4c:5d".parse::<MacAddr>(),
            Err(MacAddrParseError::InvalidDelimiter)
        );
        assert_eq!(
            "00:1b:21:3a:4c:5g".parse::<MacAddr>(),
            Err(MacAddrParseError::InvalidHex)
        );
    }

    #[test]
    fn link_addr_from_raw() {
        let mut raw = [0u8; SOCKADDR_LL_LEN];
        raw[0..2].copy_from_slice(&(libc::AF_PACKET as u16).to_ne_bytes());
        raw[SLL_PROTOCOL..SLL_PROTOCOL + 2].copy_from_slice(&0x0800u16.to_be_bytes());
        raw[SLL_IFINDEX..SLL_IFINDEX + 4].copy_from_slice(&3i32.to_ne_bytes());
        raw[SLL_HATYPE..SLL_HATYPE + 2].copy_from_slice(&libc::ARPHRD_ETHER.to_ne_bytes());
        raw[SLL_PKTTYPE] = PACKET_BROADCAST;
        raw[SLL_HALEN] = 6;
        raw[SLL_ADDR..SLL_ADDR + 6].copy_from_slice(&[1, 2, 3, 4, 5, 6]);

        let addr = LinkAddr::from_raw(&raw);
        assert_eq!(addr.protocol(), 0x0800);
        assert_eq!(addr.if_index(), 3);
        assert_eq!(addr.hardware_type(), libc::ARPHRD_ETHER);
        assert_eq!(addr.packet_type(), PacketType::Broadcast);
        assert_eq!(addr.hardware_addr(), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(addr.mac_addr(), Some(MacAddr::from([1, 2, 3, 4, 5, 6])));
    }

    #[test]
    fn oversized_halen_is_clamped() {
        let mut raw = [0u8; SOCKADDR_LL_LEN];
        raw[SLL_HALEN] = 200;
        let addr = LinkAddr::from_raw(&raw);
        assert_eq!(addr.hardware_addr().len(), 8);
        assert_eq!(addr.mac_addr(), None);
    }
}
