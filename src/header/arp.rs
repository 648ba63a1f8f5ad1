//! ARP for Ethernet/IPv4 (RFC 826).
//!
//! ```text
//!  0      2      4    5    6      8            14      18           24      28
//!  +------+------+----+----+------+------------+-------+------------+-------+
//!  | htype| ptype|hlen|plen| oper |    sha     |  spa  |    tha     |  tpa  |
//!  +------+------+----+----+------+------------+-------+------------+-------+
//! ```

use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::link::MacAddr;

pub const ARP_PACKET_SIZE: usize = 28;

pub const ARP_HWTYPE_ETHERNET: u16 = 1;
pub const ARP_HWSIZE_ETHERNET: u8 = 6;
pub const ARP_PROTOLEN_IPV4: u8 = 4;

pub const ARP_OP_REQUEST: u16 = 1;
pub const ARP_OP_REPLY: u16 = 2;

mod field {
    use std::ops::Range;

    pub const HTYPE: Range<usize> = 0..2;
    pub const PTYPE: Range<usize> = 2..4;
    pub const HLEN: usize = 4;
    pub const PLEN: usize = 5;
    pub const OPER: Range<usize> = 6..8;
    pub const SHA: Range<usize> = 8..14;
    pub const SPA: Range<usize> = 14..18;
    pub const THA: Range<usize> = 18..24;
    pub const TPA: Range<usize> = 24..28;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    pub hw_type: u16,
    pub protocol_type: u16,
    pub hw_size: u8,
    pub protocol_size: u8,
    pub op_code: u16,
    pub source_mac: MacAddr,
    pub source_address: Ipv4Addr,
    pub dest_mac: MacAddr,
    pub dest_address: Ipv4Addr,
}

fn be16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn mac(bytes: &[u8]) -> MacAddr {
    let mut addr = [0u8; 6];
    addr.copy_from_slice(bytes);
    MacAddr(addr)
}

fn ipv4(bytes: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3])
}

impl ArpPacket {
    /// Decodes the fixed fields. Hardware/protocol types and sizes are
    /// returned as found; validating them is up to the caller.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ARP_PACKET_SIZE {
            return Err(Error::Malformed(format!(
                "arp packet of {} bytes",
                bytes.len()
            )));
        }
        Ok(Self {
            hw_type: be16(&bytes[field::HTYPE]),
            protocol_type: be16(&bytes[field::PTYPE]),
            hw_size: bytes[field::HLEN],
            protocol_size: bytes[field::PLEN],
            op_code: be16(&bytes[field::OPER]),
            source_mac: mac(&bytes[field::SHA]),
            source_address: ipv4(&bytes[field::SPA]),
            dest_mac: mac(&bytes[field::THA]),
            dest_address: ipv4(&bytes[field::TPA]),
        })
    }

    pub fn emit(&self) -> [u8; ARP_PACKET_SIZE] {
        let mut buf = [0u8; ARP_PACKET_SIZE];
        buf[field::HTYPE].copy_from_slice(&self.hw_type.to_be_bytes());
        buf[field::PTYPE].copy_from_slice(&self.protocol_type.to_be_bytes());
        buf[field::HLEN] = self.hw_size;
        buf[field::PLEN] = self.protocol_size;
        buf[field::OPER].copy_from_slice(&self.op_code.to_be_bytes());
        buf[field::SHA].copy_from_slice(&self.source_mac.0);
        buf[field::SPA].copy_from_slice(&self.source_address.octets());
        buf[field::THA].copy_from_slice(&self.dest_mac.0);
        buf[field::TPA].copy_from_slice(&self.dest_address.octets());
        buf
    }

    fn ethernet_ipv4(
        op_code: u16,
        source: (MacAddr, Ipv4Addr),
        dest: (MacAddr, Ipv4Addr),
    ) -> Self {
        Self {
            hw_type: ARP_HWTYPE_ETHERNET,
            protocol_type: crate::eth::ETHERTYPE_IPV4,
            hw_size: ARP_HWSIZE_ETHERNET,
            protocol_size: ARP_PROTOLEN_IPV4,
            op_code,
            source_mac: source.0,
            source_address: source.1,
            dest_mac: dest.0,
            dest_address: dest.1,
        }
    }

    pub fn request(source_mac: MacAddr, source_address: Ipv4Addr, target: Ipv4Addr) -> Self {
        Self::ethernet_ipv4(
            ARP_OP_REQUEST,
            (source_mac, source_address),
            (MacAddr::ZERO, target),
        )
    }

    /// Answer to `request` on behalf of `(mac, address)`.
    pub fn reply_to(request: &ArpPacket, mac: MacAddr, address: Ipv4Addr) -> Self {
        Self::ethernet_ipv4(
            ARP_OP_REPLY,
            (mac, address),
            (request.source_mac, request.source_address),
        )
    }
}
