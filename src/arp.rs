//! Address resolution: a bounded (protocol, address) -> MAC cache and the
//! request/reply handling around it.

use std::net::Ipv4Addr;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::eth::{ETHERTYPE_ARP, ETHERTYPE_IPV4};
use crate::header::arp::{
    ArpPacket, ARP_HWSIZE_ETHERNET, ARP_HWTYPE_ETHERNET, ARP_OP_REPLY, ARP_OP_REQUEST,
    ARP_PROTOLEN_IPV4,
};
use crate::link::{Link, MacAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpEntry {
    pub protocol_type: u16,
    pub address: Ipv4Addr,
    pub mac: MacAddr,
}

/// Fixed number of slots, filled first-free. Nothing is ever evicted; once
/// full, new neighbours are not learned.
#[derive(Debug)]
pub struct ArpCache {
    slots: Vec<Option<ArpEntry>>,
}

impl ArpCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find(&self, protocol_type: u16, address: Ipv4Addr) -> Option<usize> {
        self.slots.iter().position(|slot| {
            matches!(slot, Some(entry) if entry.protocol_type == protocol_type && entry.address == address)
        })
    }

    pub fn lookup(&self, protocol_type: u16, address: Ipv4Addr) -> Option<MacAddr> {
        self.find(protocol_type, address)
            .and_then(|i| self.slots[i])
            .map(|entry| entry.mac)
    }

    /// Refreshes an existing mapping in place, otherwise takes the first
    /// free slot.
    pub fn insert(&mut self, protocol_type: u16, address: Ipv4Addr, mac: MacAddr) -> Result<()> {
        let entry = ArpEntry {
            protocol_type,
            address,
            mac,
        };
        if let Some(i) = self.find(protocol_type, address) {
            self.slots[i] = Some(entry);
            return Ok(());
        }
        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(entry);
                Ok(())
            }
            None => Err(Error::CacheFull {
                capacity: self.capacity(),
            }),
        }
    }
}

/// Resolver shared by the inbound frame path and the outbound IPv4 path.
#[derive(Debug)]
pub struct Arp {
    cache: Mutex<ArpCache>,
}

impl Arp {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(ArpCache::new(capacity)),
        }
    }

    pub fn lookup(&self, address: Ipv4Addr) -> Option<MacAddr> {
        self.cache.lock().lookup(ETHERTYPE_IPV4, address)
    }

    pub fn insert(&self, address: Ipv4Addr, mac: MacAddr) -> Result<()> {
        self.cache.lock().insert(ETHERTYPE_IPV4, address, mac)
    }

    /// Broadcasts a who-has for `target`.
    pub fn request(&self, link: &dyn Link, target: Ipv4Addr) -> Result<()> {
        let request = ArpPacket::request(link.mac(), link.ipv4(), target);
        link.send_frame(MacAddr::BROADCAST, ETHERTYPE_ARP, &request.emit())
    }

    /// Handles one inbound ARP packet: learns the sender and answers
    /// requests for our address. Unsupported packets are reported as
    /// `Error::Malformed`.
    pub fn process(&self, link: &dyn Link, payload: &[u8]) -> Result<()> {
        let packet = ArpPacket::parse(payload)?;

        if packet.op_code != ARP_OP_REQUEST && packet.op_code != ARP_OP_REPLY {
            return Err(Error::Malformed(format!(
                "unknown ARP OP code: {}",
                packet.op_code
            )));
        }
        if packet.hw_type != ARP_HWTYPE_ETHERNET {
            return Err(Error::Malformed(format!(
                "ARP hardware type unsupported: {:#x}",
                packet.hw_type
            )));
        }
        if packet.hw_size != ARP_HWSIZE_ETHERNET {
            return Err(Error::Malformed(format!(
                "ARP hardware address size mismatch: {}",
                packet.hw_size
            )));
        }
        if packet.protocol_type != ETHERTYPE_IPV4 {
            return Err(Error::Malformed(format!(
                "only IPv4 addresses are supported, requested: {:#x}",
                packet.protocol_type
            )));
        }
        if packet.protocol_size != ARP_PROTOLEN_IPV4 {
            return Err(Error::Malformed(format!(
                "IPv4 address size mismatch: {}",
                packet.protocol_size
            )));
        }

        if let Err(e) = self.insert(packet.source_address, packet.source_mac) {
            log::warn!("not learning {}: {}", packet.source_address, e);
        }

        if packet.dest_address != link.ipv4() {
            log::trace!("arp for {} is not for us", packet.dest_address);
            return Ok(());
        }
        if packet.op_code == ARP_OP_REPLY {
            log::debug!("learned {} is at {}", packet.source_address, packet.source_mac);
            return Ok(());
        }

        log::debug!(
            "arp reply to {} ({})",
            packet.source_address,
            packet.source_mac
        );
        let reply = ArpPacket::reply_to(&packet, link.mac(), link.ipv4());
        link.send_frame(packet.source_mac, ETHERTYPE_ARP, &reply.emit())
    }
}
