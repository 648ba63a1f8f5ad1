//! Ethernet II framing and the IPv4 glue between the link and TCP.

use std::net::Ipv4Addr;
use std::sync::Arc;

use etherparse::{ip_number, Ethernet2Header, Ethernet2HeaderSlice};

use crate::arp::Arp;
use crate::error::{Error, Result};
use crate::header::ip::{Ipv4HeaderBuilder, Ipv4Packet};
use crate::link::{Link, MacAddr};
use crate::tcp::{SegmentSink, Tcp};

pub const ETHERNET_HEADER_SIZE: usize = 14;
pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

pub fn encode_frame(
    destination: MacAddr,
    source: MacAddr,
    ether_type: u16,
    payload: &[u8],
) -> Result<Vec<u8>> {
    let header = Ethernet2Header {
        destination: destination.0,
        source: source.0,
        ether_type,
    };
    let mut frame = Vec::with_capacity(ETHERNET_HEADER_SIZE + payload.len());
    header.write(&mut frame).map_err(Error::encode)?;
    frame.extend_from_slice(payload);
    Ok(frame)
}

#[derive(Debug)]
pub struct Frame<'a> {
    pub destination: MacAddr,
    pub source: MacAddr,
    pub ether_type: u16,
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let header = Ethernet2HeaderSlice::from_slice(bytes).map_err(Error::malformed)?;
        Ok(Self {
            destination: MacAddr(header.destination()),
            source: MacAddr(header.source()),
            ether_type: header.ether_type(),
            payload: &bytes[header.slice().len()..],
        })
    }
}

/// Demultiplexes inbound frames to ARP and TCP.
pub struct FrameCodec {
    link: Arc<dyn Link>,
    arp: Arc<Arp>,
    tcp: Arc<Tcp>,
}

impl FrameCodec {
    pub fn new(link: Arc<dyn Link>, arp: Arc<Arp>, tcp: Arc<Tcp>) -> Self {
        Self { link, arp, tcp }
    }

    /// Handles one frame. Anything we cannot use is logged and dropped.
    pub fn receive(&self, bytes: &[u8]) {
        let frame = match Frame::parse(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!("dropping frame: {}", e);
                return;
            }
        };
        if frame.destination != self.link.mac() && !frame.destination.is_broadcast() {
            log::trace!("frame for {} is not ours", frame.destination);
            return;
        }

        match frame.ether_type {
            ETHERTYPE_ARP => {
                if let Err(e) = self.arp.process(self.link.as_ref(), frame.payload) {
                    log::debug!("arp from {}: {}", frame.source, e);
                }
            }
            ETHERTYPE_IPV4 => self.receive_ipv4(frame.payload),
            other => log::trace!("ignoring ethertype {:#06x}", other),
        }
    }

    fn receive_ipv4(&self, bytes: &[u8]) {
        let packet = match Ipv4Packet::parse(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                log::debug!("dropping ipv4 packet: {}", e);
                return;
            }
        };
        if packet.destination != self.link.ipv4() {
            log::trace!("ipv4 packet for {} is not ours", packet.destination);
            return;
        }

        match packet.protocol {
            ip_number::TCP => {
                self.tcp
                    .process_segment(packet.source, packet.destination, packet.payload)
            }
            other => log::debug!("unsupported ip protocol {} from {}", other, packet.source),
        }
    }
}

/// Sends TCP segments as IPv4 packets, resolving the next hop through ARP.
pub struct Ipv4Output {
    link: Arc<dyn Link>,
    arp: Arc<Arp>,
}

impl Ipv4Output {
    pub fn new(link: Arc<dyn Link>, arp: Arc<Arp>) -> Self {
        Self { link, arp }
    }
}

impl SegmentSink for Ipv4Output {
    fn emit(&self, source: Ipv4Addr, destination: Ipv4Addr, segment: &[u8]) -> Result<()> {
        let Some(mac) = self.arp.lookup(destination) else {
            // the segment is lost; retransmission recovers once the reply
            // is in the cache
            log::debug!("no hardware address for {}, sending arp request", destination);
            return self.arp.request(self.link.as_ref(), destination);
        };
        let packet = Ipv4HeaderBuilder::tcp(source, destination).encode(segment)?;
        self.link.send_frame(mac, ETHERTYPE_IPV4, &packet)
    }
}
