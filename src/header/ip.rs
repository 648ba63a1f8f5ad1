use std::net::Ipv4Addr;

use etherparse::{ip_number::TCP, Ipv4Header, Ipv4HeaderSlice};

use crate::error::{Error, Result};

pub const IP_HEADER_SIZE: usize = 20;
pub const DEFAULT_TTL: u8 = 64;

#[derive(Debug)]
pub struct Ipv4HeaderBuilder {
    ttl: u8,
    protocol: u8,
    source: Ipv4Addr,
    destination: Ipv4Addr,
}

impl Ipv4HeaderBuilder {
    pub fn new(source: Ipv4Addr, destination: Ipv4Addr, protocol: u8, ttl: u8) -> Self {
        Self {
            ttl,
            protocol,
            source,
            destination,
        }
    }

    pub fn tcp(source: Ipv4Addr, destination: Ipv4Addr) -> Self {
        Self::new(source, destination, TCP, DEFAULT_TTL)
    }

    pub fn build(&self, payload_len: usize) -> Result<Ipv4Header> {
        let payload_len = u16::try_from(payload_len)
            .map_err(|_| Error::Encode(format!("ip payload of {payload_len} bytes")))?;
        Ok(Ipv4Header::new(
            payload_len,
            self.ttl,
            self.protocol,
            self.source.octets(),
            self.destination.octets(),
        ))
    }

    /// Header followed by `payload`. The header checksum is filled in on
    /// write.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let header = self.build(payload.len())?;
        let mut buf = Vec::with_capacity(IP_HEADER_SIZE + payload.len());
        header.write(&mut buf).map_err(Error::encode)?;
        buf.extend_from_slice(payload);
        Ok(buf)
    }
}

/// A validated, unfragmented IPv4 packet.
#[derive(Debug)]
pub struct Ipv4Packet<'a> {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub protocol: u8,
    pub payload: &'a [u8],
}

impl<'a> Ipv4Packet<'a> {
    /// Checks version, lengths and header checksum, and rejects fragments.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let header = Ipv4HeaderSlice::from_slice(bytes).map_err(Error::malformed)?;

        let expected = header
            .to_header()
            .calc_header_checksum()
            .map_err(Error::malformed)?;
        if expected != header.header_checksum() {
            return Err(Error::Malformed(format!(
                "ipv4 header checksum {:#06x}, expected {:#06x}",
                header.header_checksum(),
                expected
            )));
        }

        if header.more_fragments() || header.fragments_offset() != 0 {
            return Err(Error::Malformed("ipv4 fragments are not supported".into()));
        }

        let header_len = header.slice().len();
        let total_len = header.total_len() as usize;
        if total_len < header_len || total_len > bytes.len() {
            return Err(Error::Malformed(format!(
                "ipv4 total length {total_len} with {} bytes available",
                bytes.len()
            )));
        }

        Ok(Self {
            source: header.source_addr(),
            destination: header.destination_addr(),
            protocol: header.protocol(),
            payload: &bytes[header_len..total_len],
        })
    }
}
