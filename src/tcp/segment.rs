use std::net::{Ipv4Addr, SocketAddrV4};

use etherparse::TcpHeader;

use super::Quad;
use crate::error::{Error, Result};
use crate::header::{TcpFlags, TcpOptions};

/// An inbound segment whose checksum has been verified.
#[derive(Debug)]
pub struct Segment<'a> {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub header: TcpHeader,
    pub options: TcpOptions,
    pub payload: &'a [u8],
}

impl<'a> Segment<'a> {
    pub fn parse(source: Ipv4Addr, destination: Ipv4Addr, bytes: &'a [u8]) -> Result<Self> {
        let (header, payload) = TcpHeader::from_slice(bytes).map_err(Error::malformed)?;

        let expected = header
            .calc_checksum_ipv4_raw(source.octets(), destination.octets(), payload)
            .map_err(Error::malformed)?;
        if expected != header.checksum {
            return Err(Error::Malformed(format!(
                "tcp checksum {:#06x}, expected {:#06x}",
                header.checksum, expected
            )));
        }

        let options = TcpOptions::parse(&header);
        Ok(Self {
            source,
            destination,
            header,
            options,
            payload,
        })
    }

    pub fn flags(&self) -> TcpFlags {
        TcpFlags::of(&self.header)
    }

    pub fn seq(&self) -> u32 {
        self.header.sequence_number
    }

    pub fn ack(&self) -> u32 {
        self.header.acknowledgment_number
    }

    pub fn window(&self) -> u16 {
        self.header.window_size
    }

    pub fn urgent_pointer(&self) -> u16 {
        self.header.urgent_pointer
    }

    pub fn source_port(&self) -> u16 {
        self.header.source_port
    }

    pub fn destination_port(&self) -> u16 {
        self.header.destination_port
    }

    /// SEG.LEN: payload plus one for each of SYN and FIN.
    pub fn len(&self) -> u32 {
        self.payload.len() as u32 + self.header.syn as u32 + self.header.fin as u32
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The connection this segment belongs to, seen from our side.
    pub fn quad(&self) -> Quad {
        Quad {
            local: SocketAddrV4::new(self.destination, self.destination_port()),
            remote: SocketAddrV4::new(self.source, self.source_port()),
        }
    }
}
