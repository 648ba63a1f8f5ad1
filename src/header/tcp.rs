use std::net::Ipv4Addr;

use bitflags::bitflags;
use etherparse::{TcpHeader, TcpOptionElement};

use crate::error::{Error, Result};

/// Fixed part of the TCP header.
pub const TCP_HEADER_SIZE: usize = 20;
/// Largest options block we ever emit.
pub const TCP_OPTS_MAXLEN: usize = 32;

pub const TCP_OPTIONS_END: u8 = 0;
pub const TCP_OPTIONS_NOOP: u8 = 1;
pub const TCP_OPTIONS_MSS: u8 = 2;
pub const TCP_OPTIONS_WSCALE: u8 = 3;
pub const TCP_OPTIONS_SACK_PERMITTED: u8 = 4;
pub const TCP_OPTIONS_SACK: u8 = 5;
pub const TCP_OPTIONS_TIMESTAMP: u8 = 8;

bitflags! {
    /// Control bits, in the order they appear in byte 13 of the header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TcpFlags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
        const ECE = 0x40;
        const CWR = 0x80;
    }
}

impl TcpFlags {
    pub fn of(header: &TcpHeader) -> Self {
        let mut flags = TcpFlags::empty();
        flags.set(TcpFlags::FIN, header.fin);
        flags.set(TcpFlags::SYN, header.syn);
        flags.set(TcpFlags::RST, header.rst);
        flags.set(TcpFlags::PSH, header.psh);
        flags.set(TcpFlags::ACK, header.ack);
        flags.set(TcpFlags::URG, header.urg);
        flags.set(TcpFlags::ECE, header.ece);
        flags.set(TcpFlags::CWR, header.cwr);
        flags
    }

    pub fn apply(self, header: &mut TcpHeader) {
        header.fin = self.contains(TcpFlags::FIN);
        header.syn = self.contains(TcpFlags::SYN);
        header.rst = self.contains(TcpFlags::RST);
        header.psh = self.contains(TcpFlags::PSH);
        header.ack = self.contains(TcpFlags::ACK);
        header.urg = self.contains(TcpFlags::URG);
        header.ece = self.contains(TcpFlags::ECE);
        header.cwr = self.contains(TcpFlags::CWR);
    }
}

/// Options decoded from an inbound header. Only the MSS changes behaviour;
/// the rest is kept for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TcpOptions {
    pub mss: Option<u16>,
    pub window_scale: Option<u8>,
    pub sack_permitted: bool,
    pub sack_blocks: usize,
    /// (value, echo reply)
    pub timestamp: Option<(u32, u32)>,
}

impl TcpOptions {
    /// Walks the options block, stopping at the end-of-list marker or at the
    /// first malformed option.
    pub fn parse(header: &TcpHeader) -> Self {
        let mut options = TcpOptions::default();
        for element in header.options_iterator() {
            match element {
                Ok(TcpOptionElement::MaximumSegmentSize(mss)) => options.mss = Some(mss),
                Ok(TcpOptionElement::WindowScale(shift)) => options.window_scale = Some(shift),
                Ok(TcpOptionElement::SelectiveAcknowledgementPermitted) => {
                    options.sack_permitted = true
                }
                Ok(TcpOptionElement::SelectiveAcknowledgement(_, rest)) => {
                    options.sack_blocks = 1 + rest.iter().flatten().count()
                }
                Ok(TcpOptionElement::Timestamp(value, echo)) => {
                    options.timestamp = Some((value, echo))
                }
                Ok(TcpOptionElement::Noop) => {}
                Err(e) => {
                    log::debug!("stopping at malformed tcp option: {:?}", e);
                    break;
                }
            }
        }
        options
    }
}

/// Builds the headers of the segments a connection sends. Ports are from the
/// point of view of the sender.
#[derive(Debug, Clone, Copy)]
pub struct TcpHeaderBuilder {
    source_port: u16,
    destination_port: u16,
    window_size: u16,
}

impl TcpHeaderBuilder {
    pub fn new(source_port: u16, destination_port: u16, window_size: u16) -> Self {
        Self {
            source_port,
            destination_port,
            window_size,
        }
    }

    fn header(&self, sequence_number: u32, flags: TcpFlags) -> TcpHeader {
        let mut header = TcpHeader::new(
            self.source_port,
            self.destination_port,
            sequence_number,
            self.window_size,
        );
        flags.apply(&mut header);
        header
    }

    fn with_mss(mut header: TcpHeader, mss: u16) -> Result<TcpHeader> {
        header
            .set_options(&[TcpOptionElement::MaximumSegmentSize(mss)])
            .map_err(Error::encode)?;
        Ok(header)
    }

    pub fn create_syn(&self, sequence_number: u32, mss: u16) -> Result<TcpHeader> {
        Self::with_mss(self.header(sequence_number, TcpFlags::SYN), mss)
    }

    pub fn create_syn_ack(
        &self,
        sequence_number: u32,
        acknowledgment_number: u32,
        mss: u16,
    ) -> Result<TcpHeader> {
        let mut header = self.header(sequence_number, TcpFlags::SYN | TcpFlags::ACK);
        header.acknowledgment_number = acknowledgment_number;
        Self::with_mss(header, mss)
    }

    pub fn create_ack(&self, sequence_number: u32, acknowledgment_number: u32) -> TcpHeader {
        let mut header = self.header(sequence_number, TcpFlags::ACK);
        header.acknowledgment_number = acknowledgment_number;
        header
    }

    pub fn create_data(&self, sequence_number: u32, acknowledgment_number: u32) -> TcpHeader {
        let mut header = self.header(sequence_number, TcpFlags::ACK | TcpFlags::PSH);
        header.acknowledgment_number = acknowledgment_number;
        header
    }

    pub fn create_fin(&self, sequence_number: u32, acknowledgment_number: u32) -> TcpHeader {
        let mut header = self.header(sequence_number, TcpFlags::FIN | TcpFlags::ACK);
        header.acknowledgment_number = acknowledgment_number;
        header
    }

    pub fn create_rst(&self, sequence_number: u32) -> TcpHeader {
        let mut header = self.header(sequence_number, TcpFlags::RST);
        header.window_size = 0;
        header
    }

    pub fn create_rst_ack(&self, sequence_number: u32, acknowledgment_number: u32) -> TcpHeader {
        let mut header = self.header(sequence_number, TcpFlags::RST | TcpFlags::ACK);
        header.acknowledgment_number = acknowledgment_number;
        header.window_size = 0;
        header
    }
}

/// Fills in the checksum for the `src` -> `dst` pseudo-header and serializes
/// header and payload.
pub fn encode_segment(
    header: &mut TcpHeader,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    payload: &[u8],
) -> Result<Vec<u8>> {
    header.checksum = header
        .calc_checksum_ipv4_raw(src.octets(), dst.octets(), payload)
        .map_err(Error::encode)?;

    let mut buf = Vec::with_capacity(TCP_HEADER_SIZE + TCP_OPTS_MAXLEN + payload.len());
    header.write(&mut buf).map_err(Error::encode)?;
    buf.extend_from_slice(payload);
    Ok(buf)
}
