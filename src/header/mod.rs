//! Wire formats. TCP, IPv4 and Ethernet go through `etherparse`; ARP is
//! laid out by hand.

pub mod arp;
pub mod ip;
pub mod tcp;

pub use tcp::{encode_segment, TcpFlags, TcpHeaderBuilder, TcpOptions};
