//! A user-space TCP/IP endpoint on a TAP device.
//!
//! Frames come in through a [`link::Link`], are demultiplexed by
//! [`eth::FrameCodec`] to [`arp::Arp`] or, as IPv4, to [`tcp::Tcp`].
//! Segments go back out through [`eth::Ipv4Output`].

pub mod arp;
pub mod config;
pub mod error;
pub mod eth;
pub mod header;
pub mod link;
pub mod sequence;
pub mod stack;
pub mod tcp;
pub mod time;
pub mod validation;

pub use config::{StackConfig, TcpConfig};
pub use error::{Error, Result};
pub use stack::Stack;
pub use tcp::{CloseReason, Quad, State, Tcp, TcpEvent};
