//! Link transport: raw Ethernet frames in and out of a network device.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::{Error, Result};

mod memory;
mod tap;

pub use memory::MemoryLink;
pub use tap::TapDevice;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for MacAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut addr = [0u8; 6];
        let mut parts = s.split(':');
        for byte in addr.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| Error::Malformed(format!("mac address {s:?}")))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| Error::Malformed(format!("mac address {s:?}")))?;
        }
        if parts.next().is_some() {
            return Err(Error::Malformed(format!("mac address {s:?}")));
        }
        Ok(MacAddr(addr))
    }
}

/// A device the stack owns an identity on.
pub trait Link: Send + Sync {
    fn mac(&self) -> MacAddr;

    fn ipv4(&self) -> Ipv4Addr;

    /// Wraps `payload` in an Ethernet II header from our MAC and writes it.
    fn send_frame(&self, dest: MacAddr, ethertype: u16, payload: &[u8]) -> Result<()>;

    /// Blocks until a whole frame is read into `buf`.
    fn recv_frame(&self, buf: &mut [u8]) -> Result<usize>;
}
