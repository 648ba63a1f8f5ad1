use std::collections::VecDeque;
use std::net::Ipv4Addr;

use parking_lot::Mutex;

use super::{Link, MacAddr};
use crate::error::Result;
use crate::eth;

/// A link backed by two queues. Sent frames are collected for inspection,
/// received frames are whatever was pushed with [`MemoryLink::inject`].
pub struct MemoryLink {
    mac: MacAddr,
    ipv4: Ipv4Addr,
    sent: Mutex<Vec<Vec<u8>>>,
    inbound: Mutex<VecDeque<Vec<u8>>>,
}

impl MemoryLink {
    pub fn new(mac: MacAddr, ipv4: Ipv4Addr) -> Self {
        Self {
            mac,
            ipv4,
            sent: Mutex::new(Vec::new()),
            inbound: Mutex::new(VecDeque::new()),
        }
    }

    pub fn inject(&self, frame: Vec<u8>) {
        self.inbound.lock().push_back(frame);
    }

    /// Frames written so far, oldest first.
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl Link for MemoryLink {
    fn mac(&self) -> MacAddr {
        self.mac
    }

    fn ipv4(&self) -> Ipv4Addr {
        self.ipv4
    }

    fn send_frame(&self, dest: MacAddr, ethertype: u16, payload: &[u8]) -> Result<()> {
        let frame = eth::encode_frame(dest, self.mac, ethertype, payload)?;
        self.sent.lock().push(frame);
        Ok(())
    }

    fn recv_frame(&self, buf: &mut [u8]) -> Result<usize> {
        match self.inbound.lock().pop_front() {
            Some(frame) => {
                let len = frame.len().min(buf.len());
                buf[..len].copy_from_slice(&frame[..len]);
                Ok(len)
            }
            None => Err(std::io::Error::from(std::io::ErrorKind::WouldBlock).into()),
        }
    }
}
