use std::io::{self, Read, Write};
use std::net::Ipv4Addr;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::{Link, MacAddr};
use crate::config::StackConfig;
use crate::error::Result;
use crate::eth;

/// How long the reader backs off when no frame is waiting.
const READ_BACKOFF: Duration = Duration::from_millis(1);

/// A TAP interface. The host side gets `host_addr`; the stack answers for
/// `ipv4` with its own MAC.
///
/// The descriptor is non-blocking and the lock is only held for a single
/// read or write, so senders never wait behind an idle reader.
pub struct TapDevice {
    mac: MacAddr,
    ipv4: Ipv4Addr,
    device: Mutex<tun::platform::Device>,
}

impl TapDevice {
    pub fn open(config: &StackConfig) -> Result<Self> {
        let mut tun_config = tun::Configuration::default();
        tun_config
            .name(&config.interface)
            .layer(tun::Layer::L2)
            .address(config.host_addr)
            .netmask(config.netmask)
            .mtu(i32::from(config.mtu))
            .up();

        #[cfg(target_os = "linux")]
        tun_config.platform(|platform| {
            platform.packet_information(false);
        });

        let device = tun::create(&tun_config)?;
        device.set_nonblock()?;

        log::info!(
            "opened {} (host {}/{}), stack at {} {}",
            config.interface,
            config.host_addr,
            config.netmask,
            config.ipv4,
            config.mac
        );

        Ok(Self {
            mac: config.mac,
            ipv4: config.ipv4,
            device: Mutex::new(device),
        })
    }
}

impl Link for TapDevice {
    fn mac(&self) -> MacAddr {
        self.mac
    }

    fn ipv4(&self) -> Ipv4Addr {
        self.ipv4
    }

    fn send_frame(&self, dest: MacAddr, ethertype: u16, payload: &[u8]) -> Result<()> {
        let frame = eth::encode_frame(dest, self.mac, ethertype, payload)?;
        self.device.lock().write_all(&frame)?;
        Ok(())
    }

    /// Returns an `Io` error of kind `WouldBlock` after a short back-off when
    /// nothing is waiting.
    fn recv_frame(&self, buf: &mut [u8]) -> Result<usize> {
        let read = self.device.lock().read(buf);
        match read {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(READ_BACKOFF);
                Err(e.into())
            }
            read => Ok(read?),
        }
    }
}
