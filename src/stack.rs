//! Wires link, ARP, IPv4 and TCP together and drives them.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::arp::Arp;
use crate::config::StackConfig;
use crate::error::{Error, Result};
use crate::eth::{FrameCodec, Ipv4Output};
use crate::link::{Link, TapDevice};
use crate::tcp::{Tcp, TcpEvent};

pub struct Stack {
    link: Arc<dyn Link>,
    arp: Arc<Arp>,
    tcp: Arc<Tcp>,
    codec: FrameCodec,
    config: StackConfig,
    stop: Arc<AtomicBool>,
}

impl Stack {
    pub fn new(link: Arc<dyn Link>, config: StackConfig) -> (Self, Receiver<TcpEvent>) {
        let arp = Arc::new(Arp::new(config.arp_capacity));
        let sink = Arc::new(Ipv4Output::new(Arc::clone(&link), Arc::clone(&arp)));
        let (tcp, events) = Tcp::new(link.ipv4(), config.tcp.clone(), sink);
        let tcp = Arc::new(tcp);
        let codec = FrameCodec::new(Arc::clone(&link), Arc::clone(&arp), Arc::clone(&tcp));
        let stack = Self {
            link,
            arp,
            tcp,
            codec,
            config,
            stop: Arc::new(AtomicBool::new(false)),
        };
        (stack, events)
    }

    /// Creates the TAP device described by `config` and a stack on top of it.
    pub fn open(config: StackConfig) -> Result<(Self, Receiver<TcpEvent>)> {
        let link: Arc<dyn Link> = Arc::new(TapDevice::open(&config)?);
        Ok(Self::new(link, config))
    }

    pub fn tcp(&self) -> &Arc<Tcp> {
        &self.tcp
    }

    pub fn arp(&self) -> &Arc<Arp> {
        &self.arp
    }

    pub fn link(&self) -> &Arc<dyn Link> {
        &self.link
    }

    /// Starts the thread serving the fast and slow timer ticks.
    pub fn spawn_timers(&self) -> io::Result<JoinHandle<()>> {
        let tcp = Arc::clone(&self.tcp);
        let stop = Arc::clone(&self.stop);
        let fast = self.config.tcp.fast_tick;
        let ratio = (self.config.tcp.slow_tick.as_millis() / fast.as_millis().max(1)).max(1);

        thread::Builder::new()
            .name("tcp-timers".into())
            .spawn(move || {
                let mut ticks: u128 = 0;
                while !stop.load(Ordering::Relaxed) {
                    thread::sleep(fast);
                    tcp.fast_tick();
                    ticks += 1;
                    if ticks % ratio == 0 {
                        tcp.slow_tick();
                    }
                }
                log::debug!("timer thread stopped");
            })
    }

    /// Reads and handles one frame.
    pub fn poll(&self, buf: &mut [u8]) -> Result<()> {
        let len = self.link.recv_frame(buf)?;
        self.codec.receive(&buf[..len]);
        Ok(())
    }

    /// Processes frames until [`Stack::shutdown`] or a device error.
    pub fn run(&self) -> Result<()> {
        let mut buf = vec![0u8; usize::from(self.config.mtu) + 64];
        while !self.stop.load(Ordering::Relaxed) {
            match self.poll(&mut buf) {
                Ok(()) => {}
                Err(Error::Io(e))
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                    ) => {}
                Err(e) => {
                    log::error!("reading from {}: {}", self.config.interface, e);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::eth::{encode_frame, Frame, ETHERTYPE_ARP};
    use crate::header::arp::ArpPacket;
    use crate::link::{MacAddr, MemoryLink};

    const HOST_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x05]);

    #[test]
    fn run_rides_out_an_idle_link_until_shutdown() {
        let config = StackConfig::default();
        let link = Arc::new(MemoryLink::new(config.mac, config.ipv4));
        let (stack, _events) = Stack::new(link.clone(), config.clone());

        thread::scope(|s| {
            let runner = s.spawn(|| stack.run());

            // the link reports WouldBlock until this shows up
            thread::sleep(Duration::from_millis(20));
            let request = ArpPacket::request(HOST_MAC, config.host_addr, config.ipv4).emit();
            let frame = encode_frame(MacAddr::BROADCAST, HOST_MAC, ETHERTYPE_ARP, &request);
            link.inject(frame.unwrap());

            let mut sent = Vec::new();
            for _ in 0..1000 {
                sent.extend(link.take_sent());
                if !sent.is_empty() {
                    break;
                }
                thread::sleep(Duration::from_millis(1));
            }
            stack.shutdown();

            assert!(runner.join().unwrap().is_ok());
            assert_eq!(sent.len(), 1);
            assert_eq!(Frame::parse(&sent[0]).unwrap().destination, HOST_MAC);
        });
    }
}
