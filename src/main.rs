//! Echo server on a TAP device.
//!
//! Needs permission to create the interface (root or CAP_NET_ADMIN). Once
//! running, `nc 10.0.0.6 8080` from the host talks to the stack.

use std::io;
use std::net::Ipv4Addr;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use tapstack::link::MacAddr;
use tapstack::{Error, Stack, StackConfig, Tcp, TcpEvent};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TAP interface to create
    #[arg(short, long, default_value = "tap0")]
    interface: String,

    /// Address the stack answers for
    #[arg(long, default_value = "10.0.0.6")]
    ip: Ipv4Addr,

    /// Hardware address of the stack
    #[arg(long, default_value = "00:50:56:f1:c4:10")]
    mac: MacAddr,

    /// Address given to the host side of the interface
    #[arg(long, default_value = "10.0.0.5")]
    host: Ipv4Addr,

    #[arg(long, default_value = "255.255.255.0")]
    netmask: Ipv4Addr,

    #[arg(long, default_value_t = 1500)]
    mtu: u16,

    /// Port of the echo server
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Probe idle connections
    #[arg(long)]
    keepalive: bool,
}

impl Args {
    fn into_config(self) -> StackConfig {
        let mut config = StackConfig {
            interface: self.interface,
            mac: self.mac,
            ipv4: self.ip,
            host_addr: self.host,
            netmask: self.netmask,
            mtu: self.mtu,
            ..StackConfig::default()
        };
        config.tcp.keepalive = self.keepalive;
        config
    }
}

fn echo(tcp: Arc<Tcp>, events: Receiver<TcpEvent>) {
    let mut buf = [0u8; 4096];
    for event in events {
        match event {
            TcpEvent::Established { quad } => log::info!("{}: established", quad),
            TcpEvent::Readable { quad } => loop {
                match tcp.recv(&quad, &mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Err(e) = tcp.send(&quad, &buf[..n]) {
                            log::warn!("{}: echo failed: {}", quad, e);
                            break;
                        }
                    }
                    Err(Error::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        log::warn!("{}: {}", quad, e);
                        break;
                    }
                }
            },
            TcpEvent::PeerClosed { quad } => {
                if let Err(e) = tcp.close(&quad) {
                    log::debug!("{}: close: {}", quad, e);
                }
            }
            TcpEvent::Closed { quad, reason } => log::info!("{}: closed ({:?})", quad, reason),
            TcpEvent::AcceptFailed { quad } => log::warn!("{}: connection refused", quad),
        }
    }
}

fn main() -> tapstack::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let port = args.port;
    let (stack, events) = Stack::open(args.into_config())?;

    stack.tcp().listen(port)?;
    let tcp = Arc::clone(stack.tcp());
    thread::Builder::new()
        .name("echo".into())
        .spawn(move || echo(tcp, events))?;
    stack.spawn_timers()?;

    stack.run()
}
