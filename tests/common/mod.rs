#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tapstack::header::{encode_segment, TcpFlags, TcpHeaderBuilder};
use tapstack::tcp::{Segment, SegmentSink};
use tapstack::time::ManualClock;
use tapstack::{Quad, Result, Tcp, TcpConfig, TcpEvent};

pub const CLIENT: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
pub const SERVER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 6);
pub const CLIENT_PORT: u16 = 40000;
pub const SERVER_PORT: u16 = 80;

pub fn client_addr() -> SocketAddrV4 {
    SocketAddrV4::new(CLIENT, CLIENT_PORT)
}

pub fn server_addr() -> SocketAddrV4 {
    SocketAddrV4::new(SERVER, SERVER_PORT)
}

/// The connection as the server sees it.
pub fn server_quad() -> Quad {
    Quad {
        local: server_addr(),
        remote: client_addr(),
    }
}

pub fn client_quad() -> Quad {
    Quad {
        local: client_addr(),
        remote: server_addr(),
    }
}

pub struct Captured {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub bytes: Vec<u8>,
}

impl Captured {
    pub fn segment(&self) -> Segment<'_> {
        Segment::parse(self.source, self.destination, &self.bytes).unwrap()
    }

    pub fn flags(&self) -> TcpFlags {
        self.segment().flags()
    }

    pub fn seq(&self) -> u32 {
        self.segment().seq()
    }

    pub fn ack(&self) -> u32 {
        self.segment().ack()
    }

    pub fn payload(&self) -> Vec<u8> {
        self.segment().payload.to_vec()
    }
}

/// Collects everything a stack sends.
#[derive(Default)]
pub struct Capture {
    segments: Mutex<Vec<Captured>>,
}

impl Capture {
    pub fn take(&self) -> Vec<Captured> {
        std::mem::take(&mut *self.segments.lock())
    }
}

impl SegmentSink for Capture {
    fn emit(&self, source: Ipv4Addr, destination: Ipv4Addr, segment: &[u8]) -> Result<()> {
        self.segments.lock().push(Captured {
            source,
            destination,
            bytes: segment.to_vec(),
        });
        Ok(())
    }
}

pub struct Endpoint {
    pub tcp: Tcp,
    pub sink: Arc<Capture>,
    pub events: Receiver<TcpEvent>,
    pub clock: Arc<ManualClock>,
}

impl Endpoint {
    pub fn new(addr: Ipv4Addr, iss: u32, clock: &Arc<ManualClock>, config: TcpConfig) -> Self {
        let sink = Arc::new(Capture::default());
        let (tcp, events) = Tcp::new(addr, config, sink.clone());
        let tcp = tcp
            .with_clock(clock.clone())
            .with_isn(move |_: &Quad| iss);
        Self {
            tcp,
            sink,
            events,
            clock: clock.clone(),
        }
    }

    pub fn sent(&self) -> Vec<Captured> {
        self.sink.take()
    }

    pub fn events(&self) -> Vec<TcpEvent> {
        self.events.try_iter().collect()
    }

    /// Moves the clock and runs both timer ticks.
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
        self.tcp.fast_tick();
        self.tcp.slow_tick();
    }
}

/// Hands every segment `from` sent to `to`. Returns how many there were.
pub fn deliver(from: &Endpoint, to: &Endpoint) -> usize {
    let segments = from.sent();
    for s in &segments {
        to.tcp.process_segment(s.source, s.destination, &s.bytes);
    }
    segments.len()
}

/// Delivers in both directions until the wire is quiet.
pub fn pump(a: &Endpoint, b: &Endpoint) {
    while deliver(a, b) + deliver(b, a) > 0 {}
}

/// Client (iss 100) and server (iss 500) sharing one clock, server
/// listening on port 80.
pub fn pair() -> (Endpoint, Endpoint) {
    let clock = Arc::new(ManualClock::new());
    let client = Endpoint::new(CLIENT, 100, &clock, TcpConfig::default());
    let server = Endpoint::new(SERVER, 500, &clock, TcpConfig::default());
    server.tcp.listen(SERVER_PORT).unwrap();
    (client, server)
}

pub fn established_pair() -> (Endpoint, Endpoint) {
    let (client, server) = pair();
    client
        .tcp
        .connect_from(CLIENT_PORT, server_addr())
        .unwrap();
    pump(&client, &server);
    client.events();
    server.events();
    (client, server)
}

/// A remote endpoint scripted segment by segment, talking to the server.
pub struct Peer;

impl Peer {
    pub fn segment(flags: TcpFlags, seq: u32, ack: u32, window: u16, payload: &[u8]) -> Vec<u8> {
        let builder = TcpHeaderBuilder::new(CLIENT_PORT, SERVER_PORT, window);
        let mut header = builder.create_ack(seq, ack);
        flags.apply(&mut header);
        encode_segment(&mut header, CLIENT, SERVER, payload).unwrap()
    }

    pub fn send(
        tcp: &Tcp,
        flags: TcpFlags,
        seq: u32,
        ack: u32,
        window: u16,
        payload: &[u8],
    ) {
        let bytes = Self::segment(flags, seq, ack, window, payload);
        tcp.process_segment(CLIENT, SERVER, &bytes);
    }

    /// Completes a handshake with a server listening on port 80. The peer
    /// uses iss 1000 and advertises `window`; the server's iss is 500.
    pub fn handshake(server: &Endpoint, window: u16) {
        Self::send(&server.tcp, TcpFlags::SYN, 1000, 0, window, &[]);
        let syn_ack = server.sent();
        assert_eq!(syn_ack.len(), 1);
        assert_eq!(syn_ack[0].flags(), TcpFlags::SYN | TcpFlags::ACK);
        Self::send(&server.tcp, TcpFlags::ACK, 1001, 501, window, &[]);
        server.sent();
        server.events();
    }
}
