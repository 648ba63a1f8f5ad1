//! The TCP layer: connection table, per-connection state machine and the
//! timers that drive retransmission, persist, keepalive and TIME-WAIT.
//!
//! Segments reach [`Tcp::process_segment`] already stripped of their IPv4
//! header; whatever a connection wants to send goes out through the
//! [`SegmentSink`]. All work on a connection happens with its mutex held,
//! and everything it produces is emitted before the mutex is released.

mod connection;
mod output;
mod retransmit;
mod segment;
mod state;
mod table;
mod timer;

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use etherparse::TcpHeader;
use parking_lot::Mutex;

pub use segment::Segment;
pub use state::State;
pub use table::Quad;
pub use timer::{Tick, TimerKind};

use self::connection::Connection;
use self::table::{ConnectionRef, ConnectionTable};
use self::timer::{Expiry, TimerEntry, TimerQueue};
use crate::config::TcpConfig;
use crate::error::{Error, Result};
use crate::header::{encode_segment, TcpFlags, TcpHeaderBuilder};
use crate::time::{Clock, SystemClock};

/// First port handed out by [`Tcp::connect`].
pub const EPHEMERAL_PORT_START: u16 = 49152;

/// Where outgoing segments go, usually the IPv4 layer.
pub trait SegmentSink: Send + Sync {
    fn emit(&self, source: Ipv4Addr, destination: Ipv4Addr, segment: &[u8]) -> Result<()>;
}

/// Chooses initial send sequence numbers.
pub trait IsnSource: Send + Sync {
    fn next_iss(&self, quad: &Quad) -> u32;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIsn;

impl IsnSource for RandomIsn {
    fn next_iss(&self, _quad: &Quad) -> u32 {
        rand::random()
    }
}

impl<F> IsnSource for F
where
    F: Fn(&Quad) -> u32 + Send + Sync,
{
    fn next_iss(&self, quad: &Quad) -> u32 {
        self(quad)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Orderly shutdown, or TIME-WAIT expiry.
    Normal,
    Reset,
    TimedOut,
    Aborted,
}

/// Notifications for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpEvent {
    Established { quad: Quad },
    Readable { quad: Quad },
    PeerClosed { quad: Quad },
    Closed { quad: Quad, reason: CloseReason },
    /// A SYN reached a listener but the table was full.
    AcceptFailed { quad: Quad },
}

/// Snapshot of a connection's control block.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub quad: Quad,
    pub state: State,
    pub iss: u32,
    pub irs: u32,
    pub snd_una: u32,
    pub snd_nxt: u32,
    pub snd_wnd: u16,
    pub snd_wl1: u32,
    pub snd_wl2: u32,
    pub rcv_nxt: u32,
    pub rcv_wnd: u16,
    pub rcv_up: u32,
    pub mss: u16,
    pub srtt: Option<Duration>,
    pub rto: Duration,
    pub retries: u32,
    pub unacked_segments: usize,
    pub send_queue: usize,
    pub recv_queue: usize,
    pub timers: Vec<TimerKind>,
}

pub(crate) struct Outbound {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub bytes: Vec<u8>,
}

/// What a connection produced while its lock was held.
pub(crate) struct Ctx<'a> {
    pub now: Instant,
    pub config: &'a TcpConfig,
    pub segments: Vec<Outbound>,
    pub events: Vec<TcpEvent>,
    pub timers: Vec<TimerEntry>,
}

impl<'a> Ctx<'a> {
    fn new(now: Instant, config: &'a TcpConfig) -> Self {
        Self {
            now,
            config,
            segments: Vec::new(),
            events: Vec::new(),
            timers: Vec::new(),
        }
    }
}

pub struct Tcp {
    addr: Ipv4Addr,
    config: TcpConfig,
    table: ConnectionTable,
    timers: TimerQueue,
    sink: Arc<dyn SegmentSink>,
    clock: Arc<dyn Clock>,
    isn: Box<dyn IsnSource>,
    next_port: AtomicU16,
    events: Mutex<mpsc::Sender<TcpEvent>>,
}

impl Tcp {
    pub fn new(
        addr: Ipv4Addr,
        config: TcpConfig,
        sink: Arc<dyn SegmentSink>,
    ) -> (Self, mpsc::Receiver<TcpEvent>) {
        let (tx, rx) = mpsc::channel();
        let tcp = Self {
            addr,
            table: ConnectionTable::new(config.max_connections),
            config,
            timers: TimerQueue::default(),
            sink,
            clock: Arc::new(SystemClock),
            isn: Box::new(RandomIsn),
            next_port: AtomicU16::new(EPHEMERAL_PORT_START),
            events: Mutex::new(tx),
        };
        (tcp, rx)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_isn(mut self, isn: impl IsnSource + 'static) -> Self {
        self.isn = Box::new(isn);
        self
    }

    pub fn local_addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    /// Number of table entries, listeners included.
    pub fn connections(&self) -> usize {
        self.table.len()
    }

    pub fn listen(&self, port: u16) -> Result<Quad> {
        let quad = Quad::listening(SocketAddrV4::new(self.addr, port));
        let now = self.clock.now();
        self.table
            .create(quad, |epoch| Connection::listen(quad, epoch, &self.config, now))?;
        log::info!("listening on {}", quad.local);
        Ok(quad)
    }

    /// Active open from an ephemeral port.
    pub fn connect(&self, remote: SocketAddrV4) -> Result<Quad> {
        let span = u16::MAX - EPHEMERAL_PORT_START;
        for _ in 0..=span {
            let port = self.next_ephemeral_port();
            match self.connect_from(port, remote) {
                Err(Error::AddressInUse) => continue,
                result => return result,
            }
        }
        Err(Error::AddressInUse)
    }

    pub fn connect_from(&self, local_port: u16, remote: SocketAddrV4) -> Result<Quad> {
        let quad = Quad {
            local: SocketAddrV4::new(self.addr, local_port),
            remote,
        };
        let iss = self.isn.next_iss(&quad);
        let mut ctx = Ctx::new(self.clock.now(), &self.config);
        let connection = self
            .table
            .create(quad, |epoch| Connection::connect(quad, epoch, iss, &mut ctx))?;

        // the SYN goes out with the connection locked, like every other
        // segment
        let _guard = connection.lock();
        self.dispatch(ctx);
        log::debug!("{}: connecting", quad);
        Ok(quad)
    }

    fn next_ephemeral_port(&self) -> u16 {
        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        if port < EPHEMERAL_PORT_START {
            self.next_port
                .store(EPHEMERAL_PORT_START + 1, Ordering::Relaxed);
            EPHEMERAL_PORT_START
        } else {
            port
        }
    }

    /// Queues `data` for sending. Returns how much was accepted.
    pub fn send(&self, quad: &Quad, data: &[u8]) -> Result<usize> {
        self.with_connection(quad, |c, ctx| c.send(data, ctx))
    }

    /// Reads received data. `Ok(0)` once the peer has closed and everything
    /// was read; an `Io` error of kind `WouldBlock` when nothing is ready.
    pub fn recv(&self, quad: &Quad, buf: &mut [u8]) -> Result<usize> {
        self.with_connection(quad, |c, ctx| c.recv(buf, ctx))
    }

    pub fn close(&self, quad: &Quad) -> Result<()> {
        self.with_connection(quad, |c, ctx| c.close(ctx))
    }

    pub fn abort(&self, quad: &Quad) -> Result<()> {
        self.with_connection(quad, |c, ctx| {
            c.abort(ctx);
            Ok(())
        })
    }

    pub fn state(&self, quad: &Quad) -> Option<State> {
        self.table.lookup(quad).map(|c| c.lock().state)
    }

    pub fn info(&self, quad: &Quad) -> Option<ConnectionInfo> {
        self.table.lookup(quad).map(|c| c.lock().info())
    }

    fn with_connection<R>(
        &self,
        quad: &Quad,
        f: impl FnOnce(&mut Connection, &mut Ctx<'_>) -> Result<R>,
    ) -> Result<R> {
        let connection = self.table.lookup(quad).ok_or(Error::NotConnected)?;
        self.drive(&connection, f)
    }

    /// Runs `f` on the locked connection, emits what it produced, and drops
    /// the connection from the table if it ended up closed.
    fn drive<R>(
        &self,
        connection: &ConnectionRef,
        f: impl FnOnce(&mut Connection, &mut Ctx<'_>) -> R,
    ) -> R {
        let mut ctx = Ctx::new(self.clock.now(), &self.config);
        let mut guard = connection.lock();
        let result = f(&mut guard, &mut ctx);
        self.dispatch(ctx);
        if guard.state == State::Closed {
            let (quad, epoch) = (guard.quad, guard.epoch);
            if self.table.remove(&quad, epoch) {
                log::debug!("{}: removed", quad);
            }
        }
        result
    }

    fn dispatch(&self, ctx: Ctx<'_>) {
        for entry in ctx.timers {
            self.timers.schedule(entry);
        }
        for out in ctx.segments {
            if let Err(e) = self.sink.emit(out.source, out.destination, &out.bytes) {
                log::warn!("failed to send segment to {}: {}", out.destination, e);
            }
        }
        if !ctx.events.is_empty() {
            let events = self.events.lock();
            for event in ctx.events {
                // nobody listening is fine
                let _ = events.send(event);
            }
        }
    }

    fn notify(&self, event: TcpEvent) {
        let _ = self.events.lock().send(event);
    }

    /// Entry point for inbound segments. Invalid segments are dropped.
    pub fn process_segment(&self, source: Ipv4Addr, destination: Ipv4Addr, bytes: &[u8]) {
        let seg = match Segment::parse(source, destination, bytes) {
            Ok(seg) => seg,
            Err(e) => {
                log::debug!("dropping segment from {}: {}", source, e);
                return;
            }
        };
        if destination != self.addr {
            log::debug!("dropping segment for {}", destination);
            return;
        }

        let quad = seg.quad();
        log::trace!(
            "{}: recv {:?} seq={} ack={} wnd={} len={}",
            quad,
            seg.flags(),
            seg.seq(),
            seg.ack(),
            seg.window(),
            seg.payload.len()
        );

        if let Some(connection) = self.table.lookup(&quad) {
            self.drive(&connection, |c, ctx| c.on_segment(&seg, ctx));
        } else if let Some(listener) = self.table.lookup(&Quad::listening(quad.local)) {
            let guard = listener.lock();
            if guard.state == State::Listen {
                self.on_listen(&seg, quad);
            }
        } else {
            self.reply_closed(&seg);
        }
    }

    /// Only a pure SYN opens a connection; everything else reaching a
    /// listener is dropped without a reply.
    fn on_listen(&self, seg: &Segment<'_>, quad: Quad) {
        let flags = seg.flags();
        if !flags.contains(TcpFlags::SYN) || flags.contains(TcpFlags::RST) {
            log::trace!("{}: listener dropping {:?}", quad, flags);
            return;
        }
        if flags.intersects(TcpFlags::ACK | TcpFlags::FIN | TcpFlags::URG)
            || !seg.payload.is_empty()
        {
            log::debug!(
                "{}: rejecting SYN with {:?} and {} bytes",
                quad,
                flags,
                seg.payload.len()
            );
            return;
        }

        let iss = self.isn.next_iss(&quad);
        let mut ctx = Ctx::new(self.clock.now(), &self.config);
        match self
            .table
            .create(quad, |epoch| Connection::accept(quad, epoch, iss, seg, &mut ctx))
        {
            Ok(connection) => {
                let _guard = connection.lock();
                log::debug!("{}: SYN received", quad);
                self.dispatch(ctx);
            }
            Err(e) => {
                log::warn!("{}: refusing connection: {}", quad, e);
                self.notify(TcpEvent::AcceptFailed { quad });
            }
        }
    }

    /// Segments for which no connection exists get a RST, unless they are
    /// one themselves.
    fn reply_closed(&self, seg: &Segment<'_>) {
        let flags = seg.flags();
        if flags.contains(TcpFlags::RST) {
            return;
        }
        log::debug!("{}: no such connection, resetting", seg.quad());
        let builder = Self::reply_builder(seg);
        let header = if flags.contains(TcpFlags::ACK) {
            builder.create_rst(seg.ack())
        } else {
            builder.create_rst_ack(0, seg.seq().wrapping_add(seg.len()))
        };
        self.send_stateless(seg, header);
    }

    fn reply_builder(seg: &Segment<'_>) -> TcpHeaderBuilder {
        TcpHeaderBuilder::new(seg.destination_port(), seg.source_port(), 0)
    }

    fn send_stateless(&self, seg: &Segment<'_>, mut header: TcpHeader) {
        let sent = encode_segment(&mut header, seg.destination, seg.source, &[])
            .and_then(|bytes| self.sink.emit(seg.destination, seg.source, &bytes));
        if let Err(e) = sent {
            log::warn!("failed to reset {}: {}", seg.source, e);
        }
    }

    /// Serves the retransmission timers.
    pub fn fast_tick(&self) {
        self.run_timers(Tick::Fast);
    }

    /// Serves the persist, keepalive and 2MSL timers.
    pub fn slow_tick(&self) {
        self.run_timers(Tick::Slow);
    }

    fn run_timers(&self, tick: Tick) {
        let now = self.clock.now();
        for entry in self.timers.expired(tick, now) {
            let Some(connection) = self.table.lookup(&entry.quad) else {
                log::trace!("{}: stale {:?} timer", entry.quad, entry.kind);
                continue;
            };
            self.drive(&connection, |c, ctx| {
                if c.epoch != entry.epoch {
                    return;
                }
                match c.timers.expire(entry.kind, entry.deadline, now) {
                    Expiry::Stale => {}
                    Expiry::Pending(deadline) => c.queue_timer(entry.kind, deadline, ctx),
                    Expiry::Due => {
                        log::trace!("{}: {:?} timer expired", c.quad, entry.kind);
                        c.on_timer(entry.kind, ctx);
                    }
                }
            });
        }
    }

    /// Timer entries waiting in the queue, at most one per connection and
    /// timer kind.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }
}
