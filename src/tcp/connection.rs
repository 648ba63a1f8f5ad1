use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use super::retransmit::RetransmitQueue;
use super::segment::Segment;
use super::timer::{RtoEstimator, TimerEntry, TimerKind, Timers};
use super::{CloseReason, ConnectionInfo, Ctx, Quad, State, TcpEvent};
use crate::config::TcpConfig;
use crate::error::{Error, Result};
use crate::header::TcpFlags;
use crate::sequence::{after, before, before_eq, ReceiveSequence, SendSequence};
use crate::validation::{acceptable_ack, is_segment_acceptable};

/// Transmission control block.
pub struct Connection {
    pub(crate) quad: Quad,
    /// Incarnation of `quad` in the connection table.
    pub(crate) epoch: u64,
    pub(crate) state: State,
    pub(crate) snd: SendSequence,
    pub(crate) rcv: ReceiveSequence,
    /// Largest payload put in one outgoing segment.
    pub(crate) mss: u16,
    pub(super) local_mss: u16,
    pub(super) rto: RtoEstimator,
    pub(super) retries: u32,
    pub(super) persist_backoff: Duration,
    keepalive_probes: u32,
    last_activity: Instant,
    pub(crate) timers: Timers,
    pub(super) unacked: RetransmitQueue,
    /// Accepted from the application, not yet sent.
    pub(super) outgoing: VecDeque<u8>,
    /// In order, not yet read by the application.
    incoming: VecDeque<u8>,
    recv_capacity: usize,
    send_capacity: usize,
    pub(super) close_requested: bool,
    pub(super) fin_sent: bool,
    pub(super) ack_pending: bool,
}

impl Connection {
    fn new(
        quad: Quad,
        epoch: u64,
        state: State,
        iss: u32,
        config: &TcpConfig,
        now: Instant,
    ) -> Self {
        let mut connection = Self {
            quad,
            epoch,
            state,
            snd: SendSequence::new(iss),
            rcv: ReceiveSequence::default(),
            mss: config.default_mss,
            local_mss: config.local_mss,
            rto: RtoEstimator::new(config),
            retries: 0,
            persist_backoff: config.persist_min,
            keepalive_probes: 0,
            last_activity: now,
            timers: Timers::default(),
            unacked: RetransmitQueue::default(),
            outgoing: VecDeque::new(),
            incoming: VecDeque::new(),
            recv_capacity: config.recv_buffer,
            send_capacity: config.send_buffer,
            close_requested: false,
            fin_sent: false,
            ack_pending: false,
        };
        connection.update_receive_window();
        connection
    }

    pub(crate) fn listen(quad: Quad, epoch: u64, config: &TcpConfig, now: Instant) -> Self {
        Self::new(quad, epoch, State::Listen, 0, config, now)
    }

    /// Active open: sends the SYN.
    pub(crate) fn connect(quad: Quad, epoch: u64, iss: u32, ctx: &mut Ctx<'_>) -> Self {
        let mut connection = Self::new(quad, epoch, State::SynSent, iss, ctx.config, ctx.now);
        connection.transmit(TcpFlags::SYN, Vec::new(), ctx);
        connection.arm(TimerKind::Retransmission, connection.rto.current(), ctx);
        connection.arm(TimerKind::Keepalive, ctx.config.keep_init, ctx);
        connection
    }

    /// Passive open: answers the peer's SYN with a SYN+ACK.
    pub(crate) fn accept(
        quad: Quad,
        epoch: u64,
        iss: u32,
        syn: &Segment<'_>,
        ctx: &mut Ctx<'_>,
    ) -> Self {
        let mut connection = Self::new(quad, epoch, State::SynRcvd, iss, ctx.config, ctx.now);
        connection.rcv.synchronize(syn.seq());
        connection.snd.update_window(syn.seq(), iss, syn.window());
        connection.negotiate_mss(syn.options.mss, ctx.config);
        connection.transmit(TcpFlags::SYN, Vec::new(), ctx);
        connection.arm(TimerKind::Retransmission, connection.rto.current(), ctx);
        connection.arm(TimerKind::Keepalive, ctx.config.keep_init, ctx);
        connection
    }

    fn negotiate_mss(&mut self, peer: Option<u16>, config: &TcpConfig) {
        self.mss = peer
            .unwrap_or(config.default_mss)
            .min(self.local_mss)
            .max(1);
    }

    pub(super) fn arm(&mut self, kind: TimerKind, delay: Duration, ctx: &mut Ctx<'_>) {
        let deadline = ctx.now + delay;
        if self.timers.arm(kind, deadline) {
            self.queue_timer(kind, deadline, ctx);
        }
    }

    pub(super) fn queue_timer(&self, kind: TimerKind, deadline: Instant, ctx: &mut Ctx<'_>) {
        ctx.timers.push(TimerEntry {
            deadline,
            quad: self.quad,
            epoch: self.epoch,
            kind,
        });
    }

    fn set_state(&mut self, state: State) {
        log::debug!("{}: {:?} -> {:?}", self.quad, self.state, state);
        self.state = state;
    }

    fn establish(&mut self, ctx: &mut Ctx<'_>) {
        self.set_state(State::Established);
        self.timers.cancel(TimerKind::Keepalive);
        if ctx.config.keepalive {
            self.arm(TimerKind::Keepalive, ctx.config.keep_idle, ctx);
        }
        ctx.events.push(TcpEvent::Established { quad: self.quad });
    }

    fn enter_time_wait(&mut self, ctx: &mut Ctx<'_>) {
        self.set_state(State::TimeWait);
        self.timers.cancel_all();
        self.unacked.clear();
        self.outgoing.clear();
        self.arm(TimerKind::TwoMsl, ctx.config.time_wait(), ctx);
    }

    pub(super) fn destroy(&mut self, reason: CloseReason, ctx: &mut Ctx<'_>) {
        self.set_state(State::Closed);
        self.timers.cancel_all();
        self.unacked.clear();
        self.outgoing.clear();
        ctx.events.push(TcpEvent::Closed {
            quad: self.quad,
            reason,
        });
    }

    fn update_receive_window(&mut self) {
        let free = self.recv_capacity.saturating_sub(self.incoming.len());
        self.rcv.wnd = free.min(u16::MAX as usize) as u16;
    }

    pub(crate) fn on_segment(&mut self, seg: &Segment<'_>, ctx: &mut Ctx<'_>) {
        self.last_activity = ctx.now;
        self.keepalive_probes = 0;

        match self.state {
            // listeners are served by the table owner and closed
            // connections are never looked up
            State::Closed | State::Listen => {
                log::trace!("{}: ignoring segment in {:?}", self.quad, self.state)
            }
            State::SynSent => self.on_syn_sent(seg, ctx),
            State::TimeWait => self.on_time_wait(seg, ctx),
            _ => self.on_synchronized(seg, ctx),
        }
    }

    fn on_syn_sent(&mut self, seg: &Segment<'_>, ctx: &mut Ctx<'_>) {
        let flags = seg.flags();
        let has_ack = flags.contains(TcpFlags::ACK);
        let ack_ok = has_ack && acceptable_ack(&self.snd, seg.ack());

        if has_ack && !ack_ok {
            log::debug!(
                "{}: unacceptable ack {} in SYN-SENT (una {}, nxt {})",
                self.quad,
                seg.ack(),
                self.snd.una,
                self.snd.nxt
            );
            if !flags.contains(TcpFlags::RST) {
                self.send_reset(seg.ack(), ctx);
            }
            return;
        }

        if flags.contains(TcpFlags::RST) {
            if ack_ok {
                log::info!("{}: connection refused", self.quad);
                self.destroy(CloseReason::Reset, ctx);
            }
            return;
        }

        if !flags.contains(TcpFlags::SYN) {
            return;
        }

        self.rcv.synchronize(seg.seq());
        self.negotiate_mss(seg.options.mss, ctx.config);
        if ack_ok {
            self.on_new_ack(seg.ack(), ctx);
        }

        if after(self.snd.una, self.snd.iss) {
            self.snd.update_window(seg.seq(), seg.ack(), seg.window());
            self.establish(ctx);
            self.ack_pending = true;
            self.on_payload(seg, ctx);
            if flags.contains(TcpFlags::FIN) {
                self.on_fin(seg, ctx);
            }
            self.flush(ctx);
        } else {
            // simultaneous open: our SYN is resent as a SYN+ACK
            self.snd.update_window(seg.seq(), self.snd.una, seg.window());
            self.set_state(State::SynRcvd);
            self.retransmit_oldest(ctx);
        }
    }

    /// Every segment, RST included, restarts 2MSL and is acknowledged.
    fn on_time_wait(&mut self, seg: &Segment<'_>, ctx: &mut Ctx<'_>) {
        log::trace!("{}: {:?} in TIME-WAIT", self.quad, seg.flags());
        self.arm(TimerKind::TwoMsl, ctx.config.time_wait(), ctx);
        self.send_ack(ctx);
    }

    fn on_synchronized(&mut self, seg: &Segment<'_>, ctx: &mut Ctx<'_>) {
        let flags = seg.flags();

        if self.state == State::SynRcvd
            && flags.contains(TcpFlags::SYN)
            && !flags.contains(TcpFlags::ACK)
            && seg.seq() == self.rcv.irs
        {
            log::debug!("{}: peer retransmitted its SYN", self.quad);
            self.retransmit_oldest(ctx);
            return;
        }

        if !is_segment_acceptable(seg.seq(), seg.len(), &self.rcv) {
            log::debug!(
                "{}: unacceptable segment seq={} len={} (rcv.nxt {}, rcv.wnd {})",
                self.quad,
                seg.seq(),
                seg.len(),
                self.rcv.nxt,
                self.rcv.wnd
            );
            if !flags.contains(TcpFlags::RST) {
                self.send_ack(ctx);
            }
            return;
        }

        if flags.contains(TcpFlags::RST) {
            log::info!("{}: connection reset by peer", self.quad);
            self.destroy(CloseReason::Reset, ctx);
            return;
        }

        if flags.contains(TcpFlags::SYN) {
            log::debug!("{}: SYN in window, sending challenge ACK", self.quad);
            self.send_ack(ctx);
            return;
        }

        if !flags.contains(TcpFlags::ACK) {
            return;
        }

        if self.state == State::SynRcvd {
            if !acceptable_ack(&self.snd, seg.ack()) {
                self.send_reset(seg.ack(), ctx);
                return;
            }
            self.snd.update_window(seg.seq(), seg.ack(), seg.window());
            self.establish(ctx);
        }

        if !self.on_ack(seg, ctx) {
            return;
        }

        if flags.contains(TcpFlags::URG) {
            let up = seg.seq().wrapping_add(seg.urgent_pointer() as u32);
            if after(up, self.rcv.up) {
                self.rcv.up = up;
            }
        }

        self.on_payload(seg, ctx);

        if flags.contains(TcpFlags::FIN) {
            self.on_fin(seg, ctx);
        }

        self.flush(ctx);
    }

    /// Returns false when the rest of the segment must not be processed.
    fn on_ack(&mut self, seg: &Segment<'_>, ctx: &mut Ctx<'_>) -> bool {
        let ack = seg.ack();
        if acceptable_ack(&self.snd, ack) {
            self.on_new_ack(ack, ctx);
        } else if after(ack, self.snd.nxt) {
            log::debug!(
                "{}: ack {} for data not yet sent (nxt {})",
                self.quad,
                ack,
                self.snd.nxt
            );
            self.send_ack(ctx);
            return false;
        }

        if before_eq(self.snd.una, ack) && self.snd.is_newer_window(seg.seq(), ack) {
            if self.snd.wnd != seg.window() {
                log::trace!("{}: send window {} -> {}", self.quad, self.snd.wnd, seg.window());
            }
            self.snd.update_window(seg.seq(), ack, seg.window());
        }

        let fin_acked = self.fin_sent && self.snd.una == self.snd.nxt;
        match self.state {
            State::FinWait1 if fin_acked => self.set_state(State::FinWait2),
            State::Closing if fin_acked => {
                self.enter_time_wait(ctx);
                return false;
            }
            State::LastAck if fin_acked => {
                self.destroy(CloseReason::Normal, ctx);
                return false;
            }
            _ => {}
        }
        true
    }

    fn on_new_ack(&mut self, ack: u32, ctx: &mut Ctx<'_>) {
        self.snd.una = ack;
        // Karn: a backed-off RTO stands until an unambiguous sample arrives
        if let Some(rtt) = self.unacked.acknowledge(ack, ctx.now) {
            self.rto.sample(rtt);
        }
        self.retries = 0;

        if self.snd.una == self.snd.nxt {
            self.timers.cancel(TimerKind::Retransmission);
        } else {
            self.arm(TimerKind::Retransmission, self.rto.current(), ctx);
        }
    }

    fn on_payload(&mut self, seg: &Segment<'_>, ctx: &mut Ctx<'_>) {
        if seg.payload.is_empty() {
            return;
        }
        if !self.state.accepts_data() {
            log::debug!("{}: discarding data in {:?}", self.quad, self.state);
            return;
        }

        let mut seq = seg.seq();
        if seg.flags().contains(TcpFlags::SYN) {
            seq = seq.wrapping_add(1);
        }
        let mut data = seg.payload;
        if before(seq, self.rcv.nxt) {
            let duplicate = self.rcv.nxt.wrapping_sub(seq) as usize;
            if duplicate >= data.len() {
                self.ack_pending = true;
                return;
            }
            data = &data[duplicate..];
            seq = self.rcv.nxt;
        }

        if seq != self.rcv.nxt {
            log::debug!(
                "{}: out of order segment at {} (expected {}), dropping",
                self.quad,
                seq,
                self.rcv.nxt
            );
            self.ack_pending = true;
            return;
        }

        let take = data.len().min(self.rcv.wnd as usize);
        self.incoming.extend(&data[..take]);
        self.rcv.nxt = self.rcv.nxt.wrapping_add(take as u32);
        self.update_receive_window();
        self.ack_pending = true;
        if take > 0 {
            ctx.events.push(TcpEvent::Readable { quad: self.quad });
        }
    }

    fn on_fin(&mut self, seg: &Segment<'_>, ctx: &mut Ctx<'_>) {
        let fin_seq = seg
            .seq()
            .wrapping_add(seg.flags().contains(TcpFlags::SYN) as u32)
            .wrapping_add(seg.payload.len() as u32);
        if fin_seq != self.rcv.nxt {
            log::debug!(
                "{}: ignoring FIN at {} (rcv.nxt {})",
                self.quad,
                fin_seq,
                self.rcv.nxt
            );
            return;
        }

        self.rcv.nxt = self.rcv.nxt.wrapping_add(1);
        self.ack_pending = true;
        ctx.events.push(TcpEvent::PeerClosed { quad: self.quad });

        match self.state {
            State::SynRcvd | State::Established => self.set_state(State::CloseWait),
            State::FinWait1 => self.set_state(State::Closing),
            State::FinWait2 => self.enter_time_wait(ctx),
            _ => {}
        }
    }

    pub(crate) fn on_timer(&mut self, kind: TimerKind, ctx: &mut Ctx<'_>) {
        match kind {
            TimerKind::Retransmission => self.on_retransmission_timeout(ctx),
            TimerKind::Persist => self.on_persist_timeout(ctx),
            TimerKind::Keepalive => self.on_keepalive_timeout(ctx),
            TimerKind::TwoMsl => {
                log::debug!("{}: TIME-WAIT over", self.quad);
                self.destroy(CloseReason::Normal, ctx);
            }
        }
    }

    fn on_retransmission_timeout(&mut self, ctx: &mut Ctx<'_>) {
        if self.unacked.is_empty() {
            return;
        }

        self.retries += 1;
        if self.retries >= ctx.config.max_retransmissions {
            log::warn!(
                "{}: no acknowledgment after {} retransmissions, giving up",
                self.quad,
                self.retries - 1
            );
            self.destroy(CloseReason::TimedOut, ctx);
            return;
        }

        self.rto.back_off();
        log::debug!(
            "{}: retransmitting {} (attempt {}, next rto {:?})",
            self.quad,
            self.snd.una,
            self.retries,
            self.rto.current()
        );
        self.retransmit_oldest(ctx);
        self.arm(TimerKind::Retransmission, self.rto.current(), ctx);
    }

    fn on_keepalive_timeout(&mut self, ctx: &mut Ctx<'_>) {
        match self.state {
            State::SynSent | State::SynRcvd => {
                log::warn!("{}: connection establishment timed out", self.quad);
                self.destroy(CloseReason::TimedOut, ctx);
            }
            State::Established | State::CloseWait if ctx.config.keepalive => {
                let idle = ctx.now.saturating_duration_since(self.last_activity);
                if idle < ctx.config.keep_idle {
                    self.arm(TimerKind::Keepalive, ctx.config.keep_idle - idle, ctx);
                    return;
                }
                if self.keepalive_probes >= ctx.config.keep_count {
                    log::warn!("{}: keepalive got no answer", self.quad);
                    self.destroy(CloseReason::TimedOut, ctx);
                    return;
                }
                self.keepalive_probes += 1;
                self.send_keepalive_probe(ctx);
                self.arm(TimerKind::Keepalive, ctx.config.keep_interval, ctx);
            }
            _ => {}
        }
    }

    pub(crate) fn send(&mut self, data: &[u8], ctx: &mut Ctx<'_>) -> Result<usize> {
        if self.close_requested {
            return Err(Error::Closing);
        }
        if !self.state.can_send() {
            return Err(Error::InvalidState {
                state: self.state,
                op: "send",
            });
        }

        let room = self.send_capacity.saturating_sub(self.outgoing.len());
        if room == 0 && !data.is_empty() {
            return Err(Error::BufferFull);
        }
        let n = data.len().min(room);
        self.outgoing.extend(&data[..n]);
        self.flush(ctx);
        Ok(n)
    }

    pub(crate) fn recv(&mut self, buf: &mut [u8], ctx: &mut Ctx<'_>) -> Result<usize> {
        if self.state == State::Listen {
            return Err(Error::InvalidState {
                state: self.state,
                op: "recv",
            });
        }
        if self.incoming.is_empty() {
            if self.state.peer_closed() {
                return Ok(0);
            }
            return Err(io::Error::from(io::ErrorKind::WouldBlock).into());
        }

        let n = buf.len().min(self.incoming.len());
        for (dst, src) in buf.iter_mut().zip(self.incoming.drain(..n)) {
            *dst = src;
        }

        let old_wnd = self.rcv.wnd;
        self.update_receive_window();
        let mss = self.mss;
        if old_wnd < mss && self.rcv.wnd >= mss && self.state.is_synchronized() {
            log::trace!("{}: window reopened to {}", self.quad, self.rcv.wnd);
            self.send_ack(ctx);
        }
        Ok(n)
    }

    pub(crate) fn close(&mut self, ctx: &mut Ctx<'_>) -> Result<()> {
        match self.state {
            State::Listen | State::SynSent => {
                self.destroy(CloseReason::Normal, ctx);
                Ok(())
            }
            State::SynRcvd | State::Established | State::CloseWait if !self.close_requested => {
                self.close_requested = true;
                self.flush(ctx);
                Ok(())
            }
            _ => Err(Error::Closing),
        }
    }

    pub(crate) fn abort(&mut self, ctx: &mut Ctx<'_>) {
        if matches!(
            self.state,
            State::SynRcvd
                | State::Established
                | State::CloseWait
                | State::FinWait1
                | State::FinWait2
                | State::Closing
                | State::LastAck
        ) {
            self.send_reset(self.snd.nxt, ctx);
        }
        self.destroy(CloseReason::Aborted, ctx);
    }

    pub(crate) fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            quad: self.quad,
            state: self.state,
            iss: self.snd.iss,
            irs: self.rcv.irs,
            snd_una: self.snd.una,
            snd_nxt: self.snd.nxt,
            snd_wnd: self.snd.wnd,
            snd_wl1: self.snd.wl1,
            snd_wl2: self.snd.wl2,
            rcv_nxt: self.rcv.nxt,
            rcv_wnd: self.rcv.wnd,
            rcv_up: self.rcv.up,
            mss: self.mss,
            srtt: self.rto.srtt(),
            rto: self.rto.current(),
            retries: self.retries,
            unacked_segments: self.unacked.len(),
            send_queue: self.outgoing.len(),
            recv_queue: self.incoming.len(),
            timers: self.timers.armed_kinds(),
        }
    }
}
