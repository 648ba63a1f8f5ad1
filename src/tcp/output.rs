//! Building and sending segments on behalf of a connection.

use etherparse::TcpHeader;

use super::connection::Connection;
use super::retransmit::Unacked;
use super::timer::TimerKind;
use super::{Ctx, Outbound, State};
use crate::header::{encode_segment, TcpFlags, TcpHeaderBuilder};

impl Connection {
    fn header_builder(&self) -> TcpHeaderBuilder {
        TcpHeaderBuilder::new(self.quad.local.port(), self.quad.remote.port(), self.rcv.wnd)
    }

    fn emit(&mut self, mut header: TcpHeader, payload: &[u8], ctx: &mut Ctx<'_>) {
        if header.ack {
            self.ack_pending = false;
        }
        log::trace!(
            "{}: send {:?} seq={} ack={} wnd={} len={}",
            self.quad,
            TcpFlags::of(&header),
            header.sequence_number,
            header.acknowledgment_number,
            header.window_size,
            payload.len()
        );

        let source = *self.quad.local.ip();
        let destination = *self.quad.remote.ip();
        match encode_segment(&mut header, source, destination, payload) {
            Ok(bytes) => ctx.segments.push(Outbound {
                source,
                destination,
                bytes,
            }),
            Err(e) => log::warn!("{}: dropping outgoing segment: {}", self.quad, e),
        }
    }

    /// Builds the segment occupying `seq..` with the control bits the
    /// current state calls for.
    fn emit_sequenced(&mut self, seq: u32, flags: TcpFlags, payload: &[u8], ctx: &mut Ctx<'_>) {
        let builder = self.header_builder();
        let header = if flags.contains(TcpFlags::SYN) {
            if self.state == State::SynSent {
                builder.create_syn(seq, self.local_mss)
            } else {
                builder.create_syn_ack(seq, self.rcv.nxt, self.local_mss)
            }
        } else if flags.contains(TcpFlags::FIN) {
            Ok(builder.create_fin(seq, self.rcv.nxt))
        } else {
            Ok(builder.create_data(seq, self.rcv.nxt))
        };

        match header {
            Ok(header) => self.emit(header, payload, ctx),
            Err(e) => log::warn!("{}: failed to build segment: {}", self.quad, e),
        }
    }

    /// Sends new sequence space and keeps it for retransmission.
    pub(super) fn transmit(&mut self, flags: TcpFlags, payload: Vec<u8>, ctx: &mut Ctx<'_>) {
        let seq = self.snd.nxt;
        self.emit_sequenced(seq, flags, &payload, ctx);
        let segment = Unacked {
            seq,
            flags,
            payload,
            sent_at: ctx.now,
            retransmitted: false,
        };
        self.snd.nxt = segment.end();
        self.unacked.push(segment);
    }

    pub(super) fn retransmit_oldest(&mut self, ctx: &mut Ctx<'_>) {
        let Some(front) = self.unacked.front_mut() else {
            return;
        };
        front.retransmitted = true;
        let (seq, flags, payload) = (front.seq, front.flags, front.payload.clone());
        self.emit_sequenced(seq, flags, &payload, ctx);
    }

    pub(super) fn send_ack(&mut self, ctx: &mut Ctx<'_>) {
        let header = self.header_builder().create_ack(self.snd.nxt, self.rcv.nxt);
        self.emit(header, &[], ctx);
    }

    pub(super) fn send_reset(&mut self, seq: u32, ctx: &mut Ctx<'_>) {
        let header = self.header_builder().create_rst(seq);
        self.emit(header, &[], ctx);
    }

    /// An old sequence number forces the peer to answer with an ACK.
    pub(super) fn send_keepalive_probe(&mut self, ctx: &mut Ctx<'_>) {
        let header = self
            .header_builder()
            .create_ack(self.snd.nxt.wrapping_sub(1), self.rcv.nxt);
        self.emit(header, &[], ctx);
    }

    fn ensure_retransmission_timer(&mut self, ctx: &mut Ctx<'_>) {
        if !self.timers.is_armed(TimerKind::Retransmission) && !self.unacked.is_empty() {
            self.arm(TimerKind::Retransmission, self.rto.current(), ctx);
        }
    }

    /// Sends whatever the peer's window allows, then the FIN once the
    /// application has closed and everything else went out. Ends with a
    /// pure ACK if one is still owed.
    pub(super) fn flush(&mut self, ctx: &mut Ctx<'_>) {
        if matches!(self.state, State::Established | State::CloseWait) {
            while !self.outgoing.is_empty() {
                let in_flight = self.snd.in_flight();
                let wnd = self.snd.wnd as u32;
                if in_flight >= wnd {
                    break;
                }
                let n = (wnd - in_flight)
                    .min(self.mss as u32)
                    .min(self.outgoing.len() as u32) as usize;
                let payload: Vec<u8> = self.outgoing.drain(..n).collect();
                self.transmit(TcpFlags::empty(), payload, ctx);
                self.ensure_retransmission_timer(ctx);
            }

            if self.close_requested && !self.fin_sent && self.outgoing.is_empty() {
                self.transmit(TcpFlags::FIN, Vec::new(), ctx);
                self.fin_sent = true;
                self.ensure_retransmission_timer(ctx);
                let next = if self.state == State::Established {
                    State::FinWait1
                } else {
                    State::LastAck
                };
                log::debug!("{}: {:?} -> {:?}", self.quad, self.state, next);
                self.state = next;
            }

            self.update_persist(ctx);
        }

        if self.ack_pending {
            self.send_ack(ctx);
        }
    }

    /// The persist timer runs while the peer's window is shut and data is
    /// waiting with nothing in flight.
    fn update_persist(&mut self, ctx: &mut Ctx<'_>) {
        let persisting = self.timers.is_armed(TimerKind::Persist);
        if self.snd.wnd == 0 {
            if !persisting && !self.outgoing.is_empty() && self.unacked.is_empty() {
                self.persist_backoff = self
                    .rto
                    .current()
                    .clamp(ctx.config.persist_min, ctx.config.persist_max);
                log::debug!("{}: zero window, persisting", self.quad);
                self.arm(TimerKind::Persist, self.persist_backoff, ctx);
            }
        } else if persisting {
            self.timers.cancel(TimerKind::Persist);
            self.ensure_retransmission_timer(ctx);
        }
    }

    pub(super) fn on_persist_timeout(&mut self, ctx: &mut Ctx<'_>) {
        if self.snd.wnd != 0 {
            return;
        }
        if !self.unacked.is_empty() {
            self.retransmit_oldest(ctx);
        } else if let Some(byte) = self.outgoing.pop_front() {
            log::debug!("{}: zero window probe", self.quad);
            self.transmit(TcpFlags::empty(), vec![byte], ctx);
        } else {
            return;
        }
        self.persist_backoff =
            (self.persist_backoff * 2).clamp(ctx.config.persist_min, ctx.config.persist_max);
        self.arm(TimerKind::Persist, self.persist_backoff, ctx);
    }
}
