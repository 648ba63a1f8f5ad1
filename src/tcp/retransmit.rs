//! Segments that consumed sequence space and wait for acknowledgment.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::header::TcpFlags;
use crate::sequence::{before, before_eq};

#[derive(Debug, Clone)]
pub(crate) struct Unacked {
    pub seq: u32,
    /// SYN and/or FIN; other bits are derived from the state on resend.
    pub flags: TcpFlags,
    pub payload: Vec<u8>,
    pub sent_at: Instant,
    pub retransmitted: bool,
}

impl Unacked {
    pub fn len(&self) -> u32 {
        self.payload.len() as u32
            + self.flags.contains(TcpFlags::SYN) as u32
            + self.flags.contains(TcpFlags::FIN) as u32
    }

    /// One past the last sequence number of this segment.
    pub fn end(&self) -> u32 {
        self.seq.wrapping_add(self.len())
    }
}

#[derive(Debug, Default)]
pub(crate) struct RetransmitQueue {
    segments: VecDeque<Unacked>,
}

impl RetransmitQueue {
    pub fn push(&mut self, segment: Unacked) {
        self.segments.push_back(segment);
    }

    pub fn front_mut(&mut self) -> Option<&mut Unacked> {
        self.segments.front_mut()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }

    /// Releases everything before `una`, trimming a partially acknowledged
    /// head. Returns an RTT sample from the newest fully acknowledged
    /// segment that was never retransmitted (Karn).
    pub fn acknowledge(&mut self, una: u32, now: Instant) -> Option<Duration> {
        let mut sample = None;
        while let Some(front) = self.segments.front_mut() {
            if before_eq(front.end(), una) {
                if !front.retransmitted {
                    sample = Some(now.saturating_duration_since(front.sent_at));
                }
                self.segments.pop_front();
                continue;
            }

            if before(front.seq, una) {
                let mut acked = una.wrapping_sub(front.seq);
                if front.flags.contains(TcpFlags::SYN) {
                    front.flags.remove(TcpFlags::SYN);
                    front.seq = front.seq.wrapping_add(1);
                    acked -= 1;
                }
                let n = (acked as usize).min(front.payload.len());
                front.payload.drain(..n);
                front.seq = front.seq.wrapping_add(n as u32);
            }
            break;
        }
        sample
    }
}
