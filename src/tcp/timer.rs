//! Per-connection timers and the deadline queue that drives them.
//!
//! Each connection remembers, for every [`TimerKind`], the deadline it is
//! armed for and the deadline of the one entry it has in the shared
//! [`TimerQueue`]. Re-arming to a later deadline leaves that entry in place;
//! when it pops, the connection pushes a fresh entry for the real deadline.
//! The queue therefore holds at most one entry per connection and kind. An
//! entry acts only if the connection still exists with the same epoch.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::Quad;
use crate::config::TcpConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    Retransmission,
    Persist,
    /// Keep-alive, or connection-establishment before the handshake
    /// completes.
    Keepalive,
    TwoMsl,
}

impl TimerKind {
    pub const ALL: [TimerKind; 4] = [
        TimerKind::Retransmission,
        TimerKind::Persist,
        TimerKind::Keepalive,
        TimerKind::TwoMsl,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Which periodic tick serves this timer.
    pub fn tick(self) -> Tick {
        match self {
            TimerKind::Retransmission => Tick::Fast,
            TimerKind::Persist | TimerKind::Keepalive | TimerKind::TwoMsl => Tick::Slow,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Fast,
    Slow,
}

/// What a popped queue entry means for its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expiry {
    /// Superseded or cancelled; nothing to do.
    Stale,
    /// Re-armed for later; push an entry for this deadline.
    Pending(Instant),
    Due,
}

#[derive(Debug, Default, Clone, Copy)]
struct Slot {
    deadline: Option<Instant>,
    queued: Option<Instant>,
}

#[derive(Debug, Default)]
pub(crate) struct Timers {
    slots: [Slot; 4],
}

impl Timers {
    /// Arms (or re-arms) `kind` for `deadline`. Returns whether a new queue
    /// entry must be pushed; an entry already queued no later than
    /// `deadline` is reused.
    pub fn arm(&mut self, kind: TimerKind, deadline: Instant) -> bool {
        let slot = &mut self.slots[kind.index()];
        slot.deadline = Some(deadline);
        match slot.queued {
            Some(queued) if queued <= deadline => false,
            _ => {
                slot.queued = Some(deadline);
                true
            }
        }
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.slots[kind.index()].deadline = None;
    }

    pub fn cancel_all(&mut self) {
        for slot in &mut self.slots {
            slot.deadline = None;
        }
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.slots[kind.index()].deadline.is_some()
    }

    pub fn armed_kinds(&self) -> Vec<TimerKind> {
        TimerKind::ALL
            .into_iter()
            .filter(|kind| self.is_armed(*kind))
            .collect()
    }

    /// Resolves a popped entry for `kind` that was queued for `queued`.
    /// A due timer is disarmed.
    pub fn expire(&mut self, kind: TimerKind, queued: Instant, now: Instant) -> Expiry {
        let slot = &mut self.slots[kind.index()];
        if slot.queued != Some(queued) {
            return Expiry::Stale;
        }
        slot.queued = None;
        match slot.deadline {
            None => Expiry::Stale,
            Some(deadline) if deadline <= now => {
                slot.deadline = None;
                Expiry::Due
            }
            Some(deadline) => {
                slot.queued = Some(deadline);
                Expiry::Pending(deadline)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct TimerEntry {
    pub deadline: Instant,
    pub quad: Quad,
    pub epoch: u64,
    pub kind: TimerKind,
}

#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    fast: Mutex<BinaryHeap<Reverse<TimerEntry>>>,
    slow: Mutex<BinaryHeap<Reverse<TimerEntry>>>,
}

impl TimerQueue {
    fn heap(&self, tick: Tick) -> &Mutex<BinaryHeap<Reverse<TimerEntry>>> {
        match tick {
            Tick::Fast => &self.fast,
            Tick::Slow => &self.slow,
        }
    }

    pub fn schedule(&self, entry: TimerEntry) {
        self.heap(entry.kind.tick()).lock().push(Reverse(entry));
    }

    /// Pops every entry of this tick class due at `now`, earliest first.
    pub fn expired(&self, tick: Tick, now: Instant) -> Vec<TimerEntry> {
        let mut heap = self.heap(tick).lock();
        let mut due = Vec::new();
        while let Some(Reverse(entry)) = heap.peek() {
            if entry.deadline > now {
                break;
            }
            due.push(*entry);
            heap.pop();
        }
        due
    }

    pub fn len(&self) -> usize {
        self.fast.lock().len() + self.slow.lock().len()
    }
}

/// Retransmission timeout estimator (RFC 6298).
#[derive(Debug, Clone)]
pub(crate) struct RtoEstimator {
    srtt: Option<Duration>,
    rttvar: Duration,
    rto: Duration,
    initial: Duration,
    min: Duration,
    max: Duration,
    granularity: Duration,
}

impl RtoEstimator {
    pub fn new(config: &TcpConfig) -> Self {
        let mut estimator = Self {
            srtt: None,
            rttvar: Duration::ZERO,
            rto: config.rto_initial,
            initial: config.rto_initial,
            min: config.rto_min,
            max: config.rto_max,
            granularity: config.fast_tick,
        };
        estimator.reset();
        estimator
    }

    pub fn current(&self) -> Duration {
        self.rto
    }

    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    /// First sample: SRTT = R, RTTVAR = R/2.
    /// Later:        RTTVAR = 3/4 RTTVAR + 1/4 |SRTT - R|, SRTT = 7/8 SRTT + 1/8 R.
    pub fn sample(&mut self, rtt: Duration) {
        match self.srtt {
            None => {
                self.srtt = Some(rtt);
                self.rttvar = rtt / 2;
            }
            Some(srtt) => {
                self.rttvar = self.rttvar * 3 / 4 + srtt.abs_diff(rtt) / 4;
                self.srtt = Some(srtt * 7 / 8 + rtt / 8);
            }
        }
        self.reset();
    }

    /// Exponential backoff after a timeout.
    pub fn back_off(&mut self) {
        self.rto = (self.rto * 2).clamp(self.min, self.max);
    }

    /// Recomputes the timeout from the current estimate, dropping any
    /// backoff.
    fn reset(&mut self) {
        let rto = match self.srtt {
            Some(srtt) => srtt + self.granularity.max(self.rttvar * 4),
            None => self.initial,
        };
        self.rto = rto.clamp(self.min, self.max);
    }
}
