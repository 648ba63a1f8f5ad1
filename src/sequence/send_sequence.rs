/// Send Sequence Space (RFC 793, p. 20)
///
/// ```text
///            1         2          3          4
///       ----------|----------|----------|----------
///              SND.UNA    SND.NXT    SND.UNA
///                                   +SND.WND
///
/// 1 - old sequence numbers which have been acknowledged
/// 2 - sequence numbers of unacknowledged data
/// 3 - sequence numbers allowed for new data transmission
/// 4 - future sequence numbers which are not yet allowed
/// ```
#[derive(Debug, Clone, Default)]
pub struct SendSequence {
    /// oldest unacknowledged sequence number
    pub una: u32,
    /// next sequence number to be sent
    pub nxt: u32,
    /// send window
    pub wnd: u16,
    /// send urgent pointer
    pub up: u32,
    /// segment sequence number used for last window update
    pub wl1: u32,
    /// segment acknowledgment number used for last window update
    pub wl2: u32,
    /// initial send sequence number
    pub iss: u32,
}

impl SendSequence {
    /// Sequence space for a connection that is about to send its SYN.
    pub fn new(iss: u32) -> Self {
        Self {
            una: iss,
            nxt: iss,
            iss,
            ..Default::default()
        }
    }

    /// Sequence numbers sent but not yet acknowledged.
    pub fn in_flight(&self) -> u32 {
        self.nxt.wrapping_sub(self.una)
    }

    /// `(seq, ack)` carries a newer window than the one recorded in
    /// `wl1`/`wl2`: strictly newer sequence, or the same sequence with a
    /// newer-or-equal acknowledgment.
    pub fn is_newer_window(&self, seq: u32, ack: u32) -> bool {
        super::before(self.wl1, seq) || (self.wl1 == seq && super::before_eq(self.wl2, ack))
    }

    pub fn update_window(&mut self, seq: u32, ack: u32, wnd: u16) {
        self.wnd = wnd;
        self.wl1 = seq;
        self.wl2 = ack;
    }
}
