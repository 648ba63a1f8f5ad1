/// Receive Sequence Space (RFC 793, p. 20)
///
/// ```text
///     1          2          3
/// ----------|----------|----------
///        RCV.NXT    RCV.NXT
///                  +RCV.WND
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReceiveSequence {
    /// next sequence number expected on an incoming segments, and
    /// is the left or lower edge of the receive window
    pub nxt: u32,
    /// receive window
    pub wnd: u16,
    /// receive urgent pointer
    pub up: u32,
    /// initial receive sequence number
    pub irs: u32,
}

impl ReceiveSequence {
    /// Synchronize with the peer's SYN.
    pub fn synchronize(&mut self, irs: u32) {
        self.irs = irs;
        self.nxt = irs.wrapping_add(1);
        self.up = irs;
    }
}
