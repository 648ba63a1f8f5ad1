//! Segment acceptability checks (RFC 793, p. 69).

use crate::sequence::{in_left_open, ReceiveSequence, SendSequence};

/// `start <= x < end` modulo 2^32. An empty range contains nothing.
pub fn is_included_in_wrapped_boundary(start: u32, x: u32, end: u32) -> bool {
    x.wrapping_sub(start) < end.wrapping_sub(start)
}

// SEG.SEQ = RCV.NXT
pub fn check_zero_len_packet_zero_wnd(seg_seq: u32, rcv_nxt: u32) -> bool {
    seg_seq == rcv_nxt
}

// RCV.NXT =< SEG.SEQ < RCV.NXT+RCV.WND
pub fn check_zero_len_packet_nonzero_wnd(seg_seq: u32, rcv_nxt: u32, rcv_wnd: u32) -> bool {
    is_included_in_wrapped_boundary(rcv_nxt, seg_seq, rcv_nxt.wrapping_add(rcv_wnd))
}

// RCV.NXT =< SEG.SEQ < RCV.NXT+RCV.WND
// or
// RCV.NXT =< SEG.SEQ+SEG.LEN-1 < RCV.NXT+RCV.WND
pub fn check_both_ends_inside_window(
    seg_seq: u32,
    seg_len: u32,
    rcv_nxt: u32,
    rcv_wnd: u32,
) -> bool {
    let wnd_end = rcv_nxt.wrapping_add(rcv_wnd);
    is_included_in_wrapped_boundary(rcv_nxt, seg_seq, wnd_end)
        || is_included_in_wrapped_boundary(
            rcv_nxt,
            seg_seq.wrapping_add(seg_len).wrapping_sub(1),
            wnd_end,
        )
}

// SND.UNA < SEG.ACK =< SND.NXT
pub fn acceptable_ack(snd: &SendSequence, seg_ack: u32) -> bool {
    in_left_open(snd.una, seg_ack, snd.nxt)
}

/// Whether any part of a segment occupying `seg_len` sequence numbers from
/// `seg_seq` falls inside the receive window.
pub fn is_segment_acceptable(seg_seq: u32, seg_len: u32, rcv: &ReceiveSequence) -> bool {
    let rcv_wnd = rcv.wnd as u32;
    match (seg_len, rcv_wnd) {
        (0, 0) => check_zero_len_packet_zero_wnd(seg_seq, rcv.nxt),
        (0, _) => check_zero_len_packet_nonzero_wnd(seg_seq, rcv.nxt, rcv_wnd),
        (_, 0) => false,
        (_, _) => check_both_ends_inside_window(seg_seq, seg_len, rcv.nxt, rcv_wnd),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rcv(nxt: u32, wnd: u16) -> ReceiveSequence {
        ReceiveSequence {
            nxt,
            wnd,
            ..Default::default()
        }
    }

    #[test]
    fn wrapped_boundary() {
        assert!(is_included_in_wrapped_boundary(10, 10, 20));
        assert!(is_included_in_wrapped_boundary(10, 19, 20));
        assert!(!is_included_in_wrapped_boundary(10, 20, 20));
        assert!(!is_included_in_wrapped_boundary(10, 9, 20));
        assert!(is_included_in_wrapped_boundary(u32::MAX - 2, 1, 5));
        assert!(!is_included_in_wrapped_boundary(7, 7, 7));
    }

    #[test]
    fn zero_length_segments() {
        assert!(is_segment_acceptable(100, 0, &rcv(100, 0)));
        assert!(!is_segment_acceptable(101, 0, &rcv(100, 0)));
        assert!(is_segment_acceptable(150, 0, &rcv(100, 100)));
        assert!(!is_segment_acceptable(200, 0, &rcv(100, 100)));
        assert!(!is_segment_acceptable(99, 0, &rcv(100, 100)));
    }

    #[test]
    fn data_segments() {
        // zero window never accepts data
        assert!(!is_segment_acceptable(100, 10, &rcv(100, 0)));
        // overlapping the left edge
        assert!(is_segment_acceptable(95, 10, &rcv(100, 100)));
        // entirely below the window: a duplicate
        assert!(!is_segment_acceptable(90, 10, &rcv(100, 100)));
        // overlapping the right edge
        assert!(is_segment_acceptable(199, 10, &rcv(100, 100)));
        assert!(!is_segment_acceptable(200, 10, &rcv(100, 100)));
        // across the wraparound
        assert!(is_segment_acceptable(u32::MAX - 3, 10, &rcv(u32::MAX - 1, 100)));
    }

    #[test]
    fn ack_range() {
        let snd = SendSequence {
            una: 100,
            nxt: 110,
            ..Default::default()
        };
        assert!(!acceptable_ack(&snd, 100));
        assert!(acceptable_ack(&snd, 101));
        assert!(acceptable_ack(&snd, 110));
        assert!(!acceptable_ack(&snd, 111));
    }
}
