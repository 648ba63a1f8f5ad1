//! Sequence number spaces and modulo-2<sup>32</sup> arithmetic (RFC 793, S3.3).

mod receive_sequence;
mod send_sequence;

pub use receive_sequence::ReceiveSequence;
pub use send_sequence::SendSequence;

/// `a` comes strictly before `b` in sequence space.
///
/// Defined by the sign of the wrapping difference, so it stays meaningful
/// across the 2<sup>32</sup> wraparound as long as the two points are less
/// than 2<sup>31</sup> apart.
#[inline]
pub fn before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

#[inline]
pub fn before_eq(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) <= 0
}

#[inline]
pub fn after(a: u32, b: u32) -> bool {
    before(b, a)
}

#[inline]
pub fn after_eq(a: u32, b: u32) -> bool {
    before_eq(b, a)
}

/// `start < x <= end`, the range used to validate acknowledgments.
#[inline]
pub fn in_left_open(start: u32, x: u32, end: u32) -> bool {
    after(x, start) && before_eq(x, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn before_is_wraparound_aware() {
        assert!(before(1, 2));
        assert!(!before(2, 1));
        assert!(!before(7, 7));
        assert!(before(u32::MAX - 5, 3));
        assert!(after(3, u32::MAX - 5));
        assert!(before_eq(7, 7));
        assert!(after_eq(7, 7));
    }

    #[test]
    fn before_is_transitive_within_half_space() {
        let starts = [0u32, 1, 1 << 30, (1 << 31) - 1, u32::MAX - 100, u32::MAX];
        let steps = [1u32, 17, 1 << 20, (1 << 30) - 1];
        for &a in &starts {
            for &s1 in &steps {
                for &s2 in &steps {
                    let b = a.wrapping_add(s1);
                    let c = b.wrapping_add(s2);
                    assert!(before(a, b), "{a} {b}");
                    assert!(before(b, c), "{b} {c}");
                    assert!(before(a, c), "{a} {c}");
                }
            }
        }
    }

    #[test]
    fn left_open_range() {
        assert!(in_left_open(100, 101, 101));
        assert!(!in_left_open(100, 100, 101));
        assert!(!in_left_open(100, 102, 101));
        assert!(in_left_open(u32::MAX, 0, 1));
        assert!(!in_left_open(5, 5, 5));
    }
}
