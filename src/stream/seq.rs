//! Wraparound-aware TCP sequence number comparison.

const SEQ_SPACE: i64 = 1 << 32;
/// Distance from either end of the sequence space within which a pair of
/// numbers is assumed to straddle the wrap point.
const SEQ_WINDOW: u32 = 1 << 21;

/// Signed distance from `b` to `a`: positive when `a` is logically after `b`.
///
/// When one value sits just below `2^32` and the other just above zero, the
/// smaller one has wrapped and is lifted by `2^32` before subtracting.
pub fn seq_compare(a: u32, b: u32) -> i64 {
    let (mut a, mut b) = (i64::from(a), i64::from(b));
    let near_top = |v: i64| v > SEQ_SPACE - i64::from(SEQ_WINDOW);
    let near_zero = |v: i64| v < i64::from(SEQ_WINDOW);

    if near_top(a) && near_zero(b) {
        b += SEQ_SPACE;
    } else if near_zero(a) && near_top(b) {
        a += SEQ_SPACE;
    }
    a - b
}
