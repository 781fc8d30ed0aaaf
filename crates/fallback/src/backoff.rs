//! Exponential backoff with jitter, pure functions over milliseconds so
//! they're testable without a clock or a queue.

use rand::Rng;

/// `delay = min(maxDelay, baseDelay * 2^(attempts-1))`, `attempts >= 1`.
pub fn backoff_ms(attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    let exponent = attempts.saturating_sub(1).min(63);
    let scaled = base_delay_ms.saturating_mul(1u64 << exponent);
    scaled.min(max_delay_ms)
}

/// `backoff_ms` plus uniform jitter in `[0, delay/2]`.
pub fn backoff_with_jitter_ms(attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    let delay = backoff_ms(attempts, base_delay_ms, max_delay_ms);
    let jitter_bound = delay / 2;
    let jitter = if jitter_bound == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_bound)
    };
    delay + jitter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_uses_base_delay() {
        assert_eq!(backoff_ms(1, 2_000, 60_000), 2_000);
    }

    #[test]
    fn doubles_per_attempt() {
        assert_eq!(backoff_ms(2, 2_000, 60_000), 4_000);
        assert_eq!(backoff_ms(3, 2_000, 60_000), 8_000);
        assert_eq!(backoff_ms(4, 2_000, 60_000), 16_000);
    }

    #[test]
    fn caps_at_max_delay() {
        assert_eq!(backoff_ms(10, 2_000, 60_000), 60_000);
    }

    #[test]
    fn never_overflows_on_large_attempt_counts() {
        assert_eq!(backoff_ms(u32::MAX, 2_000, 60_000), 60_000);
    }

    #[test]
    fn jitter_never_more_than_doubles_the_base_delay() {
        for attempts in 1..12 {
            let base = backoff_ms(attempts, 2_000, 60_000);
            for _ in 0..50 {
                let jittered = backoff_with_jitter_ms(attempts, 2_000, 60_000);
                assert!(jittered >= base);
                assert!(jittered <= base + base / 2);
            }
        }
    }

    proptest::proptest! {
        #[test]
        fn backoff_is_monotonic_in_attempts(a in 1u32..20, b in 1u32..20) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            proptest::prop_assert!(backoff_ms(lo, 2_000, 60_000) <= backoff_ms(hi, 2_000, 60_000));
        }
    }
}
