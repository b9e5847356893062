/// Protocol time.
///
/// Ticks are whole seconds of local uptime as reported by the platform
/// clock. Arithmetic is wrapping so a clock that rolls over keeps working.

/// Whole seconds of local uptime.
pub type Tick = u32;

/// Seconds elapsed from `since` to `now`.
///
/// Differences in the upper half of the `u32` range mean `since` lies in the
/// future (timer jitter, a sweep racing a reception) and read as zero.
#[inline]
pub fn elapsed(now: Tick, since: Tick) -> u32 {
    let diff = now.wrapping_sub(since);
    if diff > u32::MAX / 2 {
        0
    } else {
        diff
    }
}

/// Whether at least `threshold` seconds have passed since `since`.
#[inline]
pub fn reached(now: Tick, since: Tick, threshold: u32) -> bool {
    elapsed(now, since) >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_forward() {
        assert_eq!(elapsed(45, 15), 30);
        assert_eq!(elapsed(7, 7), 0);
    }

    #[test]
    fn elapsed_across_wrap() {
        assert_eq!(elapsed(4, u32::MAX - 5), 10);
    }

    #[test]
    fn elapsed_future_since_is_zero() {
        assert_eq!(elapsed(10, 12), 0);
    }

    #[test]
    fn reached_is_inclusive() {
        assert!(reached(30, 0, 30));
        assert!(!reached(29, 0, 30));
    }
}
