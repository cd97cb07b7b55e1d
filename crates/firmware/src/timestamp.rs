//! Microsecond timestamps from the system tick counter
//!
//! The tick counter counts down from `counter_top` to zero once per
//! millisecond at the core clock rate and re-arms, so one period is
//! `counter_top + 1` ticks; a separate millisecond
//! counter advances on each re-arm. Combining the two gives a microsecond
//! timestamp:
//!
//! ```text
//! timestamp_us = 1000 * millis + (counter_top - counter) * 10⁶ / clock_hz
//! ```
//!
//! The 48 MHz and 24 MHz core clocks use a multiply-and-shift instead of a
//! division.

/// 2²² / 48 rounded, for `ticks / 48` as `(ticks * K) >> 22`.
const SHIFT_48MHZ: u64 = 87_381;
/// 2²² / 24 rounded.
const SHIFT_24MHZ: u64 = 174_763;
const SHIFT_BITS: u32 = 22;

/// Counter and millisecond values captured together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CounterSample {
    /// Down-counter value
    pub counter: u32,
    /// Millisecond counter
    pub millis: u32,
}

/// Tick counter geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TickClock {
    clock_hz: u32,
    counter_top: u32,
}

impl TickClock {
    /// Counter re-arming every millisecond at `clock_hz`. The reload value
    /// is one less than the ticks per millisecond.
    pub const fn from_clock_hz(clock_hz: u32) -> Self {
        Self {
            clock_hz,
            counter_top: (clock_hz / 1_000).saturating_sub(1),
        }
    }

    /// Counter with an explicit re-arm value.
    pub const fn with_top(clock_hz: u32, counter_top: u32) -> Self {
        Self {
            clock_hz,
            counter_top,
        }
    }

    /// Core clock rate
    pub const fn clock_hz(&self) -> u32 {
        self.clock_hz
    }

    /// Re-arm value of the down-counter
    pub const fn counter_top(&self) -> u32 {
        self.counter_top
    }

    /// Ticks in one full counter period
    pub const fn reload_ticks(&self) -> u32 {
        self.counter_top.saturating_add(1)
    }

    /// Ticks elapsed since the counter last re-armed.
    pub fn elapsed_ticks(&self, counter: u32) -> u32 {
        self.counter_top.saturating_sub(counter)
    }

    /// Convert ticks to microseconds.
    pub fn ticks_to_us(&self, ticks: u32) -> u32 {
        let ticks = u64::from(ticks);
        let micros = match self.clock_hz {
            48_000_000 => ticks
                .saturating_mul(SHIFT_48MHZ)
                .checked_shr(SHIFT_BITS)
                .unwrap_or(0),
            24_000_000 => ticks
                .saturating_mul(SHIFT_24MHZ)
                .checked_shr(SHIFT_BITS)
                .unwrap_or(0),
            hz => ticks
                .saturating_mul(1_000_000)
                .checked_div(u64::from(hz))
                .unwrap_or(0),
        };
        u32::try_from(micros).unwrap_or(u32::MAX)
    }

    /// Absolute timestamp of `sample` in microseconds.
    pub fn timestamp_us(&self, sample: CounterSample) -> u64 {
        u64::from(sample.millis)
            .saturating_mul(1_000)
            .saturating_add(u64::from(self.ticks_to_us(self.elapsed_ticks(sample.counter))))
    }

    /// Ticks between two counter readings taken less than one re-arm apart.
    ///
    /// When the counter re-armed in between, the current reading has fewer
    /// elapsed ticks than the previous one; one full counter period
    /// ([`reload_ticks`](Self::reload_ticks)) is added before differencing.
    pub fn period_ticks(&self, previous: u32, current: u32) -> u32 {
        let before = self.elapsed_ticks(previous);
        let after = self.elapsed_ticks(current);
        if after < before {
            after.saturating_add(self.reload_ticks()).saturating_sub(before)
        } else {
            after.saturating_sub(before)
        }
    }

    /// Microseconds between two samples taken less than one re-arm apart.
    pub fn period_us(&self, previous: CounterSample, current: CounterSample) -> u32 {
        self.ticks_to_us(self.period_ticks(previous.counter, current.counter))
    }
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)] // Tests compute expectations inline
mod tests {
    use super::*;

    #[test]
    fn wrapped_counter_adds_one_period() {
        let clock = TickClock::with_top(6_000_000, 5_999);
        // 100 ticks down to zero, the reload tick, then 99 ticks
        assert_eq!(clock.period_ticks(100, 5_900), 200);
    }

    #[test]
    fn unwrapped_counter_is_plain_difference() {
        let clock = TickClock::with_top(6_000_000, 5_999);
        assert_eq!(clock.period_ticks(5_900, 100), 5_800);
        assert_eq!(clock.period_ticks(3_000, 3_000), 0);
    }

    #[test]
    fn shift_approximations_track_exact_division() {
        for hz in [48_000_000_u32, 24_000_000] {
            let clock = TickClock::from_clock_hz(hz);
            for ticks in [0_u32, 1, 480, 24_000, clock.counter_top()] {
                let exact = u64::from(ticks) * 1_000_000 / u64::from(hz);
                let approx = u64::from(clock.ticks_to_us(ticks));
                assert!(exact.abs_diff(approx) <= 1, "{hz} Hz, {ticks} ticks");
            }
        }
    }

    #[test]
    fn timestamp_combines_millis_and_ticks() {
        let clock = TickClock::from_clock_hz(48_000_000);
        assert_eq!(clock.counter_top(), 47_999);
        // 24 024 ticks = 500.5 µs
        let sample = CounterSample {
            counter: 47_999 - 24_024,
            millis: 7,
        };
        assert_eq!(clock.timestamp_us(sample), 7_500);
    }

    #[test]
    fn reload_value_is_one_below_ticks_per_millisecond() {
        let clock = TickClock::from_clock_hz(48_000_000);
        assert_eq!(clock.counter_top(), 47_999);
        assert_eq!(clock.reload_ticks(), 48_000);
        // Counter at zero is the last tick of the millisecond.
        assert_eq!(clock.elapsed_ticks(0), 47_999);
        assert_eq!(TickClock::from_clock_hz(0).counter_top(), 0);
    }

    #[test]
    fn other_clocks_use_exact_division() {
        let clock = TickClock::from_clock_hz(72_000_000);
        assert_eq!(clock.ticks_to_us(72), 1);
        assert_eq!(clock.ticks_to_us(72_000), 1_000);
    }

    #[test]
    fn period_in_microseconds_across_rearm() {
        let clock = TickClock::from_clock_hz(24_000_000);
        let previous = CounterSample {
            counter: 1_200,
            millis: 3,
        };
        let current = CounterSample {
            counter: 22_800,
            millis: 4,
        };
        // 1 200 + 1 200 ticks = 2 400 ticks = 100 µs (reload 23 999)
        assert_eq!(clock.period_us(previous, current), 100);
    }
}
