//! Interrupt ⇄ main loop hand-off
//!
//! One [`IrqContext`] is created for the lifetime of the program (normally a
//! `static`) and shared by reference between the interrupt handlers and the
//! [`Controller`](crate::controller::Controller).
//!
//! - Waveform timer: the handler calls [`IrqContext::on_waveform_timer`],
//!   which toggles the H-bridge legs held behind a critical-section mutex.
//! - Sampling done: the handler calls [`IrqContext::on_sampling_done`]; the
//!   main loop drains the single-slot signal in `poll()`. A newer completion
//!   overwrites an undrained one.
//!
//! ```rust,ignore
//! static IRQ: IrqContext<Output<'static>> = IrqContext::new();
//!
//! #[interrupt]
//! fn TIM2() {
//!     IRQ.on_waveform_timer();
//! }
//! ```

use core::cell::RefCell;

use critical_section::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embedded_hal::digital::StatefulOutputPin;

use crate::timestamp::CounterSample;
use crate::waveform::SquareWave;

/// Completion of one sampling transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SamplingDone {
    /// Transfer channel that completed
    pub channel: u8,
    /// Tick counter captured in the handler
    pub sample: CounterSample,
}

/// State written from interrupt context.
pub struct IrqContext<W> {
    wave: Mutex<RefCell<Option<SquareWave<W>>>>,
    sampling_done: Signal<CriticalSectionRawMutex, SamplingDone>,
}

impl<W> IrqContext<W> {
    /// Empty context: no legs installed, nothing signalled.
    pub const fn new() -> Self {
        Self {
            wave: Mutex::new(RefCell::new(None)),
            sampling_done: Signal::new(),
        }
    }

    /// Hand the waveform legs to the timer handler, returning any previous
    /// pair.
    pub fn install_wave(&self, wave: SquareWave<W>) -> Option<SquareWave<W>> {
        critical_section::with(|cs| self.wave.borrow_ref_mut(cs).replace(wave))
    }

    /// Take the waveform legs back.
    pub fn take_wave(&self) -> Option<SquareWave<W>> {
        critical_section::with(|cs| self.wave.borrow_ref_mut(cs).take())
    }

    /// Run `f` on the installed legs inside a critical section.
    pub fn with_wave<R>(&self, f: impl FnOnce(&mut SquareWave<W>) -> R) -> Option<R> {
        critical_section::with(|cs| self.wave.borrow_ref_mut(cs).as_mut().map(f))
    }

    /// Sampling-done interrupt entry point.
    pub fn on_sampling_done(&self, done: SamplingDone) {
        self.sampling_done.signal(done);
    }

    /// Drain the pending completion, if any.
    pub fn take_sampling_done(&self) -> Option<SamplingDone> {
        self.sampling_done.try_take()
    }

    /// Wait for the next completion.
    pub async fn wait_sampling_done(&self) -> SamplingDone {
        self.sampling_done.wait().await
    }
}

impl<W: StatefulOutputPin> IrqContext<W> {
    /// Waveform timer interrupt entry point. Bounded: two pin writes.
    pub fn on_waveform_timer(&self) {
        // Pin errors cannot be reported from interrupt context.
        let _ = self.with_wave(SquareWave::toggle);
    }
}

impl<W> Default for IrqContext<W> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use platform::board::{WAVEFORM_HIGH_PIN, WAVEFORM_LOW_PIN};
    use platform::mocks::{EventLog, MockPin};

    fn done(channel: u8) -> SamplingDone {
        SamplingDone {
            channel,
            sample: CounterSample {
                counter: 100,
                millis: 1,
            },
        }
    }

    #[test]
    fn timer_tick_without_legs_is_a_no_op() {
        let irq = IrqContext::<MockPin>::new();
        irq.on_waveform_timer();
        assert!(irq.take_wave().is_none());
    }

    #[test]
    fn timer_tick_toggles_installed_legs() {
        let log = EventLog::new();
        let high = MockPin::new(WAVEFORM_HIGH_PIN, &log);
        let low = MockPin::new(WAVEFORM_LOW_PIN, &log);
        let irq = IrqContext::new();
        irq.install_wave(SquareWave::new(high.clone(), low.clone()));

        irq.on_waveform_timer();
        assert!(high.is_high() && !low.is_high());
        irq.on_waveform_timer();
        assert!(!high.is_high() && low.is_high());
    }

    #[test]
    fn sampling_signal_is_single_slot() {
        let irq = IrqContext::<MockPin>::new();
        assert_eq!(irq.take_sampling_done(), None);

        irq.on_sampling_done(done(1));
        irq.on_sampling_done(done(2));

        assert_eq!(irq.take_sampling_done().map(|d| d.channel), Some(2));
        assert_eq!(irq.take_sampling_done(), None);
    }

    #[tokio::test]
    async fn waiter_receives_completion() {
        let irq = IrqContext::<MockPin>::new();
        irq.on_sampling_done(done(3));
        let received = irq.wait_sampling_done().await;
        assert_eq!(received.channel, 3);
    }
}
