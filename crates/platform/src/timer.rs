//! Periodic hardware timer abstraction.
//!
//! embedded-hal 1.0 has no periodic-interrupt timer trait, so boards provide
//! one here. The interrupt handler attached to the timer is registered by the
//! board; this trait only controls period and run state.

/// A timer that fires an interrupt every `period_us` microseconds while
/// running.
pub trait PeriodicTimer {
    /// Error type
    type Error: core::fmt::Debug;

    /// Set the interrupt period. Takes effect on the next [`restart`](Self::restart).
    fn set_period_us(&mut self, period_us: u32) -> Result<(), Self::Error>;

    /// Reset the counter and start (or keep) firing at the configured period.
    fn restart(&mut self) -> Result<(), Self::Error>;

    /// Stop firing. The configured period is kept.
    fn stop(&mut self) -> Result<(), Self::Error>;

    /// Whether the timer is currently firing.
    fn is_running(&self) -> bool;
}
