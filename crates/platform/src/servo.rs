//! Hobby servo abstraction used by the magnet actuator.

/// Largest angle a standard servo accepts.
pub const MAX_ANGLE_DEGREES: u8 = 180;

/// Position-controlled servo on a PWM-capable pin.
pub trait Servo {
    /// Error type
    type Error: core::fmt::Debug;

    /// Bind the servo signal to `pin`. Re-attaching moves the signal.
    fn attach(&mut self, pin: u8) -> Result<(), Self::Error>;

    /// Command an absolute angle in degrees (clamped to 0..=180).
    fn write_angle(&mut self, degrees: u8) -> Result<(), Self::Error>;

    /// Last commanded angle.
    fn angle(&self) -> u8;

    /// Pin the servo is attached to, if any.
    fn attached_pin(&self) -> Option<u8>;
}
