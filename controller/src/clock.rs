//! High frequency clock gate.

/// Failure of the clock gate service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockError {
    /// The oscillator could not be started.
    Unavailable,
    /// A release was issued without a matching request.
    NotRequested,
}

/// Reference counted gate of the clock feeding the radio.
///
/// The clock is shared with every other role running on the same frequency, so a request
/// while it is already running or starting up succeeds, and a release only switches it off
/// once the last user is gone. An advertising event requests it exactly once and releases it
/// exactly once.
pub trait ClockGate {
    /// Take a reference on the clock, starting it if needed.
    fn request(&mut self) -> Result<(), ClockError>;

    /// Drop a reference on the clock.
    fn release(&mut self) -> Result<(), ClockError>;
}
