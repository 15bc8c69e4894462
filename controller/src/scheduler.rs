//! Event scheduler interface.
//!
//! The scheduler owns the radio timeline. It calls into an advertising set to prepare,
//! start, abort or resume an event, and is told back through [`Scheduler`] when the event
//! has committed to the air or released the radio.

use embassy_time::Instant;

/// The activity asking for the radio when a conflict is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Activity {
    /// An advertising event of the set with the given handle.
    Advertising(u8),
    /// Any other role.
    Other,
}

/// Outcome of the abort predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AbortDecision {
    /// Keep the running event, drop the newcomer.
    Continue,
    /// Abort the running event for good.
    Cancel,
    /// Abort the running event and resume it as soon as the preempting activity completes.
    Resume,
}

/// Callbacks into the event scheduler.
pub trait Scheduler {
    /// The event of set `handle` has released the radio. Called exactly once per started or
    /// cancelled event, from the context that finished it.
    fn done(&mut self, handle: u8);

    /// The event of set `handle` has armed its first transmission.
    fn prepare_done(&mut self, _handle: u8) {}

    /// Whether a higher priority activity got scheduled ahead of the event start at `at`
    /// after the event was prepared.
    fn preempt_pending(&mut self, _handle: u8, _at: Instant) -> bool {
        false
    }
}
