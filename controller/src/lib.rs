//! The advertising role of a troublesome BLE link layer.
//!
//! Trouble-controller drives the radio through one advertising event at a time: it transmits
//! the advertising PDU on every enabled primary channel, listens for scan and connection
//! requests, answers scan requests and hands accepted connection requests over to the host.
//!
//! Trouble-controller is runtime and hardware-agnostic: the radio, the event scheduler, the
//! high frequency clock and the address filter engine are supplied by the integrator through
//! the traits bundled in [`config::Config`]. Nothing on the interrupt path blocks or allocates.

// We're `#[no_std]`, except when we're testing
#![cfg_attr(not(test), no_std)]

mod fmt;

mod codec;
mod cursor;

pub mod clock;
pub mod config;
pub mod link;
pub mod phy;
pub mod scheduler;
pub mod time;

use bt_hci::param::{AddrKind, BdAddr};
pub use clock::ClockError;
pub use codec::Error as CodecError;

/// Errors reported to producers and to the scheduler.
///
/// Failures inside the radio interrupt never surface here; they only show up as the absence
/// of an expected notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// No PDU buffer is available in the shared pool.
    NoBuffers,
    /// The host notification queue has no room left.
    QueueFull,
    /// Advertising or scan response data does not fit in a PDU.
    TooLong,
    /// The set has been handed over to a connection.
    Consumed,
    /// The operation is not allowed in the current event state.
    InvalidState,
    /// Advertising parameters are inconsistent with each other or with the set's features.
    InvalidParams,
    /// The clock gate refused a request.
    Clock(ClockError),
    /// PDU encoding or decoding failed.
    Codec(codec::Error),
}

impl From<codec::Error> for Error {
    fn from(error: codec::Error) -> Self {
        Self::Codec(error)
    }
}

impl From<ClockError> for Error {
    fn from(error: ClockError) -> Self {
        Self::Clock(error)
    }
}

/// A device address along with its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Address {
    pub kind: AddrKind,
    pub addr: BdAddr,
}

impl Address {
    pub fn public(addr: [u8; 6]) -> Self {
        Self {
            kind: AddrKind::PUBLIC,
            addr: BdAddr::new(addr),
        }
    }

    pub fn random(addr: [u8; 6]) -> Self {
        Self {
            kind: AddrKind::RANDOM,
            addr: BdAddr::new(addr),
        }
    }

    /// Whether the TxAdd/RxAdd header bit for this address is set.
    pub fn is_random(&self) -> bool {
        self.kind == AddrKind::RANDOM
    }
}
