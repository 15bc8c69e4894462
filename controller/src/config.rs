//! Stack configuration.
//!
//! The hardware types used by the link layer are bound together by the [`Config`] trait.
//!
//! A few settings are fixed at compile time. They are set via environment variables at build
//! time: set the variable named `TROUBLE_CONTROLLER_<value>`. For example
//! `TROUBLE_CONTROLLER_PDU_POOL_SIZE=8 cargo build`. You can also set them in the `[env]`
//! section of `.cargo/config.toml`.

use crate::clock::ClockGate;
use crate::link::filter::ResolvingList;
use crate::link::notify::NotifyQueue;
use crate::phy::Radio;
use crate::scheduler::Scheduler;
use crate::time::Timer;

mod raw {
    #![allow(unused)]
    include!(concat!(env!("OUT_DIR"), "/config.rs"));
}

/// Time reserved ahead of the first transmission of an event for radio ramp-up, in
/// microseconds.
///
/// Default: 300.
pub const EVENT_OVERHEAD_START_US: u32 = raw::EVENT_OVERHEAD_START_US as u32;

/// Number of PDUs in a [`DefaultPduPool`](crate::link::pool::DefaultPduPool).
///
/// Every advertising set keeps at least one advertising and one scan response PDU; two more
/// per set allow an update to be pending while the previous one is on air.
///
/// Default: 6.
pub const PDU_POOL_SIZE: usize = raw::PDU_POOL_SIZE;

/// Trait for trouble link layer configuration.
///
/// This trait defines the hardware interface and collaborator types used throughout the link
/// layer.
///
/// Every application must define a type implementing this trait and supply it to the stack.
pub trait Config {
    /// A time source in the scheduler's time base.
    type Timer: Timer;

    /// The BLE packet transceiver.
    type Radio: Radio;

    /// The reference counted high frequency clock.
    type Clock: ClockGate;

    /// The resolving list and filter accept list engine.
    type Filter: ResolvingList;

    /// The queue carrying notifications to the host.
    type Notify: NotifyQueue;

    /// The radio event scheduler.
    type Scheduler: Scheduler;
}
