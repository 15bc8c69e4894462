//! Notifications from the radio interrupt to the host side.
//!
//! The interrupt side never waits for room: it checks [`NotifyQueue::available`] before it
//! commits to anything that needs a notification, and otherwise leaves the request
//! unanswered.

use core::future::poll_fn;
use core::task::Poll;

use embassy_sync::waitqueue::AtomicWaker;
use heapless::spsc::{Consumer, Producer, Queue};

use crate::link::advertising::ConnContext;
use crate::link::pdu::AdvPdu;

/// Everything the connection role needs to take over from an accepted CONNECT_IND.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Handoff {
    /// Advertising set the request was accepted on.
    pub handle: u8,
    pub conn: ConnContext,
    /// Copy of the CONNECT_IND, the radio reuses its receive buffer.
    pub pdu: AdvPdu,
    /// Radio timer tick at which the event was started.
    pub ticks_anchor: u32,
    /// End of the CONNECT_IND on air, in microseconds from the anchor.
    pub us_radio_end: u32,
    /// Receiver ramp-up time, in microseconds.
    pub us_radio_rdy: u32,
    /// Resolving list entry of the initiator.
    pub rl_idx: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Notification {
    /// A SCAN_REQ was answered.
    ScanRequest {
        handle: u8,
        pdu: AdvPdu,
        /// Signal strength as a positive magnitude in -dBm, `0x7F` when not measured.
        rssi: u8,
    },
    /// A connection was accepted. The advertising set stays consumed until released.
    Connection(Handoff),
    /// Channel selection algorithm of the new connection, follows [`Notification::Connection`].
    ChannelSelection { conn: ConnContext, csa2: bool },
    /// An advertising event completed on every channel.
    AdvIndication { handle: u8 },
}

/// Sending half of the host notification queue, as seen from the radio interrupt.
pub trait NotifyQueue {
    /// Number of notifications that can be pushed right now.
    fn available(&self) -> usize;

    /// Push a notification, handing it back if there is no room.
    fn push(&mut self, notification: Notification) -> Result<(), Notification>;
}

/// Interrupt side of a [`heapless::spsc::Queue`] that wakes the host on every push.
pub struct HostQueue<'d, const N: usize> {
    producer: Producer<'d, Notification, N>,
    waker: &'d AtomicWaker,
}

impl<const N: usize> NotifyQueue for HostQueue<'_, N> {
    fn available(&self) -> usize {
        self.producer.capacity() - self.producer.len()
    }

    fn push(&mut self, notification: Notification) -> Result<(), Notification> {
        self.producer.enqueue(notification)?;
        self.waker.wake();
        Ok(())
    }
}

/// Host side of the notification queue.
pub struct HostEvents<'d, const N: usize> {
    consumer: Consumer<'d, Notification, N>,
    waker: &'d AtomicWaker,
}

impl<const N: usize> HostEvents<'_, N> {
    pub fn try_next(&mut self) -> Option<Notification> {
        self.consumer.dequeue()
    }

    /// Wait for the next notification.
    pub async fn next(&mut self) -> Notification {
        poll_fn(|cx| {
            self.waker.register(cx.waker());
            match self.consumer.dequeue() {
                Some(n) => Poll::Ready(n),
                None => Poll::Pending,
            }
        })
        .await
    }
}

/// Split a queue into its interrupt and host halves.
///
/// The queue holds `N - 1` notifications.
pub fn split<'d, const N: usize>(
    queue: &'d mut Queue<Notification, N>,
    waker: &'d AtomicWaker,
) -> (HostQueue<'d, N>, HostEvents<'d, N>) {
    let (producer, consumer) = queue.split();
    (HostQueue { producer, waker }, HostEvents { consumer, waker })
}
