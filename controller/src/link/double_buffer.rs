//! Lock-free double buffer of advertising PDUs.
//!
//! One producer (thread mode) and one consumer (the radio interrupt) share two slots. The
//! consumer only ever reads slot `first`; the producer only ever writes slot `last` or the
//! spare one. `first` moves in [`DoubleBuffer::latest`], at a channel boundary, and nowhere
//! else, so the radio never sees a half written PDU.

use core::sync::atomic::{fence, AtomicU8, Ordering};

use crate::link::pool::{PduPool, PduRef};
use crate::Error;

const DOUBLE_BUFFER_SIZE: u8 = 2;
const EMPTY: u8 = u8::MAX;

const fn next(idx: u8) -> u8 {
    (idx + 1) % DOUBLE_BUFFER_SIZE
}

pub struct DoubleBuffer {
    first: AtomicU8,
    last: AtomicU8,
    slots: [AtomicU8; DOUBLE_BUFFER_SIZE as usize],
}

impl Default for DoubleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DoubleBuffer {
    pub const fn new() -> Self {
        Self {
            first: AtomicU8::new(0),
            last: AtomicU8::new(0),
            slots: [AtomicU8::new(EMPTY), AtomicU8::new(EMPTY)],
        }
    }

    /// Pick the slot the producer may write.
    ///
    /// With no update pending the spare slot is used. With an update pending, the update is
    /// withdrawn first; if the consumer raced us and already took it, the slot it just retired
    /// becomes the spare one, otherwise the pending slot is overwritten in place.
    fn next_index(&self) -> u8 {
        self.next_index_with(|| {})
    }

    fn next_index_with<F: FnOnce()>(&self, preempted: F) -> u8 {
        let first = self.first.load(Ordering::Acquire);
        let last = self.last.load(Ordering::Acquire);
        if first == last {
            return next(last);
        }

        preempted();
        self.last.store(first, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        let first_latest = self.first.load(Ordering::SeqCst);
        if first_latest != first {
            // The consumer advanced onto the withdrawn update; nothing is pending any more.
            self.last.store(first_latest, Ordering::SeqCst);
            next(last)
        } else {
            last
        }
    }

    /// Whether the next write has to take a PDU from the pool.
    ///
    /// The consumer can only make this true by retiring a PDU, which it returns to the pool.
    pub fn needs_pdu(&self) -> bool {
        let first = self.first.load(Ordering::Acquire);
        let last = self.last.load(Ordering::Acquire);
        let idx = if first == last { next(last) } else { last };
        self.slots[idx as usize].load(Ordering::Acquire) == EMPTY
    }

    fn attach(&self, idx: u8, p_ref: PduRef) -> PduRef {
        self.slots[idx as usize].store(p_ref.0, Ordering::Release);
        p_ref
    }

    /// Get a writable PDU and its slot index, without waiting.
    pub fn try_alloc<const N: usize>(&self, pool: &PduPool<N>) -> Result<(PduRef, u8), Error> {
        let idx = self.next_index();
        let slot = self.slots[idx as usize].load(Ordering::Acquire);
        if slot != EMPTY {
            return Ok((PduRef(slot), idx));
        }
        let p_ref = pool.take().ok_or(Error::NoBuffers)?;
        Ok((self.attach(idx, p_ref), idx))
    }

    /// Get a writable PDU and its slot index, waiting for the pool if it is exhausted.
    pub async fn alloc<const N: usize>(&self, pool: &PduPool<N>) -> (PduRef, u8) {
        let idx = self.next_index();
        let slot = self.slots[idx as usize].load(Ordering::Acquire);
        if slot != EMPTY {
            return (PduRef(slot), idx);
        }
        let p_ref = pool.take_wait().await;
        (self.attach(idx, p_ref), idx)
    }

    /// Make the slot written after [`DoubleBuffer::try_alloc`] the pending update.
    pub fn publish(&self, idx: u8) {
        self.last.store(idx, Ordering::Release);
    }

    /// Consumer side: take the pending update if any and return the visible PDU.
    ///
    /// The previously visible PDU goes back to the pool. The flag reports whether an update
    /// was taken.
    pub fn latest<const N: usize>(&self, pool: &PduPool<N>) -> (PduRef, bool) {
        let mut first = self.first.load(Ordering::Acquire);
        let mut modified = false;
        if first != self.last.load(Ordering::Acquire) {
            let retired = self.slots[first as usize].swap(EMPTY, Ordering::AcqRel);
            if retired != EMPTY {
                pool.release(PduRef(retired));
            }
            first = next(first);
            self.first.store(first, Ordering::Release);
            modified = true;
        }
        let slot = self.slots[first as usize].load(Ordering::Acquire);
        assert!(slot != EMPTY);
        (PduRef(slot), modified)
    }

    /// The PDU currently visible to the radio.
    pub fn current(&self) -> Option<PduRef> {
        let slot = self.slots[self.first.load(Ordering::Acquire) as usize].load(Ordering::Acquire);
        (slot != EMPTY).then_some(PduRef(slot))
    }

    /// The most recently published PDU, pending or visible.
    pub fn peek(&self) -> Option<PduRef> {
        let slot = self.slots[self.last.load(Ordering::Acquire) as usize].load(Ordering::Acquire);
        (slot != EMPTY).then_some(PduRef(slot))
    }

    /// Return both slots to the pool.
    pub fn release<const N: usize>(&self, pool: &PduPool<N>) {
        for slot in self.slots.iter() {
            let p = slot.swap(EMPTY, Ordering::AcqRel);
            if p != EMPTY {
                pool.release(PduRef(p));
            }
        }
        self.first.store(0, Ordering::Release);
        self.last.store(0, Ordering::Release);
    }
}
