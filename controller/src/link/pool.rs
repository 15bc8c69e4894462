//! A PDU pool shared by the advertising sets.
//!
//! PDUs come from two sources: memory that was never handed out, and a free list of PDUs
//! returned by double buffers when an update retired them. Both are guarded by a critical
//! section, so the pool can be used from thread mode and from the radio interrupt.
use core::cell::RefCell;
use core::future::poll_fn;
use core::task::{Context, Poll};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::waitqueue::WakerRegistration;
use heapless::Deque;

use crate::config::PDU_POOL_SIZE;
use crate::link::pdu::AdvPdu;

/// Handle to a PDU owned by a [`PduPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PduRef(pub(crate) u8);

impl PduRef {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

struct State<const N: usize> {
    pdus: [AdvPdu; N],
    fresh: usize,
    returned: Deque<u8, N>,
    waker: WakerRegistration,
}

impl<const N: usize> State<N> {
    const fn new() -> Self {
        Self {
            pdus: [AdvPdu::EMPTY; N],
            fresh: 0,
            returned: Deque::new(),
            waker: WakerRegistration::new(),
        }
    }

    fn take(&mut self) -> Option<PduRef> {
        if let Some(idx) = self.returned.pop_front() {
            trace!("[pool] reuse {}", idx);
            return Some(PduRef(idx));
        }
        if self.fresh < N {
            let idx = self.fresh as u8;
            self.fresh += 1;
            self.pdus[idx as usize] = AdvPdu::EMPTY;
            trace!("[pool] acquire {}", idx);
            return Some(PduRef(idx));
        }
        None
    }

    fn release(&mut self, p_ref: PduRef) {
        trace!("[pool] release {}", p_ref.0);
        assert!((p_ref.0 as usize) < self.fresh);
        unwrap!(self.returned.push_back(p_ref.0));
        self.waker.wake();
    }

    fn available(&self) -> usize {
        self.returned.len() + (N - self.fresh)
    }
}

/// A pool sized by the `PDU_POOL_SIZE` build setting.
pub type DefaultPduPool = PduPool<PDU_POOL_SIZE>;

/// A fixed arena of `N` advertising PDUs.
pub struct PduPool<const N: usize> {
    state: Mutex<CriticalSectionRawMutex, RefCell<State<N>>>,
}

impl<const N: usize> Default for PduPool<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> PduPool<N> {
    /// Create a new pool, suitable for a `static`.
    pub const fn new() -> Self {
        ::core::assert!(N < u8::MAX as usize);
        Self {
            state: Mutex::new(RefCell::new(State::new())),
        }
    }

    fn with_state<F: FnOnce(&mut State<N>) -> R, R>(&self, f: F) -> R {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            f(&mut state)
        })
    }

    /// Take a PDU, preferring returned ones over never used memory.
    pub fn take(&self) -> Option<PduRef> {
        self.with_state(|state| state.take())
    }

    pub(crate) fn poll_take(&self, cx: &mut Context<'_>) -> Poll<PduRef> {
        self.with_state(|state| match state.take() {
            Some(p_ref) => Poll::Ready(p_ref),
            None => {
                state.waker.register(cx.waker());
                Poll::Pending
            }
        })
    }

    /// Take a PDU, waiting until one is returned if the pool is exhausted.
    pub async fn take_wait(&self) -> PduRef {
        poll_fn(|cx| self.poll_take(cx)).await
    }

    /// Return a PDU to the free list.
    pub fn release(&self, p_ref: PduRef) {
        self.with_state(|state| state.release(p_ref))
    }

    /// Number of PDUs that can be taken without waiting.
    pub fn available(&self) -> usize {
        self.with_state(|state| state.available())
    }

    /// Read access to a PDU.
    pub fn with<F: FnOnce(&AdvPdu) -> R, R>(&self, p_ref: PduRef, f: F) -> R {
        self.with_state(|state| f(&state.pdus[p_ref.index()]))
    }

    /// Write access to a PDU.
    pub fn with_mut<F: FnOnce(&mut AdvPdu) -> R, R>(&self, p_ref: PduRef, f: F) -> R {
        self.with_state(|state| f(&mut state.pdus[p_ref.index()]))
    }

    /// Copy a PDU out of the pool.
    pub fn get(&self, p_ref: PduRef) -> AdvPdu {
        self.with(p_ref, |pdu| *pdu)
    }

    /// Forget every PDU handed out so far.
    ///
    /// Only valid once every double buffer drawing from this pool has been released.
    pub fn reset(&self) {
        self.with_state(|state| {
            debug!("[pool] reset, {} PDUs were in use", N - state.available());
            state.fresh = 0;
            state.returned.clear();
        })
    }
}
