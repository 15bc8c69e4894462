//! Lifecycle of one advertising event, as seen by the scheduler.
//!
//! - `prepare`: Idle or Done to Reserved.
//! - `start`: Reserved to Active. Preempted if the scheduler preempted it meanwhile, Done if a
//!   connection consumed the set.
//! - `abort`: Reserved to Done, Active to Preempted.
//! - last radio interrupt: Active to Done; Preempted to Reserved when resumable, else Done.
//! - `resume`: Reserved to Active.
//!
//! The clock gate is requested once in `prepare` and released once when the event ends,
//! whichever way it ends. A resumable abort takes one more reference, handed to the resumed
//! event.

use bt_hci::param::AdvFilterPolicy;
use embassy_time::{Duration, Instant};

use super::{Advertiser, Phase};
use crate::clock::ClockGate;
use crate::config::{Config, EVENT_OVERHEAD_START_US};
use crate::link::filter::ResolvingList;
use crate::link::pdu::PduType;
use crate::phy::{Radio, ADVERTISING_ACCESS_ADDRESS, ADVERTISING_CRC_INIT, CRC_POLY};
use crate::scheduler::{AbortDecision, Activity, Scheduler};
use crate::time::Timer;
use crate::Error;

/// Timing of a scheduled event, handed over by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventContext {
    pub ticks_at_expire: Instant,
    /// Sub-tick part of the expiry, in microseconds.
    pub remainder: u32,
    /// Number of events skipped since the previous one.
    pub lazy: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventState {
    /// Never scheduled.
    Idle,
    /// Clock requested, waiting for `start`, or waiting for `resume` after a preemption.
    Reserved,
    /// On air.
    Active,
    /// Radio disable requested, waiting for the abort interrupt.
    Preempted,
    /// Radio and clock released.
    Done,
}

impl<C: Config, const N: usize> Advertiser<'_, C, N> {
    /// Reserve the next event: take a clock reference and keep the timing for `start`.
    pub fn prepare(&mut self, ctx: EventContext) -> Result<(), Error> {
        if !matches!(self.state, EventState::Idle | EventState::Done) {
            return Err(Error::InvalidState);
        }
        if self.data.adv.peek().is_none() || self.data.scan_rsp.peek().is_none() {
            return Err(Error::InvalidState);
        }
        self.res.clock.request()?;
        trace!("[adv] set {} prepared, lazy {}", self.handle(), ctx.lazy);
        self.ctx = Some(ctx);
        self.resume_pending = false;
        self.state = EventState::Reserved;
        Ok(())
    }

    /// Program the radio for the reserved event.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.state != EventState::Reserved {
            return Err(Error::InvalidState);
        }
        let ctx = self.ctx.take().ok_or(Error::InvalidState)?;

        // A connection took the set over since the event was prepared.
        if self.data.is_consumed() {
            debug!("[adv] set {} consumed, not starting", self.handle());
            unwrap!(self.res.clock.release());
            self.state = EventState::Done;
            self.res.scheduler.done(self.handle());
            return Ok(());
        }

        let radio = &mut self.res.radio;
        radio.reset();
        radio.set_tx_power(self.params.tx_power);
        radio.configure(self.params.phy, ADVERTISING_ACCESS_ADDRESS, CRC_POLY, ADVERTISING_CRC_INIT);

        self.chan_map_curr = self.params.channel_map;
        self.chan_prepare();

        let filtered = self.validator.policy() != AdvFilterPolicy::Unfiltered;
        let filter = &self.res.filter;
        if self.features.privacy && filter.enabled() {
            self.res.radio.filter_configure(filter.allow_list(filtered));
        } else if filtered {
            self.res.radio.filter_configure(filter.allow_list(true));
        }

        let at = ctx.ticks_at_expire
            + self.params.event_offset
            + Duration::from_micros(EVENT_OVERHEAD_START_US as u64);
        self.res.radio.start_at(at, ctx.remainder);
        self.res.radio.end_capture();
        self.state = EventState::Active;

        if self.res.scheduler.preempt_pending(self.handle(), at) {
            debug!("[adv] set {} preempted before start", self.handle());
            self.phase = Phase::Abort;
            self.state = EventState::Preempted;
            self.res.radio.disable();
        } else {
            self.res.scheduler.prepare_done(self.handle());
        }
        Ok(())
    }

    /// Decide the fate of the running event when `next` wants the radio.
    ///
    /// Only an event on air can be resumed; the clock reference it keeps for the resumed
    /// event is taken once, however often the question is asked.
    pub fn is_abort(&mut self, next: Activity) -> AbortDecision {
        if next != Activity::Advertising(self.handle()) {
            if self.resume_pending {
                return AbortDecision::Resume;
            }
            if self.is_hdcd() && self.state == EventState::Active {
                // Keep the clock for the resumed event.
                unwrap!(self.res.clock.request());
                self.resume_pending = true;
                return AbortDecision::Resume;
            }
            return AbortDecision::Cancel;
        }

        let directed = self
            .data
            .adv
            .current()
            .map(|p| self.data.pool.get(p).pdu_type() == Some(PduType::AdvDirectInd))
            .unwrap_or(false);
        if directed {
            AbortDecision::Continue
        } else {
            AbortDecision::Cancel
        }
    }

    /// Abort the event.
    ///
    /// A reserved event, or one waiting to be resumed, is released at once: either way it
    /// holds exactly one clock reference, from `prepare` or kept for the resume. A running
    /// one disables the radio and finishes in the abort interrupt.
    pub fn abort(&mut self) -> Result<(), Error> {
        match self.state {
            EventState::Reserved => {
                debug!("[adv] set {} aborted before start", self.handle());
                self.ctx = None;
                self.resume_pending = false;
                unwrap!(self.res.clock.release());
                self.state = EventState::Done;
                self.res.scheduler.done(self.handle());
                Ok(())
            }
            EventState::Active => {
                debug!("[adv] set {} aborted", self.handle());
                self.phase = Phase::Abort;
                self.state = EventState::Preempted;
                self.res.radio.disable();
                Ok(())
            }
            _ => Err(Error::InvalidState),
        }
    }

    /// Restart an event preempted with [`AbortDecision::Resume`], anchored now.
    pub fn resume(&mut self) -> Result<(), Error> {
        if self.state != EventState::Reserved || !self.resume_pending {
            return Err(Error::InvalidState);
        }
        self.resume_pending = false;
        let ticks_at_expire = self.res.timer.now() - self.params.event_offset;
        self.ctx = Some(EventContext {
            ticks_at_expire,
            remainder: 0,
            lazy: 0,
        });
        trace!("[adv] set {} resumed", self.handle());
        self.start()
    }
}
