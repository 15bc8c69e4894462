//! Legacy advertising.
//!
//! An advertising set is split in two. [`AdvSetData`] holds the PDUs and is shared by
//! reference between the host side, which updates advertising and scan response data, and
//! the radio interrupt, which transmits them. [`Advertiser`] owns everything else and is
//! driven by the scheduler ([`Advertiser::prepare`], [`Advertiser::start`],
//! [`Advertiser::abort`], [`Advertiser::resume`]) and by the radio interrupt
//! ([`Advertiser::on_radio_isr`]).
//!
//! The integrator serializes those calls, typically by keeping the advertiser in a
//! `Mutex<CriticalSectionRawMutex, RefCell<_>>`.

use core::sync::atomic::{AtomicBool, Ordering};

use bt_hci::param::AdvFilterPolicy;
use embassy_time::Duration;

use crate::config::Config;
use crate::link::double_buffer::DoubleBuffer;
use crate::link::filter::Validator;
use crate::link::pdu::{AdvPdu, PduType, ADV_DATA_LEN_MAX};
use crate::link::pool::PduPool;
use crate::phy::Phy;
use crate::{Address, Error};

mod event;
mod isr;
mod sequencer;

pub use event::{EventContext, EventState};
pub use isr::Phase;
pub use sequencer::ChannelMap;

/// Connection the set hands over to when a CONNECT_IND is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnContext {
    pub handle: u16,
}

/// Advertising event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvKind {
    /// Connectable and scannable undirected.
    #[default]
    AdvInd,
    /// Connectable directed, high duty cycle: the channel map is cycled until the event is
    /// aborted.
    DirectHighDuty,
    /// Scannable undirected.
    ScanInd,
    /// Non-connectable and non-scannable undirected.
    NonconnInd,
    /// Connectable directed, low duty cycle.
    DirectLowDuty,
    /// Extended advertising indication on the primary channels.
    ExtInd,
}

impl AdvKind {
    pub const fn pdu_type(self) -> PduType {
        match self {
            Self::AdvInd => PduType::AdvInd,
            Self::DirectHighDuty | Self::DirectLowDuty => PduType::AdvDirectInd,
            Self::ScanInd => PduType::AdvScanInd,
            Self::NonconnInd => PduType::AdvNonconnInd,
            Self::ExtInd => PduType::AdvExtInd,
        }
    }

    pub const fn is_directed(self) -> bool {
        matches!(self, Self::DirectHighDuty | Self::DirectLowDuty)
    }

    pub const fn is_connectable(self) -> bool {
        matches!(self, Self::AdvInd | Self::DirectHighDuty | Self::DirectLowDuty)
    }
}

/// Parameters of an advertising set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdvParams {
    pub handle: u8,
    pub kind: AdvKind,
    pub own_addr: Address,
    /// Target of directed advertising.
    pub peer: Option<Address>,
    pub channel_map: ChannelMap,
    pub filter_policy: AdvFilterPolicy,
    pub phy: Phy,
    /// Transmit power, in dBm.
    pub tx_power: i8,
    /// Resolving list entry of the peer, for directed advertising with privacy.
    pub rl_idx: Option<u8>,
    /// Offset of the radio event from the scheduler's expiry.
    pub event_offset: Duration,
    /// Connection to hand over to. Only used by connectable kinds.
    pub conn: Option<ConnContext>,
}

impl Default for AdvParams {
    fn default() -> Self {
        Self {
            handle: 0,
            kind: AdvKind::AdvInd,
            own_addr: Address::public([0; 6]),
            peer: None,
            channel_map: ChannelMap::ALL,
            filter_policy: AdvFilterPolicy::Unfiltered,
            phy: Phy::Le1M,
            tx_power: 0,
            rl_idx: None,
            event_offset: Duration::from_ticks(0),
            conn: None,
        }
    }
}

/// Optional behaviour, fixed when the set is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Features {
    /// Resolve peer addresses and rotate our own.
    pub privacy: bool,
    /// Report answered scan requests to the host.
    pub scan_req_notify: bool,
    /// Measure the signal strength of scan requests.
    pub scan_req_rssi: bool,
    /// Report every completed advertising event to the host.
    pub adv_indication: bool,
    /// Offer channel selection algorithm #2.
    pub chan_sel_2: bool,
    /// Allow extended advertising indications.
    pub ext_adv: bool,
}

/// PDUs of an advertising set, shared between the host and the radio interrupt.
pub struct AdvSetData<'d, const N: usize> {
    pool: &'d PduPool<N>,
    adv: DoubleBuffer,
    scan_rsp: DoubleBuffer,
    consumed: AtomicBool,
}

impl<'d, const N: usize> AdvSetData<'d, N> {
    pub const fn new(pool: &'d PduPool<N>) -> Self {
        Self {
            pool,
            adv: DoubleBuffer::new(),
            scan_rsp: DoubleBuffer::new(),
            consumed: AtomicBool::new(false),
        }
    }

    /// Publish an empty ADV_IND and SCAN_RSP and make the set available again.
    pub fn init(&self) -> Result<(), Error> {
        let mut adv = AdvPdu::new();
        adv.set_pdu_type(PduType::AdvInd);
        adv.write_payload(|w| w.append(&[0; 6]))?;
        let mut scan_rsp = AdvPdu::new();
        scan_rsp.set_pdu_type(PduType::ScanRsp);
        scan_rsp.write_payload(|w| w.append(&[0; 6]))?;

        self.store(&self.adv, &adv)?;
        self.store(&self.scan_rsp, &scan_rsp)?;
        self.consumed.store(false, Ordering::Release);
        Ok(())
    }

    /// Apply advertising parameters to both PDUs. Advertising and scan response data are
    /// kept.
    ///
    /// Fails with [`Error::InvalidParams`] for an empty channel map, and with
    /// [`Error::NoBuffers`] without touching either PDU if the pool cannot hold both.
    pub fn configure(&self, params: &AdvParams, features: &Features) -> Result<(), Error> {
        if params.channel_map.is_empty() || (params.kind == AdvKind::ExtInd && !features.ext_adv) {
            return Err(Error::InvalidParams);
        }
        let prev = self.peek(&self.adv);
        let mut adv = AdvPdu::new();
        adv.set_pdu_type(params.kind.pdu_type());
        adv.set_chan_sel(features.chan_sel_2 && params.kind.is_connectable());
        adv.set_tx_add(params.own_addr.is_random());
        if params.kind.is_directed() {
            let peer = params.peer.ok_or(Error::InvalidParams)?;
            adv.set_rx_add(peer.is_random());
            adv.write_payload(|w| {
                w.append(params.own_addr.addr.raw())?;
                w.append(peer.addr.raw())
            })?;
        } else if params.kind == AdvKind::ExtInd {
            // Empty extended header, neither connectable nor scannable.
            adv.write_payload(|w| w.write(0u8))?;
        } else {
            let data = match prev.pdu_type() {
                Some(PduType::AdvDirectInd | PduType::AdvExtInd) => &[][..],
                _ => prev.data(),
            };
            adv.write_payload(|w| {
                w.append(params.own_addr.addr.raw())?;
                w.append(data)
            })?;
        }

        let prev = self.peek(&self.scan_rsp);
        let mut scan_rsp = AdvPdu::new();
        scan_rsp.set_pdu_type(PduType::ScanRsp);
        scan_rsp.set_tx_add(params.own_addr.is_random());
        scan_rsp.write_payload(|w| {
            w.append(params.own_addr.addr.raw())?;
            w.append(prev.data())
        })?;

        // Both PDUs or neither.
        let needed = self.adv.needs_pdu() as usize + self.scan_rsp.needs_pdu() as usize;
        if self.pool.available() < needed {
            return Err(Error::NoBuffers);
        }
        self.store(&self.adv, &adv)?;
        self.store(&self.scan_rsp, &scan_rsp)?;
        debug!("[adv] set {} configured as {:?}", params.handle, params.kind);
        Ok(())
    }

    fn peek(&self, buf: &DoubleBuffer) -> AdvPdu {
        buf.peek().map(|p| self.pool.get(p)).unwrap_or_default()
    }

    fn store(&self, buf: &DoubleBuffer, pdu: &AdvPdu) -> Result<(), Error> {
        let (p, idx) = buf.try_alloc(self.pool)?;
        self.pool.with_mut(p, |slot| *slot = *pdu);
        buf.publish(idx);
        Ok(())
    }

    async fn store_wait(&self, buf: &DoubleBuffer, pdu: &AdvPdu) {
        let (p, idx) = buf.alloc(self.pool).await;
        self.pool.with_mut(p, |slot| *slot = *pdu);
        buf.publish(idx);
    }

    fn build_adv_data(&self, data: &[u8]) -> Result<Option<AdvPdu>, Error> {
        if data.len() > ADV_DATA_LEN_MAX {
            return Err(Error::TooLong);
        }
        let prev = self.peek(&self.adv);
        let ty = prev.pdu_type().unwrap_or(PduType::AdvInd);
        if matches!(ty, PduType::AdvDirectInd | PduType::AdvExtInd) {
            debug!("[adv] ignoring advertising data of a directed or extended set");
            return Ok(None);
        }
        let mut pdu = AdvPdu::new();
        pdu.set_pdu_type(ty);
        pdu.set_chan_sel(prev.chan_sel());
        pdu.set_tx_add(prev.tx_add());
        pdu.set_rx_add(prev.rx_add());
        pdu.write_payload(|w| {
            w.append(prev.adv_addr().raw())?;
            w.append(data)
        })?;
        Ok(Some(pdu))
    }

    fn build_scan_rsp(&self, data: &[u8]) -> Result<AdvPdu, Error> {
        if data.len() > ADV_DATA_LEN_MAX {
            return Err(Error::TooLong);
        }
        let prev = self.peek(&self.scan_rsp);
        let mut pdu = AdvPdu::new();
        pdu.set_pdu_type(PduType::ScanRsp);
        pdu.set_tx_add(prev.tx_add());
        pdu.write_payload(|w| {
            w.append(prev.adv_addr().raw())?;
            w.append(data)
        })?;
        Ok(pdu)
    }

    /// Replace the advertising data, failing with [`Error::NoBuffers`] if the pool is
    /// exhausted. Directed and extended sets carry no advertising data; the call is a no-op
    /// for them.
    pub fn set_adv_data(&self, data: &[u8]) -> Result<(), Error> {
        match self.build_adv_data(data)? {
            Some(pdu) => self.store(&self.adv, &pdu),
            None => Ok(()),
        }
    }

    /// Replace the advertising data, waiting for a PDU if the pool is exhausted.
    pub async fn update_adv_data(&self, data: &[u8]) -> Result<(), Error> {
        if let Some(pdu) = self.build_adv_data(data)? {
            self.store_wait(&self.adv, &pdu).await;
        }
        Ok(())
    }

    /// Replace the scan response data, failing with [`Error::NoBuffers`] if the pool is
    /// exhausted.
    pub fn set_scan_rsp(&self, data: &[u8]) -> Result<(), Error> {
        let pdu = self.build_scan_rsp(data)?;
        self.store(&self.scan_rsp, &pdu)
    }

    /// Replace the scan response data, waiting for a PDU if the pool is exhausted.
    pub async fn update_scan_rsp(&self, data: &[u8]) -> Result<(), Error> {
        let pdu = self.build_scan_rsp(data)?;
        self.store_wait(&self.scan_rsp, &pdu).await;
        Ok(())
    }

    /// Change the address we advertise with, e.g. on resolvable private address rotation.
    ///
    /// With privacy enabled the scan response follows at the next channel.
    pub fn set_own_addr(&self, addr: &Address) -> Result<(), Error> {
        let mut pdu = self.peek(&self.adv);
        pdu.set_tx_add(addr.is_random());
        pdu.set_adv_addr(&addr.addr);
        self.store(&self.adv, &pdu)
    }

    /// The latest advertising PDU, pending or on air.
    pub fn adv_pdu(&self) -> Option<AdvPdu> {
        self.adv.peek().map(|p| self.pool.get(p))
    }

    /// The latest scan response PDU, pending or on air.
    pub fn scan_rsp_pdu(&self) -> Option<AdvPdu> {
        self.scan_rsp.peek().map(|p| self.pool.get(p))
    }

    /// Whether a connection took the set over.
    pub fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::Acquire)
    }

    /// Give a set consumed by a connection back for advertising.
    pub fn release_handoff(&self) {
        self.consumed.store(false, Ordering::Release);
    }

    /// Return every PDU of the set to the pool.
    pub fn release(&self) {
        self.adv.release(self.pool);
        self.scan_rsp.release(self.pool);
    }

    /// Mark the set consumed. Fails if it already was.
    pub(crate) fn stop(&self) -> Result<(), Error> {
        match self.consumed.swap(true, Ordering::AcqRel) {
            false => Ok(()),
            true => Err(Error::Consumed),
        }
    }
}

/// Hardware and collaborators used by an advertiser.
pub struct LinkResources<C: Config> {
    pub timer: C::Timer,
    pub radio: C::Radio,
    pub clock: C::Clock,
    pub filter: C::Filter,
    pub notify: C::Notify,
    pub scheduler: C::Scheduler,
}

/// The advertising role of one advertising set.
pub struct Advertiser<'d, C: Config, const N: usize> {
    res: LinkResources<C>,
    data: &'d AdvSetData<'d, N>,
    params: AdvParams,
    features: Features,
    validator: Validator,
    chan_map_curr: ChannelMap,
    state: EventState,
    phase: Phase,
    ctx: Option<EventContext>,
    resume_pending: bool,
}

impl<'d, C: Config, const N: usize> Advertiser<'d, C, N> {
    /// Create an advertiser and apply `params` to the set's PDUs.
    pub fn new(
        res: LinkResources<C>,
        data: &'d AdvSetData<'d, N>,
        params: AdvParams,
        features: Features,
    ) -> Result<Self, Error> {
        data.configure(&params, &features)?;
        Ok(Self {
            res,
            data,
            params,
            features,
            validator: Validator::new(params.filter_policy, features.privacy, params.rl_idx),
            chan_map_curr: ChannelMap::NONE,
            state: EventState::Idle,
            phase: Phase::Idle,
            ctx: None,
            resume_pending: false,
        })
    }

    /// Change the parameters between events.
    pub fn set_params(&mut self, params: AdvParams) -> Result<(), Error> {
        if !matches!(self.state, EventState::Idle | EventState::Done) {
            return Err(Error::InvalidState);
        }
        self.data.configure(&params, &self.features)?;
        self.validator = Validator::new(params.filter_policy, self.features.privacy, params.rl_idx);
        self.params = params;
        Ok(())
    }

    pub fn params(&self) -> &AdvParams {
        &self.params
    }

    pub fn features(&self) -> &Features {
        &self.features
    }

    pub fn data(&self) -> &'d AdvSetData<'d, N> {
        self.data
    }

    pub fn state(&self) -> EventState {
        self.state
    }

    /// The handler the next radio interrupt goes to.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn resources(&self) -> &LinkResources<C> {
        &self.res
    }

    pub fn resources_mut(&mut self) -> &mut LinkResources<C> {
        &mut self.res
    }

    fn is_hdcd(&self) -> bool {
        self.params.kind == AdvKind::DirectHighDuty
    }

    fn handle(&self) -> u8 {
        self.params.handle
    }
}
