//! Radio interrupt handlers.
//!
//! Per channel the radio goes TX, then RX for T_IFS, then either TX of a scan response or a
//! disable. [`Phase`] names the handler the next interrupt belongs to.

use super::{Advertiser, ConnContext, EventState};
use crate::clock::ClockGate;
use crate::config::Config;
use crate::link::filter::{Received, ResolvingList, Verdict};
use crate::link::notify::{Handoff, Notification, NotifyQueue};
use crate::link::pdu::AdvPdu;
use crate::phy::{Radio, Switch, T_IFS_US};
use crate::scheduler::Scheduler;
use crate::Error;

/// RSSI reported when the radio did not measure one.
const RSSI_NOT_AVAILABLE: u8 = 0x7F;

/// Owner of the next radio interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Phase {
    /// No event running; stray interrupts only clear the radio status.
    Idle = 0,
    /// The advertising PDU is being transmitted.
    Tx = 1,
    /// Listening for a request.
    Rx = 2,
    /// The last packet of the channel is on air or the radio is being disabled.
    Done = 3,
    /// The event is being torn down.
    Abort = 4,
}

impl<'d, C: Config, const N: usize> Advertiser<'d, C, N> {
    const ISR_TABLE: [fn(&mut Self); 5] = [
        Self::isr_race,
        Self::isr_tx,
        Self::isr_rx,
        Self::isr_done,
        Self::isr_abort,
    ];

    /// Handle the radio interrupt.
    pub fn on_radio_isr(&mut self) {
        let handler = Self::ISR_TABLE[self.phase as usize];
        handler(self)
    }

    fn isr_tx(&mut self) {
        let phy = self.params.phy;
        let radio = &mut self.res.radio;
        radio.status_reset();

        self.phase = Phase::Rx;
        radio.set_tifs(T_IFS_US);
        radio.set_switch(Switch::Tx);
        radio.set_rx_packet();

        assert!(!radio.is_ready());

        if self.validator.is_privacy() && self.res.filter.enabled() {
            radio.ar_configure(self.res.filter.irks());
        }

        // +/- 2 us active clock jitter, +1 us compensation
        let hcto = radio.tifs_base_us() + T_IFS_US + 4 + 1 + radio.rx_chain_delay_us(phy) + phy.addr_us();
        radio.hcto_configure(hcto.saturating_sub(radio.tx_chain_delay_us(phy)));

        // The end of a CONNECT_IND anchors the first connection event.
        radio.end_capture();

        if self.features.scan_req_rssi {
            radio.rssi_measure();
        }
    }

    fn isr_rx(&mut self) {
        let radio = &mut self.res.radio;
        let done = radio.is_done();
        let (crc_ok, devmatch, irk_match, rssi) = if done {
            (
                radio.crc_is_valid(),
                radio.filter_match().is_some(),
                radio.ar_match(),
                radio.rssi(),
            )
        } else {
            (false, false, None, None)
        };
        radio.status_reset();

        if done && crc_ok && self.rx_pdu(devmatch, irk_match, rssi) {
            return;
        }

        self.phase = Phase::Done;
        self.res.radio.disable();
    }

    /// Act on a received PDU. Returns whether the radio was left running for a scan response
    /// or a handoff.
    fn rx_pdu(&mut self, devmatch: bool, irk_match: Option<u8>, rssi: Option<u8>) -> bool {
        // An IRK match implies address resolution is enabled.
        let rl_idx = if self.validator.is_privacy() {
            irk_match.map(|m| self.res.filter.irk_index(m))
        } else {
            None
        };
        let pdu = *self.res.radio.rx_packet();
        let Some(adv) = self.data.adv.current().map(|p| self.data.pool.get(p)) else {
            return false;
        };
        let rx = Received { pdu: &pdu, devmatch, rl_idx };

        if let Verdict::Accept { .. } = self.validator.scan_req(&adv, &rx, &self.res.filter) {
            return match self.respond_scan(&pdu, rssi) {
                Ok(()) => true,
                Err(e) => {
                    warn!("[adv] set {} scan response dropped: {:?}", self.handle(), e);
                    false
                }
            };
        }

        let conn = self.params.conn.filter(|_| self.params.kind.is_connectable());
        if let Some(conn) = conn {
            if self.data.is_consumed() {
                return false;
            }
            if let Verdict::Accept { rl_idx } = self.validator.connect_ind(&adv, &rx, &self.res.filter) {
                return match self.handoff(conn, &adv, &pdu, rl_idx) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("[adv] set {} connection declined: {:?}", self.handle(), e);
                        false
                    }
                };
            }
        }
        false
    }

    fn respond_scan(&mut self, req: &AdvPdu, rssi: Option<u8>) -> Result<(), Error> {
        self.phase = Phase::Done;
        self.res.radio.set_switch(Switch::Disable);
        let data = self.data;
        let scan_rsp = unwrap!(data.scan_rsp.current());
        data.pool.with(scan_rsp, |pdu| self.res.radio.set_tx_packet(pdu));

        assert!(!self.res.radio.is_ready());

        if self.features.scan_req_notify {
            let report = Notification::ScanRequest {
                handle: self.handle(),
                pdu: *req,
                rssi: rssi.map(|r| r & 0x7F).unwrap_or(RSSI_NOT_AVAILABLE),
            };
            // Without a report the scan response is not sent either.
            self.res.notify.push(report).map_err(|_| Error::QueueFull)?;
        }
        Ok(())
    }

    fn handoff(&mut self, conn: ConnContext, adv: &AdvPdu, ci: &AdvPdu, rl_idx: Option<u8>) -> Result<(), Error> {
        let needed = if self.features.chan_sel_2 { 2 } else { 1 };
        if self.res.notify.available() < needed {
            return Err(Error::NoBuffers);
        }

        self.phase = Phase::Abort;
        self.res.radio.disable();
        assert!(!self.res.radio.is_ready());

        unwrap!(self.data.stop());

        let phy = self.params.phy;
        let radio = &self.res.radio;
        let handoff = Handoff {
            handle: self.params.handle,
            conn,
            pdu: *ci,
            ticks_anchor: radio.start_ticks(),
            us_radio_end: radio.end_us().wrapping_sub(radio.tx_chain_delay_us(phy)),
            us_radio_rdy: radio.rx_ready_delay_us(phy),
            rl_idx,
        };
        info!("[adv] set {} connected, handing over to {}", self.params.handle, conn.handle);
        unwrap!(self.res.notify.push(Notification::Connection(handoff)));

        if self.features.chan_sel_2 {
            let csa2 = adv.chan_sel() && ci.chan_sel();
            unwrap!(self.res.notify.push(Notification::ChannelSelection { conn, csa2 }));
        }
        Ok(())
    }

    fn isr_done(&mut self) {
        self.res.radio.status_reset();

        if self.chan_map_curr.is_empty() && self.is_hdcd() {
            self.chan_map_curr = self.params.channel_map;
        }

        if !self.chan_map_curr.is_empty() {
            self.chan_prepare();
            self.res.radio.tx_enable();
            self.res.radio.end_capture();
            return;
        }

        self.res.radio.filter_disable();

        if self.features.adv_indication && self.res.notify.available() > 0 {
            unwrap!(self.res.notify.push(Notification::AdvIndication { handle: self.handle() }));
        }

        self.cleanup();
    }

    fn isr_abort(&mut self) {
        self.res.radio.filter_disable();
        self.cleanup();
    }

    fn cleanup(&mut self) {
        self.phase = Phase::Idle;
        self.res.radio.tmr_stop();
        unwrap!(self.res.clock.release());
        self.state = if self.resume_pending {
            EventState::Reserved
        } else {
            EventState::Done
        };
        trace!("[adv] set {} event done", self.handle());
        self.res.scheduler.done(self.handle());
    }

    fn isr_race(&mut self) {
        self.res.radio.status_reset();
    }
}
