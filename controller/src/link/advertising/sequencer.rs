//! Primary advertising channel sequencing.

use super::{Advertiser, Phase};
use crate::config::Config;
use crate::link::pdu::PduType;
use crate::phy::{AdvChannel, Radio, Switch, T_IFS_US};

/// Set of primary advertising channels. Bit 0 is channel 37.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelMap(u8);

impl Default for ChannelMap {
    fn default() -> Self {
        Self::ALL
    }
}

impl ChannelMap {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(0b111);

    pub const fn new(ch37: bool, ch38: bool, ch39: bool) -> Self {
        Self(ch37 as u8 | (ch38 as u8) << 1 | (ch39 as u8) << 2)
    }

    /// Bits above channel 39 are ignored.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0b111)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Take the lowest channel out of the map.
    pub fn next_channel(&mut self) -> Option<AdvChannel> {
        if self.0 == 0 {
            return None;
        }
        let bit = self.0.trailing_zeros() as u8;
        self.0 &= self.0 - 1;
        AdvChannel::from_map_bit(bit)
    }
}

impl<C: Config, const N: usize> Advertiser<'_, C, N> {
    /// Load the latest PDUs and tune to the next channel of the event.
    pub(super) fn chan_prepare(&mut self) {
        let data = self.data;
        let (adv_ref, adv_updated) = data.adv.latest(data.pool);
        let (scan_rsp_ref, scan_rsp_updated) = data.scan_rsp.latest(data.pool);
        let adv = data.pool.get(adv_ref);

        if self.validator.is_privacy() && (adv_updated || scan_rsp_updated) {
            // The scan response goes out with the address we advertise with.
            data.pool.with_mut(scan_rsp_ref, |scan_rsp| scan_rsp.set_adv_addr(&adv.adv_addr()));
        }

        let radio = &mut self.res.radio;
        radio.set_tx_packet(&adv);

        let listen = match adv.pdu_type() {
            Some(PduType::AdvNonconnInd) => false,
            Some(PduType::AdvExtInd) => !self.features.ext_adv,
            _ => true,
        };
        if listen {
            self.phase = Phase::Tx;
            radio.set_tifs(T_IFS_US);
            radio.set_switch(Switch::Rx);
        } else {
            self.phase = Phase::Done;
            radio.set_switch(Switch::Disable);
        }

        let channel = unwrap!(self.chan_map_curr.next_channel());
        trace!("[adv] set {} on channel {}", self.params.handle, channel.index());
        radio.set_channel(channel);
    }
}
