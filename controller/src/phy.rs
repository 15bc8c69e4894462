//! Physical layer interface.
//!
//! This module defines the radio capabilities the link layer needs, along with the primary
//! advertising channels and the PHY timing constants. The hardware interface implements
//! [`Radio`] once per MCU family.

use embassy_time::Instant;

use crate::link::filter::{AllowList, Irk};
use crate::link::pdu::AdvPdu;

/// Access address used by every advertising channel PDU.
pub const ADVERTISING_ACCESS_ADDRESS: u32 = 0x8E89_BED6;

/// CRC polynomial `x^24 + x^10 + x^9 + x^6 + x^4 + x^3 + x + 1`, without the implicit top bit.
pub const CRC_POLY: u32 = 0x0000_065B;

/// CRC preset used on advertising channels.
pub const ADVERTISING_CRC_INIT: u32 = 0x0055_5555;

/// Inter frame space, in microseconds.
pub const T_IFS_US: u32 = 150;

/// A BLE PHY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phy {
    #[default]
    Le1M,
    Le2M,
    LeCoded,
}

impl Phy {
    /// Air time of the preamble and access address, in microseconds.
    pub const fn addr_us(self) -> u32 {
        match self {
            Phy::Le1M => 40,
            Phy::Le2M => 24,
            Phy::LeCoded => 376,
        }
    }
}

/// One of the three primary advertising channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdvChannel(u8);

impl AdvChannel {
    pub const CH37: Self = Self(37);
    pub const CH38: Self = Self(38);
    pub const CH39: Self = Self(39);

    /// Returns the channel for the given channel map bit (0 = channel 37).
    pub const fn from_map_bit(bit: u8) -> Option<Self> {
        if bit < 3 {
            Some(Self(37 + bit))
        } else {
            None
        }
    }

    /// Returns the channel index (37, 38 or 39).
    pub const fn index(&self) -> u8 {
        self.0
    }

    /// Returns the center frequency of this channel in MHz.
    pub const fn freq_mhz(&self) -> u16 {
        match self.0 {
            37 => 2402,
            38 => 2426,
            _ => 2480,
        }
    }

    /// Returns the data whitening initialization value for this channel.
    pub const fn whitening_iv(&self) -> u8 {
        self.0 | 0x40
    }
}

/// What the radio does on its own once the current packet is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Switch {
    /// Ramp up the receiver T_IFS after the end of transmission.
    Rx,
    /// Ramp up the transmitter T_IFS after the end of reception.
    Tx,
    /// Disable the radio.
    Disable,
}

/// The radio hardware seen by the link layer.
///
/// Every method is called from interrupt context or from the scheduler's prepare context and
/// must return promptly. Completion of a transmission, reception or disable raises the radio
/// interrupt, which the integrator forwards to
/// [`Advertiser::on_radio_isr`](crate::link::advertising::Advertiser::on_radio_isr).
pub trait Radio {
    /// Reset the radio to a known idle state.
    fn reset(&mut self);

    /// Set the transmit power, in dBm.
    fn set_tx_power(&mut self, dbm: i8);

    /// Configure PHY, packet shape, access address and CRC.
    fn configure(&mut self, phy: Phy, access_address: u32, crc_poly: u32, crc_init: u32);

    /// Tune to the given advertising channel.
    fn set_channel(&mut self, channel: AdvChannel);

    /// Load the PDU to transmit next.
    fn set_tx_packet(&mut self, pdu: &AdvPdu);

    /// Point reception at the radio's scratch buffer.
    fn set_rx_packet(&mut self);

    /// The last PDU received into the scratch buffer.
    fn rx_packet(&self) -> &AdvPdu;

    /// Select what happens when the current packet completes.
    fn set_switch(&mut self, switch: Switch);

    /// Set the inter frame spacing used by automatic switching, in microseconds.
    fn set_tifs(&mut self, us: u32);

    /// Schedule transmission at the given anchor; returns the remainder in microseconds.
    fn start_at(&mut self, at: Instant, remainder: u32) -> u32;

    /// Start transmitting now.
    fn tx_enable(&mut self);

    /// Trigger a disable. Completion raises the radio interrupt.
    fn disable(&mut self);

    /// Whether the radio is ramped up or active.
    fn is_ready(&self) -> bool;

    /// Whether the last operation completed a packet.
    fn is_done(&self) -> bool;

    /// Whether the last received packet passed the CRC check.
    fn crc_is_valid(&self) -> bool;

    /// Clear status, timer, filter, address resolution and RSSI events.
    fn status_reset(&mut self);

    /// Load the hardware device address filter.
    fn filter_configure(&mut self, list: &AllowList);

    /// Disable the hardware device address filter.
    fn filter_disable(&mut self);

    /// Index of the filter entry matching the last received packet, if any.
    fn filter_match(&self) -> Option<u8>;

    /// Load identity resolving keys into the address resolver.
    fn ar_configure(&mut self, _irks: &[Irk]) {}

    /// Index of the IRK resolving the last received address, if any.
    fn ar_match(&self) -> Option<u8> {
        None
    }

    /// Start an RSSI measurement on the next reception.
    fn rssi_measure(&mut self) {}

    /// RSSI of the last reception as a positive magnitude in -dBm, if measured.
    fn rssi(&self) -> Option<u8> {
        None
    }

    /// Time base of the automatic T_IFS switch, in microseconds.
    fn tifs_base_us(&self) -> u32;

    /// Arm the header complete timeout, in microseconds from the timer start.
    fn hcto_configure(&mut self, us: u32);

    /// Capture the end of the next packet.
    fn end_capture(&mut self);

    /// Tick at which the radio timer was started.
    fn start_ticks(&self) -> u32;

    /// Captured end of the last packet, in microseconds from the timer start.
    fn end_us(&self) -> u32;

    /// Stop the radio timer.
    fn tmr_stop(&mut self);

    /// Latency between the timer event and the first bit on air.
    fn tx_chain_delay_us(&self, _phy: Phy) -> u32 {
        0
    }

    /// Latency between the last bit on air and the receive event.
    fn rx_chain_delay_us(&self, _phy: Phy) -> u32 {
        0
    }

    /// Receiver ramp-up time.
    fn rx_ready_delay_us(&self, _phy: Phy) -> u32 {
        0
    }
}
