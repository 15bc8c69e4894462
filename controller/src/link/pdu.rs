//! Advertising channel PDUs.
//!
//! Layout on air, least significant bit first:
//!
//! ```text
//! | PDU Type (4) | RFU (1) | ChSel (1) | TxAdd (1) | RxAdd (1) | Length (8) | Payload (0-37 octets) |
//! ```
//!
//! Multi-octet payload fields are little endian; device addresses are carried in their
//! native (LSB first) byte order.

use bt_hci::param::{AddrKind, BdAddr};

use crate::codec;
use crate::cursor::{ReadCursor, WriteCursor};

/// Size of a device address.
pub const BDADDR_SIZE: usize = 6;

/// Size of the PDU header.
pub const PDU_HEADER_SIZE: usize = 2;

/// Maximum payload of a legacy advertising channel PDU.
pub const PDU_AC_PAYLOAD_SIZE_MAX: usize = 37;

/// Maximum advertising or scan response data carried after AdvA.
pub const ADV_DATA_LEN_MAX: usize = PDU_AC_PAYLOAD_SIZE_MAX - BDADDR_SIZE;

/// Payload length of a SCAN_REQ: ScanA and AdvA.
pub const SCAN_REQ_LEN: u8 = 2 * BDADDR_SIZE as u8;

/// Payload length of an ADV_DIRECT_IND: AdvA and TargetA.
pub const DIRECT_IND_LEN: u8 = 2 * BDADDR_SIZE as u8;

/// Size of the LLData field of a CONNECT_IND.
pub const LL_DATA_LEN: usize = 22;

/// Payload length of a CONNECT_IND: InitA, AdvA and LLData.
pub const CONNECT_IND_LEN: u8 = (2 * BDADDR_SIZE + LL_DATA_LEN) as u8;

const TYPE_MASK: u8 = 0x0F;
const CHSEL_BIT: u8 = 1 << 5;
const TXADD_BIT: u8 = 1 << 6;
const RXADD_BIT: u8 = 1 << 7;

/// Advertising channel PDU types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PduType {
    AdvInd = 0b0000,
    AdvDirectInd = 0b0001,
    AdvNonconnInd = 0b0010,
    ScanReq = 0b0011,
    ScanRsp = 0b0100,
    ConnectInd = 0b0101,
    AdvScanInd = 0b0110,
    AdvExtInd = 0b0111,
}

impl PduType {
    pub const fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw & TYPE_MASK {
            0b0000 => Self::AdvInd,
            0b0001 => Self::AdvDirectInd,
            0b0010 => Self::AdvNonconnInd,
            0b0011 => Self::ScanReq,
            0b0100 => Self::ScanRsp,
            0b0101 => Self::ConnectInd,
            0b0110 => Self::AdvScanInd,
            0b0111 => Self::AdvExtInd,
            _ => return None,
        })
    }
}

/// A raw advertising channel PDU, header and payload.
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdvPdu {
    buf: [u8; PDU_HEADER_SIZE + PDU_AC_PAYLOAD_SIZE_MAX],
}

impl Default for AdvPdu {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for AdvPdu {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AdvPdu")
            .field("type", &self.pdu_type())
            .field("tx_add", &self.tx_add())
            .field("rx_add", &self.rx_add())
            .field("payload", &crate::fmt::Bytes(self.payload()))
            .finish()
    }
}

impl AdvPdu {
    pub const EMPTY: Self = Self::new();

    pub const fn new() -> Self {
        Self {
            buf: [0; PDU_HEADER_SIZE + PDU_AC_PAYLOAD_SIZE_MAX],
        }
    }

    /// Parse a PDU from its on-air bytes, starting at the header.
    pub fn from_bytes(data: &[u8]) -> Result<Self, codec::Error> {
        let mut r = ReadCursor::new(data);
        let mut pdu = Self::new();
        pdu.buf[0] = r.read()?;
        let len: u8 = r.read()?;
        if len as usize > PDU_AC_PAYLOAD_SIZE_MAX {
            return Err(codec::Error::InvalidValue);
        }
        pdu.buf[1] = len;
        let payload = r.slice(len as usize)?;
        pdu.buf[PDU_HEADER_SIZE..PDU_HEADER_SIZE + payload.len()].copy_from_slice(payload);
        Ok(pdu)
    }

    /// The on-air bytes, header included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..PDU_HEADER_SIZE + self.len() as usize]
    }

    pub fn pdu_type(&self) -> Option<PduType> {
        PduType::from_raw(self.buf[0])
    }

    /// Set the type, clearing the RFU bit.
    pub fn set_pdu_type(&mut self, ty: PduType) {
        self.buf[0] = (self.buf[0] & (CHSEL_BIT | TXADD_BIT | RXADD_BIT)) | ty as u8;
    }

    pub fn chan_sel(&self) -> bool {
        self.buf[0] & CHSEL_BIT != 0
    }

    pub fn set_chan_sel(&mut self, chan_sel: bool) {
        self.set_bit(CHSEL_BIT, chan_sel);
    }

    pub fn tx_add(&self) -> bool {
        self.buf[0] & TXADD_BIT != 0
    }

    pub fn set_tx_add(&mut self, random: bool) {
        self.set_bit(TXADD_BIT, random);
    }

    pub fn rx_add(&self) -> bool {
        self.buf[0] & RXADD_BIT != 0
    }

    pub fn set_rx_add(&mut self, random: bool) {
        self.set_bit(RXADD_BIT, random);
    }

    /// Kind of the address sent by the transmitter of this PDU.
    pub fn tx_addr_kind(&self) -> AddrKind {
        if self.tx_add() {
            AddrKind::RANDOM
        } else {
            AddrKind::PUBLIC
        }
    }

    fn set_bit(&mut self, bit: u8, set: bool) {
        if set {
            self.buf[0] |= bit;
        } else {
            self.buf[0] &= !bit;
        }
    }

    pub fn len(&self) -> u8 {
        self.buf[1]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_len(&mut self, len: u8) -> Result<(), codec::Error> {
        if len as usize > PDU_AC_PAYLOAD_SIZE_MAX {
            return Err(codec::Error::InvalidValue);
        }
        self.buf[1] = len;
        Ok(())
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf[PDU_HEADER_SIZE..PDU_HEADER_SIZE + self.len() as usize]
    }

    /// Rewrite the payload through a cursor; the length becomes whatever was written.
    pub fn write_payload<F>(&mut self, f: F) -> Result<(), codec::Error>
    where
        F: FnOnce(&mut WriteCursor<'_>) -> Result<(), codec::Error>,
    {
        let mut w = WriteCursor::new(&mut self.buf[PDU_HEADER_SIZE..]);
        f(&mut w)?;
        self.buf[1] = w.len() as u8;
        Ok(())
    }

    fn addr_at(&self, offset: usize) -> BdAddr {
        let mut addr = [0; BDADDR_SIZE];
        addr.copy_from_slice(&self.buf[PDU_HEADER_SIZE + offset..PDU_HEADER_SIZE + offset + BDADDR_SIZE]);
        BdAddr::new(addr)
    }

    fn set_addr_at(&mut self, offset: usize, addr: &BdAddr) {
        self.buf[PDU_HEADER_SIZE + offset..PDU_HEADER_SIZE + offset + BDADDR_SIZE].copy_from_slice(addr.raw());
    }

    /// AdvA of ADV_IND, ADV_DIRECT_IND, ADV_NONCONN_IND, ADV_SCAN_IND and SCAN_RSP.
    pub fn adv_addr(&self) -> BdAddr {
        self.addr_at(0)
    }

    pub fn set_adv_addr(&mut self, addr: &BdAddr) {
        self.set_addr_at(0, addr);
    }

    /// TargetA of an ADV_DIRECT_IND.
    pub fn target_addr(&self) -> BdAddr {
        self.addr_at(BDADDR_SIZE)
    }

    pub fn set_target_addr(&mut self, addr: &BdAddr) {
        self.set_addr_at(BDADDR_SIZE, addr);
    }

    /// Advertising or scan response data following AdvA.
    pub fn data(&self) -> &[u8] {
        self.payload().get(BDADDR_SIZE..).unwrap_or(&[])
    }

    /// View as a SCAN_REQ, if this is a well formed one.
    pub fn scan_req(&self) -> Option<ScanReq<'_>> {
        (self.pdu_type() == Some(PduType::ScanReq) && self.len() == SCAN_REQ_LEN).then_some(ScanReq(self))
    }

    /// View as a CONNECT_IND, if this is a well formed one.
    pub fn connect_ind(&self) -> Option<ConnectInd<'_>> {
        (self.pdu_type() == Some(PduType::ConnectInd) && self.len() == CONNECT_IND_LEN).then_some(ConnectInd(self))
    }
}

/// A SCAN_REQ: ScanA followed by AdvA.
#[derive(Clone, Copy)]
pub struct ScanReq<'a>(&'a AdvPdu);

impl ScanReq<'_> {
    pub fn scanner_addr(&self) -> BdAddr {
        self.0.addr_at(0)
    }

    pub fn adv_addr(&self) -> BdAddr {
        self.0.addr_at(BDADDR_SIZE)
    }
}

/// A CONNECT_IND: InitA, AdvA and LLData.
#[derive(Clone, Copy)]
pub struct ConnectInd<'a>(&'a AdvPdu);

impl ConnectInd<'_> {
    pub fn init_addr(&self) -> BdAddr {
        self.0.addr_at(0)
    }

    pub fn adv_addr(&self) -> BdAddr {
        self.0.addr_at(BDADDR_SIZE)
    }

    /// Decode the connection parameters.
    pub fn ll_data(&self) -> Result<LlData, codec::Error> {
        let mut r = ReadCursor::new(&self.0.payload()[2 * BDADDR_SIZE..]);
        let access_address = r.read()?;
        let crc = r.slice(3)?;
        let crc_init = u32::from_le_bytes([crc[0], crc[1], crc[2], 0]);
        let win_size = r.read()?;
        let win_offset = r.read()?;
        let interval = r.read()?;
        let latency = r.read()?;
        let timeout = r.read()?;
        let mut channel_map = [0; 5];
        channel_map.copy_from_slice(r.slice(5)?);
        let hop_sca: u8 = r.read()?;
        Ok(LlData {
            access_address,
            crc_init,
            win_size,
            win_offset,
            interval,
            latency,
            timeout,
            channel_map,
            hop: hop_sca & 0x1F,
            sca: hop_sca >> 5,
        })
    }
}

/// Connection parameters carried by a CONNECT_IND.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LlData {
    pub access_address: u32,
    pub crc_init: u32,
    /// Transmit window size, in units of 1.25 ms.
    pub win_size: u8,
    /// Transmit window offset, in units of 1.25 ms.
    pub win_offset: u16,
    /// Connection interval, in units of 1.25 ms.
    pub interval: u16,
    pub latency: u16,
    /// Supervision timeout, in units of 10 ms.
    pub timeout: u16,
    pub channel_map: [u8; 5],
    pub hop: u8,
    pub sca: u8,
}
