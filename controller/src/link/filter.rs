//! Filtering of scan and connection requests.
//!
//! The resolving list and filter accept list themselves live outside the link layer and are
//! queried through [`ResolvingList`]. [`Validator`] combines those answers with the hardware
//! device match and the advertiser's own PDU to accept or reject a request.

use bt_hci::param::{AddrKind, AdvFilterPolicy, BdAddr};

use crate::link::pdu::{AdvPdu, PduType, BDADDR_SIZE};
use crate::{Address, Error};

/// Number of entries of a hardware device address filter.
pub const ALLOW_LIST_SIZE: usize = 8;

/// An identity resolving key.
pub type Irk = [u8; 16];

/// The contents of a hardware device address filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AllowList {
    enable_bitmask: u8,
    addr_type_bitmask: u8,
    addrs: [[u8; BDADDR_SIZE]; ALLOW_LIST_SIZE],
}

impl AllowList {
    pub const fn new() -> Self {
        Self {
            enable_bitmask: 0,
            addr_type_bitmask: 0,
            addrs: [[0; BDADDR_SIZE]; ALLOW_LIST_SIZE],
        }
    }

    /// Add an address, returning its entry index.
    pub fn add(&mut self, address: &Address) -> Result<u8, Error> {
        if let Some(idx) = self.find(address) {
            return Ok(idx);
        }
        let idx = (0..ALLOW_LIST_SIZE as u8)
            .find(|i| self.enable_bitmask & (1 << i) == 0)
            .ok_or(Error::NoBuffers)?;
        self.addrs[idx as usize].copy_from_slice(address.addr.raw());
        self.enable_bitmask |= 1 << idx;
        if address.is_random() {
            self.addr_type_bitmask |= 1 << idx;
        } else {
            self.addr_type_bitmask &= !(1 << idx);
        }
        Ok(idx)
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Entry matching the address, the way the hardware filter compares it.
    pub fn find(&self, address: &Address) -> Option<u8> {
        (0..ALLOW_LIST_SIZE as u8).find(|&i| {
            self.enable_bitmask & (1 << i) != 0
                && (self.addr_type_bitmask & (1 << i) != 0) == address.is_random()
                && self.addrs[i as usize] == address.addr.raw()
        })
    }

    pub fn enable_bitmask(&self) -> u8 {
        self.enable_bitmask
    }

    pub fn addr_type_bitmask(&self) -> u8 {
        self.addr_type_bitmask
    }

    pub fn addrs(&self) -> &[[u8; BDADDR_SIZE]; ALLOW_LIST_SIZE] {
        &self.addrs
    }
}

/// Query interface of the resolving list and filter accept list engine.
///
/// Resolving list indices are plain `u8` entry numbers; `None` stands for "not resolved".
pub trait ResolvingList {
    /// Whether address resolution is enabled.
    fn enabled(&self) -> bool;

    /// The device filter to load into the radio: the filter accept list when `allow_list` is
    /// set, the identity addresses of the resolving list otherwise.
    fn allow_list(&self, allow_list: bool) -> &AllowList;

    /// Keys to load into the radio's address resolver.
    fn irks(&self) -> &[Irk];

    /// Resolving list entry of the key at `irk_match` in [`ResolvingList::irks`].
    fn irk_index(&self, irk_match: u8) -> u8;

    /// Whether a peer identity address may talk to us. Looks the address up when `rl_idx`
    /// is unresolved and stores the entry found.
    fn addr_allowed(&self, kind: AddrKind, addr: &BdAddr, rl_idx: &mut Option<u8>) -> bool;

    /// Whether the resolving list entry is also on the filter accept list.
    fn irk_allow_listed(&self, rl_idx: Option<u8>) -> bool;
}

/// A request as seen by the receiver.
#[derive(Debug, Clone, Copy)]
pub struct Received<'a> {
    pub pdu: &'a AdvPdu,
    /// The hardware filter matched the sender.
    pub devmatch: bool,
    /// Resolving list entry of the IRK that resolved the sender.
    pub rl_idx: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Verdict {
    Accept { rl_idx: Option<u8> },
    Reject,
}

/// Request acceptance rules of an advertising set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Validator {
    /// Peers are identified by their on-air address only.
    Identity { policy: AdvFilterPolicy },
    /// Peers may use resolvable private addresses.
    Privacy {
        policy: AdvFilterPolicy,
        own_rl_idx: Option<u8>,
    },
}

fn scan_filtered(policy: AdvFilterPolicy) -> bool {
    matches!(policy, AdvFilterPolicy::FilterScan | AdvFilterPolicy::FilterConnAndScan)
}

fn conn_filtered(policy: AdvFilterPolicy) -> bool {
    matches!(policy, AdvFilterPolicy::FilterConn | AdvFilterPolicy::FilterConnAndScan)
}

impl Validator {
    pub fn new(policy: AdvFilterPolicy, privacy: bool, own_rl_idx: Option<u8>) -> Self {
        if privacy {
            Self::Privacy { policy, own_rl_idx }
        } else {
            Self::Identity { policy }
        }
    }

    pub fn policy(&self) -> AdvFilterPolicy {
        match *self {
            Self::Identity { policy } | Self::Privacy { policy, .. } => policy,
        }
    }

    pub fn is_privacy(&self) -> bool {
        matches!(self, Self::Privacy { .. })
    }

    fn peer_allowed<R: ResolvingList>(
        &self,
        filtered: bool,
        rx: &Received<'_>,
        peer: &BdAddr,
        rl: &R,
        rl_idx: &mut Option<u8>,
    ) -> bool {
        match self {
            Self::Identity { .. } => !filtered || rx.devmatch,
            Self::Privacy { .. } if !filtered => rl.addr_allowed(rx.pdu.tx_addr_kind(), peer, rl_idx),
            Self::Privacy { .. } => rx.devmatch || rl.irk_allow_listed(*rl_idx),
        }
    }

    /// Check a SCAN_REQ against the advertising PDU currently on air.
    pub fn scan_req<R: ResolvingList>(&self, adv: &AdvPdu, rx: &Received<'_>, rl: &R) -> Verdict {
        let Some(req) = rx.pdu.scan_req() else {
            return Verdict::Reject;
        };
        let mut rl_idx = rx.rl_idx;
        if self.peer_allowed(scan_filtered(self.policy()), rx, &req.scanner_addr(), rl, &mut rl_idx)
            && adv.tx_add() == rx.pdu.rx_add()
            && adv.adv_addr() == req.adv_addr()
        {
            Verdict::Accept { rl_idx }
        } else {
            Verdict::Reject
        }
    }

    /// Check a CONNECT_IND against the advertising PDU currently on air.
    ///
    /// The filter policy does not apply to directed advertising; the initiator must be the
    /// target instead.
    pub fn connect_ind<R: ResolvingList>(&self, adv: &AdvPdu, rx: &Received<'_>, rl: &R) -> Verdict {
        let Some(ci) = rx.pdu.connect_ind() else {
            return Verdict::Reject;
        };
        let init_addr = ci.init_addr();
        let mut rl_idx = rx.rl_idx;
        let adv_addr_ok = adv.tx_add() == rx.pdu.rx_add() && adv.adv_addr() == ci.adv_addr();

        let accepted = if adv.pdu_type() == Some(PduType::AdvDirectInd) {
            let allowed = match self {
                Self::Identity { .. } => true,
                Self::Privacy { .. } => rl.addr_allowed(rx.pdu.tx_addr_kind(), &init_addr, &mut rl_idx),
            };
            allowed
                && adv_addr_ok
                && match (self, rl_idx) {
                    (Self::Privacy { own_rl_idx, .. }, Some(idx)) => Some(idx) == *own_rl_idx,
                    _ => adv.rx_add() == rx.pdu.tx_add() && adv.target_addr() == init_addr,
                }
        } else {
            self.peer_allowed(conn_filtered(self.policy()), rx, &init_addr, rl, &mut rl_idx) && adv_addr_ok
        };

        if accepted {
            Verdict::Accept { rl_idx }
        } else {
            Verdict::Reject
        }
    }
}
