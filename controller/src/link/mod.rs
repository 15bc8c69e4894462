//! Link layer advertising state.
//!
//! Leaves first: PDU layout ([`pdu`]), the shared PDU arena ([`pool`]) and the producer /
//! consumer exchange built on it ([`double_buffer`]), request filtering ([`filter`]), host
//! notifications ([`notify`]) and finally the advertising engine itself ([`advertising`]).

pub mod advertising;
pub mod double_buffer;
pub mod filter;
pub mod notify;
pub mod pdu;
pub mod pool;
