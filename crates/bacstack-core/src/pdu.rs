//! The addressed unit of work passed between layers.
//!
//! A [`Pdu`] carries a payload plus the delivery metadata every layer in a
//! stack cares about: where it came from, where it is going, whether the
//! sender expects a reply, and the network priority. Link layers fill in
//! the source on receive; the network layer rewrites both ends when it
//! relays between adapters.

use alloc::vec::Vec;

use crate::address::Address;
use crate::npdu::NetworkPriority;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    /// Sender, when known. Filled in by the receiving link layer.
    pub source: Option<Address>,
    /// Recipient. Every PDU is addressed; for inbound traffic this is the
    /// local station or the broadcast scope it arrived under.
    pub destination: Address,
    /// Whether the application expects a response to this payload.
    pub expecting_reply: bool,
    pub priority: NetworkPriority,
    pub data: Vec<u8>,
}

impl Pdu {
    pub fn new(data: impl Into<Vec<u8>>, destination: Address) -> Self {
        Pdu {
            source: None,
            destination,
            expecting_reply: false,
            priority: NetworkPriority::Normal,
            data: data.into(),
        }
    }

    pub fn with_source(mut self, source: Address) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_expecting_reply(mut self, expecting_reply: bool) -> Self {
        self.expecting_reply = expecting_reply;
        self
    }

    pub fn with_priority(mut self, priority: NetworkPriority) -> Self {
        self.priority = priority;
        self
    }
}
