//! NPDU header (NPCI) and network-layer message codecs.
//!
//! The NPCI layout is version, control octet, then optional fields in a
//! fixed order, each present only when its control bit is set:
//!
//! ```text
//! version | control | DNET DLEN [DADR] | SNET SLEN [SADR] | hop | type [vendor]
//!            0x80 network message          0x08 source present
//!            0x20 destination present      0x04 expecting reply
//!                                          0x03 priority
//! ```
//!
//! A zero DLEN marks a broadcast on the destination network, and DNET
//! 65535 marks the global broadcast. The hop count rides along whenever a
//! destination is present so routers can age a PDU out of a loop.

use core::fmt;

use crate::address::{Address, AddressKind, Mac};
use crate::encoding::{Reader, Writer};
use crate::{DecodeError, EncodeError};

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

/// BACnet network layer protocol version (always `0x01`).
pub const NPDU_VERSION: u8 = 0x01;

/// Starting hop count for freshly routed PDUs.
pub const DEFAULT_HOP_COUNT: u8 = 255;

/// DNET value reserved for the global broadcast.
pub const GLOBAL_BROADCAST_NETWORK: u16 = 0xFFFF;

const CONTROL_NETWORK_MESSAGE: u8 = 0x80;
const CONTROL_HAS_DESTINATION: u8 = 0x20;
const CONTROL_HAS_SOURCE: u8 = 0x08;
const CONTROL_EXPECTING_REPLY: u8 = 0x04;
const CONTROL_PRIORITY_MASK: u8 = 0x03;

/// The two low control bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NetworkPriority {
    #[default]
    Normal,
    Urgent,
    CriticalEquipment,
    LifeSafety,
}

impl NetworkPriority {
    pub const fn from_bits(bits: u8) -> Self {
        match bits & CONTROL_PRIORITY_MASK {
            0 => NetworkPriority::Normal,
            1 => NetworkPriority::Urgent,
            2 => NetworkPriority::CriticalEquipment,
            _ => NetworkPriority::LifeSafety,
        }
    }

    pub const fn to_bits(self) -> u8 {
        match self {
            NetworkPriority::Normal => 0,
            NetworkPriority::Urgent => 1,
            NetworkPriority::CriticalEquipment => 2,
            NetworkPriority::LifeSafety => 3,
        }
    }
}

/// A DNET/SNET network number paired with a station MAC.
///
/// The wire form is the network in big-endian, a length octet, then the
/// MAC bytes. A zero length is legal for destinations and means every
/// station on that network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NpduAddress {
    pub network: u16,
    pub mac: Mac,
}

impl NpduAddress {
    /// The DADR wire form of a destination, `None` for the local classes
    /// which never put a destination in the NPCI.
    pub fn from_destination(addr: &Address) -> Option<NpduAddress> {
        match addr.kind() {
            AddressKind::RemoteStation { network, mac } => Some(NpduAddress { network, mac }),
            AddressKind::RemoteBroadcast(network) => Some(NpduAddress {
                network,
                mac: Mac::empty(),
            }),
            AddressKind::GlobalBroadcast => Some(NpduAddress {
                network: GLOBAL_BROADCAST_NETWORK,
                mac: Mac::empty(),
            }),
            AddressKind::LocalStation(_) | AddressKind::LocalBroadcast => None,
        }
    }

    /// Reads a DADR back into an address class. DNET 65535 is always the
    /// global broadcast, whatever the MAC says.
    pub fn to_destination(&self) -> Address {
        if self.network == GLOBAL_BROADCAST_NETWORK {
            Address::global_broadcast()
        } else if self.mac.is_empty() {
            Address::remote_broadcast(self.network)
        } else {
            Address::remote_station(self.network, self.mac)
        }
    }

    /// Reads a SADR. A source is always a single remote station.
    pub fn to_source(&self) -> Address {
        Address::remote_station(self.network, self.mac)
    }
}

/// The network protocol control information at the front of every NPDU.
///
/// `message_type` doubles as the network-message flag: `Some` encodes with
/// control bit 0x80 set and the payload is a network-layer message, `None`
/// means the payload is an APDU for the application layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Npci {
    pub destination: Option<NpduAddress>,
    pub source: Option<NpduAddress>,
    /// Written whenever a destination is present; `None` encodes as
    /// [`DEFAULT_HOP_COUNT`].
    pub hop_count: Option<u8>,
    pub expecting_reply: bool,
    pub priority: NetworkPriority,
    pub message_type: Option<u8>,
    /// Present on the wire only for vendor message types (0x80..).
    pub vendor_id: Option<u16>,
}

impl Npci {
    pub const fn new() -> Self {
        Npci {
            destination: None,
            source: None,
            hop_count: None,
            expecting_reply: false,
            priority: NetworkPriority::Normal,
            message_type: None,
            vendor_id: None,
        }
    }

    pub const fn is_network_message(&self) -> bool {
        self.message_type.is_some()
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        let mut control = self.priority.to_bits();
        if self.expecting_reply {
            control |= CONTROL_EXPECTING_REPLY;
        }
        if self.source.is_some() {
            control |= CONTROL_HAS_SOURCE;
        }
        if self.destination.is_some() {
            control |= CONTROL_HAS_DESTINATION;
        }
        if self.message_type.is_some() {
            control |= CONTROL_NETWORK_MESSAGE;
        }

        w.write_u8(NPDU_VERSION)?;
        w.write_u8(control)?;

        if let Some(dest) = self.destination {
            encode_addr(w, dest)?;
        }
        if let Some(src) = self.source {
            encode_addr(w, src)?;
        }
        if self.destination.is_some() {
            w.write_u8(self.hop_count.unwrap_or(DEFAULT_HOP_COUNT))?;
        }
        if let Some(mt) = self.message_type {
            w.write_u8(mt)?;
            if mt >= 0x80 {
                w.write_be_u16(self.vendor_id.unwrap_or(0))?;
            }
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let version = r.read_u8()?;
        if version != NPDU_VERSION {
            return Err(DecodeError::InvalidValue);
        }

        let control = r.read_u8()?;
        let has_dest = (control & CONTROL_HAS_DESTINATION) != 0;
        let has_src = (control & CONTROL_HAS_SOURCE) != 0;
        let is_network_msg = (control & CONTROL_NETWORK_MESSAGE) != 0;

        let destination = if has_dest {
            Some(decode_addr(r)?)
        } else {
            None
        };
        let source = if has_src { Some(decode_addr(r)?) } else { None };
        let hop_count = if has_dest { Some(r.read_u8()?) } else { None };

        let (message_type, vendor_id) = if is_network_msg {
            let mt = r.read_u8()?;
            let vid = if mt >= 0x80 {
                Some(r.read_be_u16()?)
            } else {
                None
            };
            (Some(mt), vid)
        } else {
            (None, None)
        };

        Ok(Npci {
            destination,
            source,
            hop_count,
            expecting_reply: (control & CONTROL_EXPECTING_REPLY) != 0,
            priority: NetworkPriority::from_bits(control),
            message_type,
            vendor_id,
        })
    }
}

impl Default for Npci {
    fn default() -> Self {
        Npci::new()
    }
}

fn encode_addr(w: &mut Writer<'_>, addr: NpduAddress) -> Result<(), EncodeError> {
    w.write_be_u16(addr.network)?;
    w.write_u8(addr.mac.len() as u8)?;
    w.write_all(addr.mac.as_bytes())
}

fn decode_addr(r: &mut Reader<'_>) -> Result<NpduAddress, DecodeError> {
    let network = r.read_be_u16()?;
    let mac_len = r.read_u8()? as usize;
    if mac_len > Mac::MAX_LEN {
        return Err(DecodeError::InvalidLength);
    }
    let bytes = r.read_exact(mac_len)?;
    let mac = Mac::new(bytes).ok_or(DecodeError::InvalidLength)?;
    Ok(NpduAddress { network, mac })
}

/// The standard network-layer message types this stack interprets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NetworkMessageType {
    WhoIsRouterToNetwork,
    IAmRouterToNetwork,
    ICouldBeRouterToNetwork,
    RejectMessageToNetwork,
    RouterBusyToNetwork,
    RouterAvailableToNetwork,
    InitializeRoutingTable,
    InitializeRoutingTableAck,
    EstablishConnectionToNetwork,
    DisconnectConnectionToNetwork,
    WhatIsNetworkNumber,
    NetworkNumberIs,
}

impl NetworkMessageType {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::WhoIsRouterToNetwork),
            0x01 => Some(Self::IAmRouterToNetwork),
            0x02 => Some(Self::ICouldBeRouterToNetwork),
            0x03 => Some(Self::RejectMessageToNetwork),
            0x04 => Some(Self::RouterBusyToNetwork),
            0x05 => Some(Self::RouterAvailableToNetwork),
            0x06 => Some(Self::InitializeRoutingTable),
            0x07 => Some(Self::InitializeRoutingTableAck),
            0x08 => Some(Self::EstablishConnectionToNetwork),
            0x09 => Some(Self::DisconnectConnectionToNetwork),
            0x12 => Some(Self::WhatIsNetworkNumber),
            0x13 => Some(Self::NetworkNumberIs),
            _ => None,
        }
    }

    pub const fn to_u8(self) -> u8 {
        match self {
            Self::WhoIsRouterToNetwork => 0x00,
            Self::IAmRouterToNetwork => 0x01,
            Self::ICouldBeRouterToNetwork => 0x02,
            Self::RejectMessageToNetwork => 0x03,
            Self::RouterBusyToNetwork => 0x04,
            Self::RouterAvailableToNetwork => 0x05,
            Self::InitializeRoutingTable => 0x06,
            Self::InitializeRoutingTableAck => 0x07,
            Self::EstablishConnectionToNetwork => 0x08,
            Self::DisconnectConnectionToNetwork => 0x09,
            Self::WhatIsNetworkNumber => 0x12,
            Self::NetworkNumberIs => 0x13,
        }
    }
}

impl fmt::Display for NetworkMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WhoIsRouterToNetwork => "Who-Is-Router-To-Network",
            Self::IAmRouterToNetwork => "I-Am-Router-To-Network",
            Self::ICouldBeRouterToNetwork => "I-Could-Be-Router-To-Network",
            Self::RejectMessageToNetwork => "Reject-Message-To-Network",
            Self::RouterBusyToNetwork => "Router-Busy-To-Network",
            Self::RouterAvailableToNetwork => "Router-Available-To-Network",
            Self::InitializeRoutingTable => "Initialize-Routing-Table",
            Self::InitializeRoutingTableAck => "Initialize-Routing-Table-Ack",
            Self::EstablishConnectionToNetwork => "Establish-Connection-To-Network",
            Self::DisconnectConnectionToNetwork => "Disconnect-Connection-To-Network",
            Self::WhatIsNetworkNumber => "What-Is-Network-Number",
            Self::NetworkNumberIs => "Network-Number-Is",
        };
        f.write_str(name)
    }
}

/// Why a router refused to forward, from Reject-Message-To-Network.
///
/// Unassigned wire values survive as [`RejectReason::Reserved`] so a
/// reject can be relayed or logged without loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RejectReason {
    Other,
    NoRouteToNetwork,
    RouterBusy,
    UnknownMessageType,
    MessageTooLong,
    SecurityError,
    AddressingError,
    Reserved(u8),
}

impl RejectReason {
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Other,
            1 => Self::NoRouteToNetwork,
            2 => Self::RouterBusy,
            3 => Self::UnknownMessageType,
            4 => Self::MessageTooLong,
            5 => Self::SecurityError,
            6 => Self::AddressingError,
            other => Self::Reserved(other),
        }
    }

    pub const fn to_u8(self) -> u8 {
        match self {
            Self::Other => 0,
            Self::NoRouteToNetwork => 1,
            Self::RouterBusy => 2,
            Self::UnknownMessageType => 3,
            Self::MessageTooLong => 4,
            Self::SecurityError => 5,
            Self::AddressingError => 6,
            Self::Reserved(other) => other,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other => f.write_str("other"),
            Self::NoRouteToNetwork => f.write_str("no route to network"),
            Self::RouterBusy => f.write_str("router busy"),
            Self::UnknownMessageType => f.write_str("unrecognized network message type"),
            Self::MessageTooLong => f.write_str("message too long"),
            Self::SecurityError => f.write_str("security error"),
            Self::AddressingError => f.write_str("addressing error"),
            Self::Reserved(v) => write!(f, "reserved reason {v}"),
        }
    }
}

/// One row of a routing table, as carried by Initialize-Routing-Table.
#[cfg(feature = "alloc")]
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoutingTableEntry {
    pub network: u16,
    pub port_id: u8,
    pub port_info: Vec<u8>,
}

/// A decoded network-layer message payload.
///
/// Types this stack does not interpret land in [`NetworkMessage::Unknown`]
/// with the payload kept verbatim, so they can be relayed or rejected
/// without understanding them.
#[cfg(feature = "alloc")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMessage {
    /// `None` asks about every network.
    WhoIsRouterToNetwork { network: Option<u16> },
    IAmRouterToNetwork { networks: Vec<u16> },
    ICouldBeRouterToNetwork { network: u16, performance_index: u8 },
    RejectMessageToNetwork { reason: RejectReason, network: u16 },
    /// An empty list means the router itself is busy.
    RouterBusyToNetwork { networks: Vec<u16> },
    RouterAvailableToNetwork { networks: Vec<u16> },
    /// An empty entry list is a query for the current table.
    InitializeRoutingTable { entries: Vec<RoutingTableEntry> },
    InitializeRoutingTableAck { entries: Vec<RoutingTableEntry> },
    EstablishConnectionToNetwork { network: u16, termination_time: u8 },
    DisconnectConnectionToNetwork { network: u16 },
    WhatIsNetworkNumber,
    NetworkNumberIs { network: u16, configured: bool },
    Unknown { message_type: u8, data: Vec<u8> },
}

#[cfg(feature = "alloc")]
impl NetworkMessage {
    /// The value for [`Npci::message_type`] when sending this message.
    pub fn message_type(&self) -> u8 {
        match self {
            Self::WhoIsRouterToNetwork { .. } => NetworkMessageType::WhoIsRouterToNetwork.to_u8(),
            Self::IAmRouterToNetwork { .. } => NetworkMessageType::IAmRouterToNetwork.to_u8(),
            Self::ICouldBeRouterToNetwork { .. } => {
                NetworkMessageType::ICouldBeRouterToNetwork.to_u8()
            }
            Self::RejectMessageToNetwork { .. } => NetworkMessageType::RejectMessageToNetwork.to_u8(),
            Self::RouterBusyToNetwork { .. } => NetworkMessageType::RouterBusyToNetwork.to_u8(),
            Self::RouterAvailableToNetwork { .. } => {
                NetworkMessageType::RouterAvailableToNetwork.to_u8()
            }
            Self::InitializeRoutingTable { .. } => NetworkMessageType::InitializeRoutingTable.to_u8(),
            Self::InitializeRoutingTableAck { .. } => {
                NetworkMessageType::InitializeRoutingTableAck.to_u8()
            }
            Self::EstablishConnectionToNetwork { .. } => {
                NetworkMessageType::EstablishConnectionToNetwork.to_u8()
            }
            Self::DisconnectConnectionToNetwork { .. } => {
                NetworkMessageType::DisconnectConnectionToNetwork.to_u8()
            }
            Self::WhatIsNetworkNumber => NetworkMessageType::WhatIsNetworkNumber.to_u8(),
            Self::NetworkNumberIs { .. } => NetworkMessageType::NetworkNumberIs.to_u8(),
            Self::Unknown { message_type, .. } => *message_type,
        }
    }

    /// Encodes the payload that follows the NPCI.
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        match self {
            Self::WhoIsRouterToNetwork { network } => {
                if let Some(net) = network {
                    w.write_be_u16(*net)?;
                }
                Ok(())
            }
            Self::IAmRouterToNetwork { networks }
            | Self::RouterBusyToNetwork { networks }
            | Self::RouterAvailableToNetwork { networks } => {
                for net in networks {
                    w.write_be_u16(*net)?;
                }
                Ok(())
            }
            Self::ICouldBeRouterToNetwork {
                network,
                performance_index,
            } => {
                w.write_be_u16(*network)?;
                w.write_u8(*performance_index)
            }
            Self::RejectMessageToNetwork { reason, network } => {
                w.write_u8(reason.to_u8())?;
                w.write_be_u16(*network)
            }
            Self::InitializeRoutingTable { entries }
            | Self::InitializeRoutingTableAck { entries } => encode_routing_table(w, entries),
            Self::EstablishConnectionToNetwork {
                network,
                termination_time,
            } => {
                w.write_be_u16(*network)?;
                w.write_u8(*termination_time)
            }
            Self::DisconnectConnectionToNetwork { network } => w.write_be_u16(*network),
            Self::WhatIsNetworkNumber => Ok(()),
            Self::NetworkNumberIs {
                network,
                configured,
            } => {
                w.write_be_u16(*network)?;
                w.write_u8(u8::from(*configured))
            }
            Self::Unknown { data, .. } => w.write_all(data),
        }
    }

    /// Decodes the payload for `message_type`, consuming the rest of the
    /// reader.
    pub fn decode(message_type: u8, r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let Some(kind) = NetworkMessageType::from_u8(message_type) else {
            return Ok(Self::Unknown {
                message_type,
                data: r.read_remaining().to_vec(),
            });
        };
        match kind {
            NetworkMessageType::WhoIsRouterToNetwork => {
                let network = if r.is_empty() {
                    None
                } else {
                    Some(r.read_be_u16()?)
                };
                Ok(Self::WhoIsRouterToNetwork { network })
            }
            NetworkMessageType::IAmRouterToNetwork => Ok(Self::IAmRouterToNetwork {
                networks: decode_network_list(r)?,
            }),
            NetworkMessageType::ICouldBeRouterToNetwork => Ok(Self::ICouldBeRouterToNetwork {
                network: r.read_be_u16()?,
                performance_index: r.read_u8()?,
            }),
            NetworkMessageType::RejectMessageToNetwork => {
                let reason = RejectReason::from_u8(r.read_u8()?);
                Ok(Self::RejectMessageToNetwork {
                    reason,
                    network: r.read_be_u16()?,
                })
            }
            NetworkMessageType::RouterBusyToNetwork => Ok(Self::RouterBusyToNetwork {
                networks: decode_network_list(r)?,
            }),
            NetworkMessageType::RouterAvailableToNetwork => Ok(Self::RouterAvailableToNetwork {
                networks: decode_network_list(r)?,
            }),
            NetworkMessageType::InitializeRoutingTable => Ok(Self::InitializeRoutingTable {
                entries: decode_routing_table(r)?,
            }),
            NetworkMessageType::InitializeRoutingTableAck => Ok(Self::InitializeRoutingTableAck {
                entries: decode_routing_table(r)?,
            }),
            NetworkMessageType::EstablishConnectionToNetwork => {
                Ok(Self::EstablishConnectionToNetwork {
                    network: r.read_be_u16()?,
                    termination_time: r.read_u8()?,
                })
            }
            NetworkMessageType::DisconnectConnectionToNetwork => {
                Ok(Self::DisconnectConnectionToNetwork {
                    network: r.read_be_u16()?,
                })
            }
            NetworkMessageType::WhatIsNetworkNumber => Ok(Self::WhatIsNetworkNumber),
            NetworkMessageType::NetworkNumberIs => {
                let network = r.read_be_u16()?;
                let configured = (r.read_u8()? & 0x01) != 0;
                Ok(Self::NetworkNumberIs {
                    network,
                    configured,
                })
            }
        }
    }
}

#[cfg(feature = "alloc")]
fn decode_network_list(r: &mut Reader<'_>) -> Result<Vec<u16>, DecodeError> {
    let mut networks = Vec::with_capacity(r.remaining() / 2);
    while !r.is_empty() {
        networks.push(r.read_be_u16()?);
    }
    Ok(networks)
}

#[cfg(feature = "alloc")]
fn encode_routing_table(w: &mut Writer<'_>, entries: &[RoutingTableEntry]) -> Result<(), EncodeError> {
    let count = u8::try_from(entries.len()).map_err(|_| EncodeError::ValueOutOfRange)?;
    w.write_u8(count)?;
    for entry in entries {
        w.write_be_u16(entry.network)?;
        w.write_u8(entry.port_id)?;
        let info_len = u8::try_from(entry.port_info.len()).map_err(|_| EncodeError::ValueOutOfRange)?;
        w.write_u8(info_len)?;
        w.write_all(&entry.port_info)?;
    }
    Ok(())
}

#[cfg(feature = "alloc")]
fn decode_routing_table(r: &mut Reader<'_>) -> Result<Vec<RoutingTableEntry>, DecodeError> {
    let count = r.read_u8()?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let network = r.read_be_u16()?;
        let port_id = r.read_u8()?;
        let info_len = r.read_u8()? as usize;
        let port_info = r.read_exact(info_len)?.to_vec();
        entries.push(RoutingTableEntry {
            network,
            port_id,
            port_info,
        });
    }
    Ok(entries)
}

#[cfg(test)]
#[cfg(feature = "alloc")]
mod tests {
    use super::{
        NetworkMessage, NetworkPriority, Npci, NpduAddress, RejectReason, RoutingTableEntry,
        DEFAULT_HOP_COUNT,
    };
    use crate::address::{Address, Mac};
    use crate::encoding::{Reader, Writer};
    use crate::DecodeError;
    use alloc::vec;
    use alloc::vec::Vec;

    fn encode_npci(npci: &Npci) -> Vec<u8> {
        let mut buf = [0u8; 64];
        let mut w = Writer::new(&mut buf);
        npci.encode(&mut w).unwrap();
        w.as_written().to_vec()
    }

    fn message_round_trip(msg: &NetworkMessage) -> NetworkMessage {
        let mut buf = [0u8; 512];
        let mut w = Writer::new(&mut buf);
        msg.encode(&mut w).unwrap();
        let mut r = Reader::new(w.as_written());
        let back = NetworkMessage::decode(msg.message_type(), &mut r).unwrap();
        assert!(r.is_empty(), "decoder left {} bytes", r.remaining());
        back
    }

    #[test]
    fn npci_round_trip_with_destination() {
        let mut npci = Npci::new();
        npci.destination = Some(NpduAddress {
            network: 1,
            mac: Mac::new(&[192, 168, 1, 2, 0xBA, 0xC0]).unwrap(),
        });
        npci.hop_count = Some(200);

        let bytes = encode_npci(&npci);
        let mut r = Reader::new(&bytes);
        let back = Npci::decode(&mut r).unwrap();
        assert_eq!(back, npci);
        assert!(r.is_empty());
    }

    #[test]
    fn control_byte_carries_flags_and_priority() {
        let mut npci = Npci::new();
        npci.expecting_reply = true;
        npci.priority = NetworkPriority::LifeSafety;
        assert_eq!(encode_npci(&npci)[1], 0x07);

        npci.destination = Some(NpduAddress {
            network: 9,
            mac: Mac::empty(),
        });
        assert_eq!(encode_npci(&npci)[1], 0x27);
    }

    #[test]
    fn hop_count_defaults_when_destination_present() {
        let mut npci = Npci::new();
        npci.destination = Some(NpduAddress {
            network: 7,
            mac: Mac::empty(),
        });
        let bytes = encode_npci(&npci);
        // version, control, DNET, DLEN, hop
        assert_eq!(bytes, [0x01, 0x20, 0x00, 0x07, 0x00, DEFAULT_HOP_COUNT]);
    }

    #[test]
    fn broadcast_destination_wire_forms() {
        let global = NpduAddress::from_destination(&Address::global_broadcast()).unwrap();
        assert_eq!(global.network, 0xFFFF);
        assert!(global.mac.is_empty());
        assert_eq!(global.to_destination(), Address::global_broadcast());

        let remote = NpduAddress::from_destination(&Address::remote_broadcast(12)).unwrap();
        assert!(remote.mac.is_empty());
        assert_eq!(remote.to_destination(), Address::remote_broadcast(12));

        assert_eq!(
            NpduAddress::from_destination(&Address::local_broadcast()),
            None
        );
    }

    #[test]
    fn reserved_control_bits_are_ignored() {
        let mut r = Reader::new(&[0x01, 0x50]);
        let npci = Npci::decode(&mut r).unwrap();
        assert!(!npci.is_network_message());
        assert_eq!(npci.destination, None);
        assert_eq!(npci.source, None);
    }

    #[test]
    fn rejects_wrong_version() {
        let mut r = Reader::new(&[0x02, 0x00]);
        assert_eq!(Npci::decode(&mut r), Err(DecodeError::InvalidValue));
    }

    #[test]
    fn rejects_oversized_mac() {
        // DNET 1, DLEN 19
        let mut r = Reader::new(&[0x01, 0x20, 0x00, 0x01, 0x13]);
        assert_eq!(Npci::decode(&mut r), Err(DecodeError::InvalidLength));
    }

    #[test]
    fn vendor_message_types_carry_vendor_id() {
        let mut npci = Npci::new();
        npci.message_type = Some(0x80);
        npci.vendor_id = Some(260);

        let bytes = encode_npci(&npci);
        let mut r = Reader::new(&bytes);
        let back = Npci::decode(&mut r).unwrap();
        assert_eq!(back.message_type, Some(0x80));
        assert_eq!(back.vendor_id, Some(260));

        // Standard types never carry one.
        npci.message_type = Some(0x00);
        npci.vendor_id = None;
        let bytes = encode_npci(&npci);
        assert_eq!(bytes.len(), 3);
    }

    #[test]
    fn who_is_router_payload_forms() {
        let any = NetworkMessage::WhoIsRouterToNetwork { network: None };
        assert_eq!(message_round_trip(&any), any);

        let one = NetworkMessage::WhoIsRouterToNetwork { network: Some(443) };
        assert_eq!(message_round_trip(&one), one);
    }

    #[test]
    fn network_list_payloads_round_trip() {
        let msg = NetworkMessage::IAmRouterToNetwork {
            networks: vec![1, 2, 443],
        };
        assert_eq!(message_round_trip(&msg), msg);

        let empty = NetworkMessage::RouterBusyToNetwork { networks: vec![] };
        assert_eq!(message_round_trip(&empty), empty);
    }

    #[test]
    fn odd_length_network_list_is_an_error() {
        let mut r = Reader::new(&[0x01, 0xBB, 0x07]);
        assert_eq!(
            NetworkMessage::decode(0x01, &mut r),
            Err(DecodeError::UnexpectedEof)
        );
    }

    #[test]
    fn reject_reason_survives_round_trip() {
        let msg = NetworkMessage::RejectMessageToNetwork {
            reason: RejectReason::NoRouteToNetwork,
            network: 99,
        };
        assert_eq!(message_round_trip(&msg), msg);

        let reserved = NetworkMessage::RejectMessageToNetwork {
            reason: RejectReason::Reserved(0x42),
            network: 7,
        };
        assert_eq!(message_round_trip(&reserved), reserved);
    }

    #[test]
    fn routing_table_round_trip() {
        let msg = NetworkMessage::InitializeRoutingTableAck {
            entries: vec![
                RoutingTableEntry {
                    network: 2,
                    port_id: 1,
                    port_info: vec![],
                },
                RoutingTableEntry {
                    network: 443,
                    port_id: 2,
                    port_info: vec![192, 168, 1, 2, 0xBA, 0xC0],
                },
            ],
        };
        assert_eq!(message_round_trip(&msg), msg);

        let query = NetworkMessage::InitializeRoutingTable { entries: vec![] };
        assert_eq!(message_round_trip(&query), query);
    }

    #[test]
    fn network_number_is_flag() {
        let configured = NetworkMessage::NetworkNumberIs {
            network: 88,
            configured: true,
        };
        assert_eq!(message_round_trip(&configured), configured);

        let mut r = Reader::new(&[0x00, 0x58, 0x00]);
        assert_eq!(
            NetworkMessage::decode(0x13, &mut r).unwrap(),
            NetworkMessage::NetworkNumberIs {
                network: 88,
                configured: false,
            }
        );
    }

    #[test]
    fn unrecognized_types_pass_through_verbatim() {
        let mut r = Reader::new(&[0xDE, 0xAD, 0xBE]);
        let msg = NetworkMessage::decode(0x0A, &mut r).unwrap();
        assert_eq!(
            msg,
            NetworkMessage::Unknown {
                message_type: 0x0A,
                data: vec![0xDE, 0xAD, 0xBE],
            }
        );
        assert_eq!(message_round_trip(&msg), msg);
    }
}
