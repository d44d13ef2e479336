//! BACnet Virtual Link Control wire codecs.
//!
//! Every BACnet/IP datagram starts with the 4-byte BVLC header: the type
//! octet 0x81, a function octet, and the total frame length. The payload
//! layout depends on the function; [`BvlcMessage`] covers the full Annex J
//! set. Frames whose length field disagrees with the datagram size are
//! rejected.

use std::net::{Ipv4Addr, SocketAddrV4};

use bacstack_core::encoding::{Reader, Writer};
use bacstack_core::{DecodeError, EncodeError};

use crate::bip::tables::{BroadcastDistributionEntry, ForeignDeviceTableEntry};

pub const BVLC_TYPE_BIP: u8 = 0x81;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BvlcFunction {
    Result,
    WriteBroadcastDistributionTable,
    ReadBroadcastDistributionTable,
    ReadBroadcastDistributionTableAck,
    ForwardedNpdu,
    RegisterForeignDevice,
    ReadForeignDeviceTable,
    ReadForeignDeviceTableAck,
    DeleteForeignDeviceTableEntry,
    DistributeBroadcastToNetwork,
    OriginalUnicastNpdu,
    OriginalBroadcastNpdu,
    Unknown(u8),
}

impl BvlcFunction {
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::Result,
            0x01 => Self::WriteBroadcastDistributionTable,
            0x02 => Self::ReadBroadcastDistributionTable,
            0x03 => Self::ReadBroadcastDistributionTableAck,
            0x04 => Self::ForwardedNpdu,
            0x05 => Self::RegisterForeignDevice,
            0x06 => Self::ReadForeignDeviceTable,
            0x07 => Self::ReadForeignDeviceTableAck,
            0x08 => Self::DeleteForeignDeviceTableEntry,
            0x09 => Self::DistributeBroadcastToNetwork,
            0x0A => Self::OriginalUnicastNpdu,
            0x0B => Self::OriginalBroadcastNpdu,
            v => Self::Unknown(v),
        }
    }

    pub const fn to_u8(self) -> u8 {
        match self {
            Self::Result => 0x00,
            Self::WriteBroadcastDistributionTable => 0x01,
            Self::ReadBroadcastDistributionTable => 0x02,
            Self::ReadBroadcastDistributionTableAck => 0x03,
            Self::ForwardedNpdu => 0x04,
            Self::RegisterForeignDevice => 0x05,
            Self::ReadForeignDeviceTable => 0x06,
            Self::ReadForeignDeviceTableAck => 0x07,
            Self::DeleteForeignDeviceTableEntry => 0x08,
            Self::DistributeBroadcastToNetwork => 0x09,
            Self::OriginalUnicastNpdu => 0x0A,
            Self::OriginalBroadcastNpdu => 0x0B,
            Self::Unknown(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BvlcHeader {
    pub function: BvlcFunction,
    pub length: u16,
}

impl BvlcHeader {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        w.write_u8(BVLC_TYPE_BIP)?;
        w.write_u8(self.function.to_u8())?;
        w.write_be_u16(self.length)
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        if r.read_u8()? != BVLC_TYPE_BIP {
            return Err(DecodeError::InvalidValue);
        }
        let function = BvlcFunction::from_u8(r.read_u8()?);
        let length = r.read_be_u16()?;
        if length < 4 {
            return Err(DecodeError::InvalidLength);
        }
        Ok(Self { function, length })
    }
}

/// A complete BVLC frame, header plus decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BvlcMessage {
    /// 0x0000 is success; anything else is the NAK for a specific function.
    Result { code: u16 },
    WriteBroadcastDistributionTable {
        entries: Vec<BroadcastDistributionEntry>,
    },
    ReadBroadcastDistributionTable,
    ReadBroadcastDistributionTableAck {
        entries: Vec<BroadcastDistributionEntry>,
    },
    /// A broadcast relayed by a BBMD, stamped with the original sender.
    ForwardedNpdu {
        origin: SocketAddrV4,
        npdu: Vec<u8>,
    },
    RegisterForeignDevice { ttl_seconds: u16 },
    ReadForeignDeviceTable,
    ReadForeignDeviceTableAck {
        entries: Vec<ForeignDeviceTableEntry>,
    },
    DeleteForeignDeviceTableEntry { address: SocketAddrV4 },
    DistributeBroadcastToNetwork { npdu: Vec<u8> },
    OriginalUnicastNpdu { npdu: Vec<u8> },
    OriginalBroadcastNpdu { npdu: Vec<u8> },
}

impl BvlcMessage {
    pub fn function(&self) -> BvlcFunction {
        match self {
            Self::Result { .. } => BvlcFunction::Result,
            Self::WriteBroadcastDistributionTable { .. } => {
                BvlcFunction::WriteBroadcastDistributionTable
            }
            Self::ReadBroadcastDistributionTable => BvlcFunction::ReadBroadcastDistributionTable,
            Self::ReadBroadcastDistributionTableAck { .. } => {
                BvlcFunction::ReadBroadcastDistributionTableAck
            }
            Self::ForwardedNpdu { .. } => BvlcFunction::ForwardedNpdu,
            Self::RegisterForeignDevice { .. } => BvlcFunction::RegisterForeignDevice,
            Self::ReadForeignDeviceTable => BvlcFunction::ReadForeignDeviceTable,
            Self::ReadForeignDeviceTableAck { .. } => BvlcFunction::ReadForeignDeviceTableAck,
            Self::DeleteForeignDeviceTableEntry { .. } => {
                BvlcFunction::DeleteForeignDeviceTableEntry
            }
            Self::DistributeBroadcastToNetwork { .. } => {
                BvlcFunction::DistributeBroadcastToNetwork
            }
            Self::OriginalUnicastNpdu { .. } => BvlcFunction::OriginalUnicastNpdu,
            Self::OriginalBroadcastNpdu { .. } => BvlcFunction::OriginalBroadcastNpdu,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Self::Result { .. } | Self::RegisterForeignDevice { .. } => 2,
            Self::WriteBroadcastDistributionTable { entries }
            | Self::ReadBroadcastDistributionTableAck { entries } => entries.len() * 10,
            Self::ReadBroadcastDistributionTable | Self::ReadForeignDeviceTable => 0,
            Self::ForwardedNpdu { npdu, .. } => 6 + npdu.len(),
            Self::ReadForeignDeviceTableAck { entries } => entries.len() * 10,
            Self::DeleteForeignDeviceTableEntry { .. } => 6,
            Self::DistributeBroadcastToNetwork { npdu }
            | Self::OriginalUnicastNpdu { npdu }
            | Self::OriginalBroadcastNpdu { npdu } => npdu.len(),
        }
    }

    /// Encodes the whole frame, header included.
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        let total = 4 + self.payload_len();
        if total > usize::from(u16::MAX) {
            return Err(EncodeError::InvalidLength);
        }
        BvlcHeader {
            function: self.function(),
            length: total as u16,
        }
        .encode(w)?;

        match self {
            Self::Result { code } => w.write_be_u16(*code),
            Self::WriteBroadcastDistributionTable { entries }
            | Self::ReadBroadcastDistributionTableAck { entries } => {
                for entry in entries {
                    encode_socket_addr(w, entry.address)?;
                    w.write_all(&entry.mask.octets())?;
                }
                Ok(())
            }
            Self::ReadBroadcastDistributionTable | Self::ReadForeignDeviceTable => Ok(()),
            Self::ForwardedNpdu { origin, npdu } => {
                encode_socket_addr(w, *origin)?;
                w.write_all(npdu)
            }
            Self::RegisterForeignDevice { ttl_seconds } => w.write_be_u16(*ttl_seconds),
            Self::ReadForeignDeviceTableAck { entries } => {
                for entry in entries {
                    encode_socket_addr(w, entry.address)?;
                    w.write_be_u16(entry.ttl_seconds)?;
                    w.write_be_u16(entry.remaining_seconds)?;
                }
                Ok(())
            }
            Self::DeleteForeignDeviceTableEntry { address } => encode_socket_addr(w, *address),
            Self::DistributeBroadcastToNetwork { npdu }
            | Self::OriginalUnicastNpdu { npdu }
            | Self::OriginalBroadcastNpdu { npdu } => w.write_all(npdu),
        }
    }

    /// Decodes a whole datagram. The header length must match the datagram
    /// size exactly. Unknown functions decode to
    /// [`DecodeError::Unsupported`].
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(frame);
        let header = BvlcHeader::decode(&mut r)?;
        if usize::from(header.length) != frame.len() {
            return Err(DecodeError::InvalidLength);
        }

        match header.function {
            BvlcFunction::Result => {
                let code = r.read_be_u16()?;
                expect_empty(&r)?;
                Ok(Self::Result { code })
            }
            BvlcFunction::WriteBroadcastDistributionTable => {
                Ok(Self::WriteBroadcastDistributionTable {
                    entries: decode_bdt_entries(&mut r)?,
                })
            }
            BvlcFunction::ReadBroadcastDistributionTable => {
                expect_empty(&r)?;
                Ok(Self::ReadBroadcastDistributionTable)
            }
            BvlcFunction::ReadBroadcastDistributionTableAck => {
                Ok(Self::ReadBroadcastDistributionTableAck {
                    entries: decode_bdt_entries(&mut r)?,
                })
            }
            BvlcFunction::ForwardedNpdu => {
                let origin = decode_socket_addr(&mut r)?;
                Ok(Self::ForwardedNpdu {
                    origin,
                    npdu: r.read_remaining().to_vec(),
                })
            }
            BvlcFunction::RegisterForeignDevice => {
                let ttl_seconds = r.read_be_u16()?;
                expect_empty(&r)?;
                Ok(Self::RegisterForeignDevice { ttl_seconds })
            }
            BvlcFunction::ReadForeignDeviceTable => {
                expect_empty(&r)?;
                Ok(Self::ReadForeignDeviceTable)
            }
            BvlcFunction::ReadForeignDeviceTableAck => Ok(Self::ReadForeignDeviceTableAck {
                entries: decode_fdt_entries(&mut r)?,
            }),
            BvlcFunction::DeleteForeignDeviceTableEntry => {
                let address = decode_socket_addr(&mut r)?;
                expect_empty(&r)?;
                Ok(Self::DeleteForeignDeviceTableEntry { address })
            }
            BvlcFunction::DistributeBroadcastToNetwork => {
                Ok(Self::DistributeBroadcastToNetwork {
                    npdu: r.read_remaining().to_vec(),
                })
            }
            BvlcFunction::OriginalUnicastNpdu => Ok(Self::OriginalUnicastNpdu {
                npdu: r.read_remaining().to_vec(),
            }),
            BvlcFunction::OriginalBroadcastNpdu => Ok(Self::OriginalBroadcastNpdu {
                npdu: r.read_remaining().to_vec(),
            }),
            BvlcFunction::Unknown(_) => Err(DecodeError::Unsupported),
        }
    }
}

fn expect_empty(r: &Reader<'_>) -> Result<(), DecodeError> {
    if r.is_empty() {
        Ok(())
    } else {
        Err(DecodeError::InvalidLength)
    }
}

fn encode_socket_addr(w: &mut Writer<'_>, addr: SocketAddrV4) -> Result<(), EncodeError> {
    w.write_all(&addr.ip().octets())?;
    w.write_be_u16(addr.port())
}

fn decode_socket_addr(r: &mut Reader<'_>) -> Result<SocketAddrV4, DecodeError> {
    let octets = r.read_exact(4)?;
    let ip = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
    let port = r.read_be_u16()?;
    Ok(SocketAddrV4::new(ip, port))
}

fn decode_bdt_entries(r: &mut Reader<'_>) -> Result<Vec<BroadcastDistributionEntry>, DecodeError> {
    if r.remaining() % 10 != 0 {
        return Err(DecodeError::InvalidLength);
    }
    let mut entries = Vec::with_capacity(r.remaining() / 10);
    while !r.is_empty() {
        let address = decode_socket_addr(r)?;
        let octets = r.read_exact(4)?;
        entries.push(BroadcastDistributionEntry {
            address,
            mask: Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]),
        });
    }
    Ok(entries)
}

fn decode_fdt_entries(r: &mut Reader<'_>) -> Result<Vec<ForeignDeviceTableEntry>, DecodeError> {
    if r.remaining() % 10 != 0 {
        return Err(DecodeError::InvalidLength);
    }
    let mut entries = Vec::with_capacity(r.remaining() / 10);
    while !r.is_empty() {
        let address = decode_socket_addr(r)?;
        entries.push(ForeignDeviceTableEntry {
            address,
            ttl_seconds: r.read_be_u16()?,
            remaining_seconds: r.read_be_u16()?,
        });
    }
    Ok(entries)
}
