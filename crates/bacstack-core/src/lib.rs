//! BACnet network-layer protocol types in pure Rust.
//!
//! `bacstack-core` provides zero-copy, `no_std`-compatible encoding and
//! decoding of the BACnet internetwork layer: the five-class address model,
//! the addressed PDU value type, the NPDU (NPCI) header, and the standard
//! network-layer message payloads. It is the foundation of the bacstack crate
//! family and can be used standalone in embedded or constrained environments.
//!
//! # Feature flags
//!
//! - **`std`** (default) — enables `std::error::Error` implementations.
//! - **`alloc`** (default) — enables types that allocate (PDUs, network
//!   message payloads with network lists).
//! - **`serde`** — derives `Serialize`/`Deserialize` on core types.
//! - **`defmt`** — derives `defmt::Format` for embedded logging.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

/// The five-class BACnet address model: parsing, formatting, matching.
pub mod address;
/// Zero-copy byte reader and writer used by every codec in the family.
pub mod encoding;
/// Error types for encoding and decoding operations.
pub mod error;
/// NPDU (Network Protocol Data Unit) header and network-message codecs.
pub mod npdu;
/// The addressed protocol data unit passed between layers.
#[cfg(feature = "alloc")]
pub mod pdu;

pub use address::{Address, AddressKind, AddressParseError, Mac, BACNET_IP_DEFAULT_PORT};
pub use error::{DecodeError, EncodeError};
#[cfg(feature = "alloc")]
pub use pdu::Pdu;
