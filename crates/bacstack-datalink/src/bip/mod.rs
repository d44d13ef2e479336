//! BACnet/IP (Annex J) link layer over UDP.
//!
//! [`bvlc`] holds the BACnet Virtual Link Control wire codecs, [`tables`]
//! the BBMD broadcast distribution and foreign device tables, and [`link`]
//! the running [`BipLink`] with its reader tasks.

pub mod bvlc;
pub mod link;
pub mod tables;

pub use link::{BipLink, RegistrationStatus};
pub use tables::{BroadcastDistributionEntry, ForeignDeviceTableEntry};
