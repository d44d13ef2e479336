//! Link layers and the composition plumbing that stacks them.
//!
//! The [`link`] module defines how layers connect: a layer accepts
//! downstream traffic through [`link::Sink::indication`] and hands upstream
//! traffic to the [`link::Upstream`] sender it was given at construction.
//! The [`bip`] module implements the BACnet/IP (Annex J) link on top of
//! UDP, including foreign-device registration and BBMD broadcast
//! management.

#![allow(async_fn_in_trait)]

pub mod bip;
pub mod link;

pub use bip::{
    BipLink, BroadcastDistributionEntry, ForeignDeviceTableEntry, RegistrationStatus,
};
pub use link::{bind, Confirmations, LinkError, Sink, Source, Upstream};
