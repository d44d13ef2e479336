//! BACnet network layer: NPDU routing over attached link adapters.
//!
//! [`NetworkLayer`] multiplexes application traffic across one or more
//! link-layer adapters, learns which routers reach which remote networks
//! from I-Am-Router-To-Network announcements, runs Who-Is-Router-To-Network
//! discovery when no path is cached, and relays frames between adapters
//! when it sits between networks itself. The [`cache`] module holds the
//! router and device info caches; everything network-visible lives in
//! [`engine`].

pub mod cache;
pub mod engine;
pub mod error;

pub use cache::{DeviceInfo, DeviceInfoCache, RouterInfo, RouterInfoCache, RouterStatus, Segmentation};
pub use engine::{NetworkBuilder, NetworkLayer};
pub use error::NetworkError;
