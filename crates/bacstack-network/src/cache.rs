//! Router and device info caches.
//!
//! Both are plain maps with explicit invalidation; nothing here talks to
//! the network. The routing engine owns a [`RouterInfoCache`]; a
//! [`DeviceInfoCache`] is meant to be owned by whatever application layer
//! sits on top and learns device capabilities from I-Am traffic.

use std::collections::HashMap;

use bacstack_core::{AddressKind, Mac};
use tokio::time::{Duration, Instant};

/// How a known router is currently answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouterStatus {
    #[default]
    Reachable,
    /// The router sent Router-Busy; traffic still flows but should back
    /// off.
    Busy,
    /// The router rejected traffic for this network.
    Unreachable,
}

/// One learned path: reach `network` through `address` on `adapter`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterInfo {
    /// Source network the path applies to, `None` for locally originated
    /// traffic.
    pub snet: Option<u16>,
    pub network: u16,
    pub adapter: usize,
    pub address: Mac,
    pub status: RouterStatus,
    pub refreshed: Instant,
}

impl RouterInfo {
    pub fn new(snet: Option<u16>, network: u16, adapter: usize, address: Mac) -> Self {
        RouterInfo {
            snet,
            network,
            adapter,
            address,
            status: RouterStatus::Reachable,
            refreshed: Instant::now(),
        }
    }
}

/// Paths to remote networks, keyed by `(source network, destination
/// network)`.
///
/// A destination network has at most one owner per source network: putting
/// an entry for a network some other router previously claimed replaces
/// the old path.
#[derive(Debug, Default)]
pub struct RouterInfoCache {
    paths: HashMap<(Option<u16>, u16), RouterInfo>,
}

impl RouterInfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, snet: Option<u16>, dnet: u16) -> Option<&RouterInfo> {
        self.paths.get(&(snet, dnet))
    }

    pub fn put(&mut self, info: RouterInfo) {
        self.paths.insert((info.snet, info.network), info);
    }

    /// Updates one path's status, refreshing its timestamp. Returns false
    /// when the path is unknown.
    pub fn set_status(&mut self, snet: Option<u16>, dnet: u16, status: RouterStatus) -> bool {
        match self.paths.get_mut(&(snet, dnet)) {
            Some(info) => {
                info.status = status;
                info.refreshed = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Updates every path that goes through the given router, for
    /// Router-Busy and Router-Available messages with an empty network
    /// list. Returns the number of paths touched.
    pub fn set_router_status(
        &mut self,
        adapter: usize,
        address: Mac,
        status: RouterStatus,
    ) -> usize {
        let now = Instant::now();
        let mut touched = 0;
        for info in self.paths.values_mut() {
            if info.adapter == adapter && info.address == address {
                info.status = status;
                info.refreshed = now;
                touched += 1;
            }
        }
        touched
    }

    pub fn invalidate(&mut self, snet: Option<u16>, dnet: u16) -> Option<RouterInfo> {
        self.paths.remove(&(snet, dnet))
    }

    /// Drops every path through the given router.
    pub fn remove_router(&mut self, adapter: usize, address: Mac) -> usize {
        let before = self.paths.len();
        self.paths
            .retain(|_, info| !(info.adapter == adapter && info.address == address));
        before - self.paths.len()
    }

    pub fn sweep_expired(&mut self, max_age: Duration) {
        let now = Instant::now();
        self.paths
            .retain(|_, info| now.duration_since(info.refreshed) <= max_age);
    }

    pub fn entries(&self) -> impl Iterator<Item = &RouterInfo> {
        self.paths.values()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Segmentation support, as announced in I-Am.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segmentation {
    Both,
    Transmit,
    Receive,
    NoSegmentation,
}

impl Segmentation {
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Segmentation::Both,
            1 => Segmentation::Transmit,
            2 => Segmentation::Receive,
            3 => Segmentation::NoSegmentation,
            _ => return None,
        })
    }

    pub const fn to_u8(self) -> u8 {
        match self {
            Segmentation::Both => 0,
            Segmentation::Transmit => 1,
            Segmentation::Receive => 2,
            Segmentation::NoSegmentation => 3,
        }
    }
}

/// What a peer device announced about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_id: u32,
    pub max_apdu_len: u16,
    pub segmentation: Segmentation,
    pub vendor_id: u16,
    /// `None` pins the entry until an explicit invalidation.
    pub expires_at: Option<Instant>,
}

/// Device capabilities keyed by address class.
#[derive(Debug, Default)]
pub struct DeviceInfoCache {
    devices: HashMap<AddressKind, DeviceInfo>,
}

impl DeviceInfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expired entries read as absent even before a sweep removes them.
    pub fn get(&self, address: &AddressKind) -> Option<&DeviceInfo> {
        self.devices
            .get(address)
            .filter(|info| info.expires_at.map_or(true, |at| at > Instant::now()))
    }

    pub fn put(&mut self, address: AddressKind, info: DeviceInfo) {
        self.devices.insert(address, info);
    }

    pub fn invalidate(&mut self, address: &AddressKind) -> Option<DeviceInfo> {
        self.devices.remove(address)
    }

    pub fn sweep_expired(&mut self) {
        let now = Instant::now();
        self.devices
            .retain(|_, info| info.expires_at.map_or(true, |at| at > now));
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{DeviceInfo, DeviceInfoCache, RouterInfo, RouterInfoCache, RouterStatus, Segmentation};
    use bacstack_core::{AddressKind, Mac};
    use tokio::time::{advance, Duration, Instant};

    fn mac(octet: u8) -> Mac {
        Mac::from_octet(octet)
    }

    #[test]
    fn new_router_replaces_the_old_owner() {
        let mut cache = RouterInfoCache::new();
        cache.put(RouterInfo::new(None, 30, 0, mac(1)));
        cache.put(RouterInfo::new(None, 30, 0, mac(2)));

        let info = cache.get(None, 30).unwrap();
        assert_eq!(info.address, mac(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn paths_are_scoped_by_source_network() {
        let mut cache = RouterInfoCache::new();
        cache.put(RouterInfo::new(None, 30, 0, mac(1)));
        cache.put(RouterInfo::new(Some(5), 30, 1, mac(2)));

        assert_eq!(cache.get(None, 30).unwrap().address, mac(1));
        assert_eq!(cache.get(Some(5), 30).unwrap().address, mac(2));
        assert!(cache.get(Some(6), 30).is_none());
    }

    #[test]
    fn status_updates_apply_per_path_and_per_router() {
        let mut cache = RouterInfoCache::new();
        cache.put(RouterInfo::new(None, 30, 0, mac(1)));
        cache.put(RouterInfo::new(None, 31, 0, mac(1)));
        cache.put(RouterInfo::new(None, 40, 0, mac(2)));

        assert!(cache.set_status(None, 30, RouterStatus::Unreachable));
        assert!(!cache.set_status(None, 99, RouterStatus::Unreachable));
        assert_eq!(
            cache.get(None, 30).unwrap().status,
            RouterStatus::Unreachable
        );

        assert_eq!(
            cache.set_router_status(0, mac(1), RouterStatus::Busy),
            2
        );
        assert_eq!(cache.get(None, 31).unwrap().status, RouterStatus::Busy);
        assert_eq!(cache.get(None, 40).unwrap().status, RouterStatus::Reachable);
    }

    #[test]
    fn remove_router_drops_all_its_paths() {
        let mut cache = RouterInfoCache::new();
        cache.put(RouterInfo::new(None, 30, 0, mac(1)));
        cache.put(RouterInfo::new(None, 31, 0, mac(1)));
        cache.put(RouterInfo::new(None, 40, 1, mac(1)));

        assert_eq!(cache.remove_router(0, mac(1)), 2);
        assert!(cache.get(None, 30).is_none());
        assert_eq!(cache.get(None, 40).unwrap().adapter, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_paths_are_swept() {
        let mut cache = RouterInfoCache::new();
        cache.put(RouterInfo::new(None, 30, 0, mac(1)));
        advance(Duration::from_secs(120)).await;
        cache.put(RouterInfo::new(None, 31, 0, mac(1)));

        cache.sweep_expired(Duration::from_secs(60));
        assert!(cache.get(None, 30).is_none());
        assert!(cache.get(None, 31).is_some());
    }

    fn device(expires_at: Option<Instant>) -> DeviceInfo {
        DeviceInfo {
            device_id: 1234,
            max_apdu_len: 1476,
            segmentation: Segmentation::NoSegmentation,
            vendor_id: 999,
            expires_at,
        }
    }

    #[test]
    fn device_entries_persist_until_invalidated() {
        let mut cache = DeviceInfoCache::new();
        let key = AddressKind::LocalStation(mac(7));
        cache.put(key, device(None));

        assert_eq!(cache.get(&key).unwrap().device_id, 1234);
        assert!(cache.invalidate(&key).is_some());
        assert!(cache.get(&key).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn device_entries_honor_their_ttl() {
        let mut cache = DeviceInfoCache::new();
        let key = AddressKind::LocalStation(mac(7));
        cache.put(key, device(Some(Instant::now() + Duration::from_secs(30))));

        advance(Duration::from_secs(29)).await;
        assert!(cache.get(&key).is_some());

        advance(Duration::from_secs(2)).await;
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.len(), 1);
        cache.sweep_expired();
        assert!(cache.is_empty());
    }

    #[test]
    fn segmentation_codes_round_trip() {
        for value in 0..4 {
            let seg = Segmentation::from_u8(value).unwrap();
            assert_eq!(seg.to_u8(), value);
        }
        assert!(Segmentation::from_u8(4).is_none());
    }
}
