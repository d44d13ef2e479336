//! BBMD broadcast distribution and foreign device tables.

use std::net::{Ipv4Addr, SocketAddrV4};

use tokio::time::{Duration, Instant};

/// One row of a broadcast distribution table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BroadcastDistributionEntry {
    pub address: SocketAddrV4,
    /// Distribution mask for the peer's subnet. All ones means the peer
    /// BBMD rebroadcasts itself (two-hop distribution); anything shorter
    /// means we send the directed broadcast straight onto its segment.
    pub mask: Ipv4Addr,
}

impl BroadcastDistributionEntry {
    /// A peer entry with an all-ones mask.
    pub fn peer(address: SocketAddrV4) -> Self {
        BroadcastDistributionEntry {
            address,
            mask: Ipv4Addr::BROADCAST,
        }
    }

    /// Where a Forwarded-NPDU for this entry is sent: the directed
    /// broadcast under the entry mask. With an all-ones mask this is the
    /// peer address itself.
    pub fn forward_target(&self) -> SocketAddrV4 {
        let ip = u32::from(*self.address.ip()) | !u32::from(self.mask);
        SocketAddrV4::new(Ipv4Addr::from(ip), self.address.port())
    }
}

/// One row of a foreign device table as reported by Read-FDT-Ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ForeignDeviceTableEntry {
    pub address: SocketAddrV4,
    pub ttl_seconds: u16,
    pub remaining_seconds: u16,
}

#[derive(Debug, Clone, Copy)]
struct FdtRow {
    address: SocketAddrV4,
    ttl_seconds: u16,
    expires_at: Instant,
}

/// The live foreign device table of a BBMD.
///
/// Rows expire exactly at their time-to-live. There is no sweep task;
/// callers sweep on access, which keeps expiry behavior independent of
/// traffic timing.
#[derive(Debug, Default)]
pub struct ForeignDeviceTable {
    rows: Vec<FdtRow>,
}

impl ForeignDeviceTable {
    pub fn new() -> Self {
        ForeignDeviceTable { rows: Vec::new() }
    }

    /// Inserts or refreshes a registration.
    pub fn register(&mut self, address: SocketAddrV4, ttl_seconds: u16) {
        let expires_at = Instant::now() + Duration::from_secs(u64::from(ttl_seconds));
        match self.rows.iter_mut().find(|r| r.address == address) {
            Some(row) => {
                row.ttl_seconds = ttl_seconds;
                row.expires_at = expires_at;
            }
            None => self.rows.push(FdtRow {
                address,
                ttl_seconds,
                expires_at,
            }),
        }
    }

    /// Removes a registration, reporting whether it was present.
    pub fn delete(&mut self, address: SocketAddrV4) -> bool {
        let before = self.rows.len();
        self.rows.retain(|r| r.address != address);
        self.rows.len() != before
    }

    /// Drops every row at or past its time-to-live.
    pub fn sweep(&mut self) {
        let now = Instant::now();
        self.rows.retain(|r| r.expires_at > now);
    }

    /// Live registration addresses, sweeping first.
    pub fn live_addresses(&mut self) -> Vec<SocketAddrV4> {
        self.sweep();
        self.rows.iter().map(|r| r.address).collect()
    }

    /// The current table in wire form, sweeping first.
    pub fn snapshot(&mut self) -> Vec<ForeignDeviceTableEntry> {
        self.sweep();
        let now = Instant::now();
        self.rows
            .iter()
            .map(|r| ForeignDeviceTableEntry {
                address: r.address,
                ttl_seconds: r.ttl_seconds,
                remaining_seconds: r
                    .expires_at
                    .saturating_duration_since(now)
                    .as_secs()
                    .min(u64::from(u16::MAX)) as u16,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
