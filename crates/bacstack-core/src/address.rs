//! Station addressing for the network stack.
//!
//! Every reachable endpoint is described by an [`Address`]: one of five
//! classes (local station, local broadcast, remote station, remote
//! broadcast, global broadcast) plus an optional `@router` annotation that
//! pins the first hop. The MAC portion is a small fixed-capacity byte
//! string ([`Mac`]) so the same type covers a one-octet MS/TP station, a
//! six-octet IPv4 address-and-port pair, and an eighteen-octet IPv6
//! address-and-port pair without allocating.
//!
//! The text grammar accepted by [`Address::parse`]:
//!
//! ```text
//! *                          local broadcast
//! *:*                        global broadcast
//! <net>:*                    remote broadcast on <net>
//! <net>:<mac>                remote station
//! <mac>                      local station
//! <form>@<mac>               any remote form, routed via <mac>
//! ```
//!
//! where `<mac>` is a bare octet (`12`), a hex string (`0x01020304`), a
//! colon-separated hardware address (`01:23:45:67:89:ab`), a dotted quad
//! with optional mask and port (`192.168.0.17/24:47809`), or a bracketed
//! IPv6 address with optional prefix length and port (`[2001:db8::1]:47809`).
//! Network numbers are decimal, 1 through 65534; 65535 is reserved for the
//! global broadcast wire form and is never a valid explicit network.

use core::fmt;
use core::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use core::str::FromStr;

/// Default UDP port for BACnet/IP, 0xBAC0.
pub const BACNET_IP_DEFAULT_PORT: u16 = 47808;

/// A link-layer station identifier, up to 18 bytes.
///
/// Stored zero-filled past `len` so equality, ordering and hashing can
/// derive byte-wise. One byte is an MS/TP station, six bytes is an IPv4
/// address with a big-endian port appended, eighteen bytes is an IPv6
/// address with a port appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Mac {
    bytes: [u8; Mac::MAX_LEN],
    len: u8,
}

impl Mac {
    /// Largest MAC carried on any supported link: IPv6 address plus port.
    pub const MAX_LEN: usize = 18;

    /// The zero-length MAC used in broadcast wire forms.
    pub const fn empty() -> Self {
        Mac {
            bytes: [0; Mac::MAX_LEN],
            len: 0,
        }
    }

    /// Copies `bytes` into a new MAC. `None` if longer than [`Mac::MAX_LEN`].
    pub fn new(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > Mac::MAX_LEN {
            return None;
        }
        let mut buf = [0u8; Mac::MAX_LEN];
        buf[..bytes.len()].copy_from_slice(bytes);
        Some(Mac {
            bytes: buf,
            len: bytes.len() as u8,
        })
    }

    /// One-octet station number, as used on MS/TP segments.
    pub const fn from_octet(octet: u8) -> Self {
        let mut buf = [0u8; Mac::MAX_LEN];
        buf[0] = octet;
        Mac { bytes: buf, len: 1 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub const fn len(&self) -> usize {
        self.len as usize
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reads the MAC back as a socket address, for the two IP encodings.
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        match self.len {
            6 => {
                let ip = Ipv4Addr::new(self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]);
                let port = u16::from_be_bytes([self.bytes[4], self.bytes[5]]);
                Some(SocketAddr::V4(SocketAddrV4::new(ip, port)))
            }
            18 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&self.bytes[..16]);
                let port = u16::from_be_bytes([self.bytes[16], self.bytes[17]]);
                Some(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(octets),
                    port,
                    0,
                    0,
                )))
            }
            _ => None,
        }
    }
}

impl From<SocketAddrV4> for Mac {
    fn from(addr: SocketAddrV4) -> Self {
        let mut buf = [0u8; Mac::MAX_LEN];
        buf[..4].copy_from_slice(&addr.ip().octets());
        buf[4..6].copy_from_slice(&addr.port().to_be_bytes());
        Mac { bytes: buf, len: 6 }
    }
}

impl From<SocketAddrV6> for Mac {
    fn from(addr: SocketAddrV6) -> Self {
        let mut buf = [0u8; Mac::MAX_LEN];
        buf[..16].copy_from_slice(&addr.ip().octets());
        buf[16..18].copy_from_slice(&addr.port().to_be_bytes());
        Mac {
            bytes: buf,
            len: 18,
        }
    }
}

impl From<SocketAddr> for Mac {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Mac::from(v4),
            SocketAddr::V6(v6) => Mac::from(v6),
        }
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.len {
            1 => write!(f, "{}", self.bytes[0]),
            6 => {
                let ip = Ipv4Addr::new(self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]);
                let port = u16::from_be_bytes([self.bytes[4], self.bytes[5]]);
                if port == BACNET_IP_DEFAULT_PORT {
                    write!(f, "{ip}")
                } else {
                    write!(f, "{ip}:{port}")
                }
            }
            18 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&self.bytes[..16]);
                let ip = Ipv6Addr::from(octets);
                let port = u16::from_be_bytes([self.bytes[16], self.bytes[17]]);
                if port == BACNET_IP_DEFAULT_PORT {
                    write!(f, "[{ip}]")
                } else {
                    write!(f, "[{ip}]:{port}")
                }
            }
            _ => {
                write!(f, "0x")?;
                for b in self.as_bytes() {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// The five address classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressKind {
    /// A station on the local network.
    LocalStation(Mac),
    /// Every station on the local network.
    LocalBroadcast,
    /// A station on a specific remote network.
    RemoteStation { network: u16, mac: Mac },
    /// Every station on a specific remote network.
    RemoteBroadcast(u16),
    /// Every station on every network.
    GlobalBroadcast,
}

/// A destination or source endpoint: an [`AddressKind`] plus an optional
/// first-hop router MAC.
///
/// Two addresses compare equal only if both the class and the annotation
/// agree; callers that want class-only identity should key on
/// [`Address::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Address {
    kind: AddressKind,
    route: Option<Mac>,
}

impl Address {
    pub const fn local_station(mac: Mac) -> Self {
        Address {
            kind: AddressKind::LocalStation(mac),
            route: None,
        }
    }

    /// A station on network `network` (valid range 1..=65534).
    pub const fn remote_station(network: u16, mac: Mac) -> Self {
        Address {
            kind: AddressKind::RemoteStation { network, mac },
            route: None,
        }
    }

    pub const fn local_broadcast() -> Self {
        Address {
            kind: AddressKind::LocalBroadcast,
            route: None,
        }
    }

    pub const fn remote_broadcast(network: u16) -> Self {
        Address {
            kind: AddressKind::RemoteBroadcast(network),
            route: None,
        }
    }

    pub const fn global_broadcast() -> Self {
        Address {
            kind: AddressKind::GlobalBroadcast,
            route: None,
        }
    }

    pub const fn from_kind(kind: AddressKind) -> Self {
        Address { kind, route: None }
    }

    /// Pins the first hop to `route`, bypassing router discovery.
    pub fn with_route(mut self, route: Mac) -> Self {
        self.route = Some(route);
        self
    }

    /// Drops the router annotation, keeping the class.
    pub fn without_route(mut self) -> Self {
        self.route = None;
        self
    }

    pub const fn kind(&self) -> AddressKind {
        self.kind
    }

    pub const fn route(&self) -> Option<Mac> {
        self.route
    }

    /// The station MAC, for the two station classes.
    pub fn mac(&self) -> Option<Mac> {
        match self.kind {
            AddressKind::LocalStation(mac) => Some(mac),
            AddressKind::RemoteStation { mac, .. } => Some(mac),
            _ => None,
        }
    }

    /// The explicit remote network number, for the two remote classes.
    pub fn network(&self) -> Option<u16> {
        match self.kind {
            AddressKind::RemoteStation { network, .. } => Some(network),
            AddressKind::RemoteBroadcast(network) => Some(network),
            _ => None,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(
            self.kind,
            AddressKind::LocalBroadcast
                | AddressKind::RemoteBroadcast(_)
                | AddressKind::GlobalBroadcast
        )
    }

    /// Whether `self`, read as a filter, covers `other`.
    ///
    /// Broadcast classes cover the stations in their scope: global covers
    /// everything, local broadcast covers local stations, a remote
    /// broadcast covers stations on the same network. Station classes
    /// cover only themselves. Router annotations are ignored.
    pub fn matches(&self, other: &Address) -> bool {
        match self.kind {
            AddressKind::GlobalBroadcast => true,
            AddressKind::LocalBroadcast => matches!(
                other.kind,
                AddressKind::LocalStation(_) | AddressKind::LocalBroadcast
            ),
            AddressKind::RemoteBroadcast(network) => match other.kind {
                AddressKind::RemoteStation { network: n, .. } => n == network,
                AddressKind::RemoteBroadcast(n) => n == network,
                _ => false,
            },
            AddressKind::LocalStation(_) | AddressKind::RemoteStation { .. } => {
                self.kind == other.kind
            }
        }
    }

    /// Parses the text grammar described in the [module docs](self).
    pub fn parse(text: &str) -> Result<Self, AddressParseError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AddressParseError::Empty);
        }
        let (main, route) = match text.split_once('@') {
            Some((main, route_text)) => {
                let mac = parse_mac(route_text).map_err(|e| match e {
                    AddressParseError::InvalidMac => AddressParseError::InvalidRoute,
                    other => other,
                })?;
                (main, Some(mac))
            }
            None => (text, None),
        };
        let kind = parse_kind(main)?;
        if route.is_some()
            && matches!(
                kind,
                AddressKind::LocalStation(_) | AddressKind::LocalBroadcast
            )
        {
            // A first hop only makes sense for traffic that leaves the
            // local network.
            return Err(AddressParseError::InvalidRoute);
        }
        Ok(Address { kind, route })
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AddressKind::LocalStation(mac) => write!(f, "{mac}")?,
            AddressKind::LocalBroadcast => write!(f, "*")?,
            AddressKind::RemoteStation { network, mac } => write!(f, "{network}:{mac}")?,
            AddressKind::RemoteBroadcast(network) => write!(f, "{network}:*")?,
            AddressKind::GlobalBroadcast => write!(f, "*:*")?,
        }
        if let Some(route) = self.route {
            write!(f, "@{route}")?;
        }
        Ok(())
    }
}

/// Why a piece of address text was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressParseError {
    Empty,
    /// Network number missing, non-decimal, or outside 1..=65534.
    InvalidNetwork,
    /// MAC portion not one of the recognized forms.
    InvalidMac,
    /// Port suffix not a decimal u16.
    InvalidPort,
    /// Mask or prefix length out of range for the address family.
    InvalidMask,
    /// Text after `@` is not a station MAC.
    InvalidRoute,
}

impl fmt::Display for AddressParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            AddressParseError::Empty => "empty address",
            AddressParseError::InvalidNetwork => "invalid network number",
            AddressParseError::InvalidMac => "invalid MAC",
            AddressParseError::InvalidPort => "invalid port",
            AddressParseError::InvalidMask => "invalid mask",
            AddressParseError::InvalidRoute => "invalid router annotation",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AddressParseError {}

fn parse_kind(text: &str) -> Result<AddressKind, AddressParseError> {
    if text == "*" {
        return Ok(AddressKind::LocalBroadcast);
    }
    if let Some((head, tail)) = text.split_once(':') {
        if head == "*" {
            return if tail == "*" {
                Ok(AddressKind::GlobalBroadcast)
            } else {
                Err(AddressParseError::InvalidNetwork)
            };
        }
        if !head.is_empty() && head.bytes().all(|b| b.is_ascii_digit()) {
            if tail == "*" {
                return Ok(AddressKind::RemoteBroadcast(parse_network(head)?));
            }
            if let Ok(mac) = parse_mac(tail) {
                return Ok(AddressKind::RemoteStation {
                    network: parse_network(head)?,
                    mac,
                });
            }
            // The colon belongs to the MAC itself ("01:23:45:67:89:ab"),
            // fall through and parse the whole text as one.
        }
    }
    Ok(AddressKind::LocalStation(parse_mac(text)?))
}

fn parse_network(text: &str) -> Result<u16, AddressParseError> {
    let net: u32 = text
        .parse()
        .map_err(|_| AddressParseError::InvalidNetwork)?;
    if net == 0 || net > 0xFFFE {
        return Err(AddressParseError::InvalidNetwork);
    }
    Ok(net as u16)
}

fn parse_mac(text: &str) -> Result<Mac, AddressParseError> {
    if text.is_empty() {
        return Err(AddressParseError::InvalidMac);
    }
    if let Some(digits) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return parse_hex_mac(digits);
    }
    if text.starts_with('[') {
        return parse_ipv6_mac(text);
    }
    if let Some(mac) = parse_hardware_mac(text) {
        return Ok(mac);
    }
    if text.contains('.') {
        return parse_ipv4_mac(text);
    }
    if text.bytes().all(|b| b.is_ascii_digit()) {
        let octet: u32 = text.parse().map_err(|_| AddressParseError::InvalidMac)?;
        if octet > 255 {
            return Err(AddressParseError::InvalidMac);
        }
        return Ok(Mac::from_octet(octet as u8));
    }
    Err(AddressParseError::InvalidMac)
}

fn parse_hex_mac(digits: &str) -> Result<Mac, AddressParseError> {
    if digits.is_empty() || digits.len() % 2 != 0 || digits.len() / 2 > Mac::MAX_LEN {
        return Err(AddressParseError::InvalidMac);
    }
    let mut buf = [0u8; Mac::MAX_LEN];
    let mut len = 0;
    let raw = digits.as_bytes();
    for pair in raw.chunks_exact(2) {
        let hi = hex_nibble(pair[0]).ok_or(AddressParseError::InvalidMac)?;
        let lo = hex_nibble(pair[1]).ok_or(AddressParseError::InvalidMac)?;
        buf[len] = (hi << 4) | lo;
        len += 1;
    }
    Ok(Mac {
        bytes: buf,
        len: len as u8,
    })
}

fn hex_nibble(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Six colon-separated hex pairs, the classic hardware address notation.
fn parse_hardware_mac(text: &str) -> Option<Mac> {
    let mut bytes = [0u8; 6];
    let mut parts = text.split(':');
    for slot in &mut bytes {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *slot = u8::from_str_radix(part, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Mac::new(&bytes)
}

fn parse_ipv4_mac(text: &str) -> Result<Mac, AddressParseError> {
    let (head, port) = match text.split_once(':') {
        Some((head, port_text)) => (head, parse_port(port_text)?),
        None => (text, BACNET_IP_DEFAULT_PORT),
    };
    let addr_text = match head.split_once('/') {
        Some((addr_text, mask_text)) => {
            validate_ipv4_mask(mask_text)?;
            addr_text
        }
        None => head,
    };
    let ip = Ipv4Addr::from_str(addr_text).map_err(|_| AddressParseError::InvalidMac)?;
    Ok(Mac::from(SocketAddrV4::new(ip, port)))
}

fn validate_ipv4_mask(text: &str) -> Result<(), AddressParseError> {
    if text.contains('.') {
        Ipv4Addr::from_str(text)
            .map(|_| ())
            .map_err(|_| AddressParseError::InvalidMask)
    } else {
        let bits: u32 = text.parse().map_err(|_| AddressParseError::InvalidMask)?;
        if bits > 32 {
            return Err(AddressParseError::InvalidMask);
        }
        Ok(())
    }
}

fn parse_ipv6_mac(text: &str) -> Result<Mac, AddressParseError> {
    let inner_end = text.find(']').ok_or(AddressParseError::InvalidMac)?;
    let ip = Ipv6Addr::from_str(&text[1..inner_end]).map_err(|_| AddressParseError::InvalidMac)?;
    let after = &text[inner_end + 1..];
    let (mask_text, port) = match after.split_once(':') {
        Some((mask_text, port_text)) => (mask_text, parse_port(port_text)?),
        None => (after, BACNET_IP_DEFAULT_PORT),
    };
    match mask_text.strip_prefix('/') {
        Some(bits_text) => {
            let bits: u32 = bits_text.parse().map_err(|_| AddressParseError::InvalidMask)?;
            if bits > 128 {
                return Err(AddressParseError::InvalidMask);
            }
        }
        None if mask_text.is_empty() => {}
        None => return Err(AddressParseError::InvalidMac),
    }
    Ok(Mac::from(SocketAddrV6::new(ip, port, 0, 0)))
}

fn parse_port(text: &str) -> Result<u16, AddressParseError> {
    text.parse().map_err(|_| AddressParseError::InvalidPort)
}

#[cfg(test)]
#[cfg(feature = "alloc")]
mod tests {
    use super::{Address, AddressKind, AddressParseError, Mac, BACNET_IP_DEFAULT_PORT};
    use alloc::format;
    use core::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
    use proptest::prelude::*;

    fn ip_mac(a: u8, b: u8, c: u8, d: u8, port: u16) -> Mac {
        Mac::from(SocketAddrV4::new(Ipv4Addr::new(a, b, c, d), port))
    }

    #[test]
    fn parses_broadcast_forms() {
        assert_eq!(
            Address::parse("*").unwrap(),
            Address::local_broadcast()
        );
        assert_eq!(
            Address::parse("*:*").unwrap(),
            Address::global_broadcast()
        );
        assert_eq!(
            Address::parse("5:*").unwrap(),
            Address::remote_broadcast(5)
        );
    }

    #[test]
    fn parses_station_forms() {
        assert_eq!(
            Address::parse("12").unwrap(),
            Address::local_station(Mac::from_octet(12))
        );
        assert_eq!(
            Address::parse("100:7").unwrap(),
            Address::remote_station(100, Mac::from_octet(7))
        );
        assert_eq!(
            Address::parse("0x0a0b0c").unwrap(),
            Address::local_station(Mac::new(&[0x0a, 0x0b, 0x0c]).unwrap())
        );
        assert_eq!(
            Address::parse("01:23:45:67:89:ab").unwrap(),
            Address::local_station(Mac::new(&[0x01, 0x23, 0x45, 0x67, 0x89, 0xab]).unwrap())
        );
    }

    #[test]
    fn parses_ipv4_forms() {
        assert_eq!(
            Address::parse("192.168.0.17").unwrap(),
            Address::local_station(ip_mac(192, 168, 0, 17, BACNET_IP_DEFAULT_PORT))
        );
        assert_eq!(
            Address::parse("192.168.0.17:47809").unwrap(),
            Address::local_station(ip_mac(192, 168, 0, 17, 47809))
        );
        // Masks are accepted for symmetry with interface specs and do not
        // change the station identity.
        assert_eq!(
            Address::parse("192.168.0.17/24").unwrap(),
            Address::parse("192.168.0.17").unwrap()
        );
        assert_eq!(
            Address::parse("192.168.0.17/255.255.255.0:47809").unwrap(),
            Address::parse("192.168.0.17:47809").unwrap()
        );
    }

    #[test]
    fn parses_remote_station_with_ip_mac() {
        let addr = Address::parse("100:192.168.0.17:47809").unwrap();
        assert_eq!(addr.network(), Some(100));
        assert_eq!(addr.mac(), Some(ip_mac(192, 168, 0, 17, 47809)));
    }

    #[test]
    fn parses_ipv6_forms() {
        let addr = Address::parse("[2001:db8::1]").unwrap();
        let mac = addr.mac().unwrap();
        assert_eq!(mac.len(), 18);
        assert_eq!(
            mac.to_socket_addr().unwrap().port(),
            BACNET_IP_DEFAULT_PORT
        );

        let addr = Address::parse("[2001:db8::1]/64:47809").unwrap();
        assert_eq!(addr.mac().unwrap().to_socket_addr().unwrap().port(), 47809);
    }

    #[test]
    fn parses_router_annotation() {
        let addr = Address::parse("100:192.168.0.17:47809@10.0.0.1").unwrap();
        assert_eq!(addr.network(), Some(100));
        assert_eq!(
            addr.route(),
            Some(ip_mac(10, 0, 0, 1, BACNET_IP_DEFAULT_PORT))
        );

        let bcast = Address::parse("5:*@10.0.0.1:47809").unwrap();
        assert_eq!(bcast.kind(), AddressKind::RemoteBroadcast(5));
        assert_eq!(bcast.route(), Some(ip_mac(10, 0, 0, 1, 47809)));
    }

    #[test]
    fn route_annotation_changes_equality_not_kind() {
        let plain = Address::parse("100:7").unwrap();
        let routed = Address::parse("100:7@10.0.0.1").unwrap();
        assert_ne!(plain, routed);
        assert_eq!(plain.kind(), routed.kind());
        assert_eq!(routed.without_route(), plain);
    }

    #[test]
    fn rejects_route_on_local_forms() {
        assert_eq!(
            Address::parse("12@10.0.0.1"),
            Err(AddressParseError::InvalidRoute)
        );
        assert_eq!(
            Address::parse("*@10.0.0.1"),
            Err(AddressParseError::InvalidRoute)
        );
    }

    #[test]
    fn rejects_bad_networks() {
        assert_eq!(Address::parse("0:1"), Err(AddressParseError::InvalidNetwork));
        assert_eq!(
            Address::parse("65535:1"),
            Err(AddressParseError::InvalidNetwork)
        );
        assert_eq!(
            Address::parse("70000:1"),
            Err(AddressParseError::InvalidNetwork)
        );
        assert_eq!(Address::parse("*:5"), Err(AddressParseError::InvalidNetwork));
    }

    #[test]
    fn rejects_bad_macs() {
        assert_eq!(Address::parse(""), Err(AddressParseError::Empty));
        assert_eq!(Address::parse("0x123"), Err(AddressParseError::InvalidMac));
        assert_eq!(Address::parse("300"), Err(AddressParseError::InvalidMac));
        assert_eq!(
            Address::parse("1.2.3.4:99999"),
            Err(AddressParseError::InvalidPort)
        );
        assert_eq!(
            Address::parse("1.2.3.4/40"),
            Err(AddressParseError::InvalidMask)
        );
        assert_eq!(
            Address::parse("[2001:db8::1]/200"),
            Err(AddressParseError::InvalidMask)
        );
    }

    #[test]
    fn display_uses_canonical_forms() {
        for (input, canonical) in [
            ("*", "*"),
            ("*:*", "*:*"),
            ("5:*", "5:*"),
            ("12", "12"),
            ("100:7", "100:7"),
            ("192.168.0.17:47808", "192.168.0.17"),
            ("192.168.0.17/24:47809", "192.168.0.17:47809"),
            ("100:192.168.0.17:47809", "100:192.168.0.17:47809"),
            ("0x0a0b0c", "0x0a0b0c"),
            ("[2001:db8::1]:47809", "[2001:db8::1]:47809"),
            ("5:*@10.0.0.1", "5:*@10.0.0.1"),
        ] {
            let addr = Address::parse(input).unwrap();
            assert_eq!(format!("{addr}"), canonical, "for input {input:?}");
        }
    }

    #[test]
    fn matches_respects_scope() {
        let global = Address::global_broadcast();
        let local_bcast = Address::local_broadcast();
        let local = Address::local_station(Mac::from_octet(1));
        let remote = Address::remote_station(5, Mac::from_octet(1));
        let remote_bcast = Address::remote_broadcast(5);

        assert!(global.matches(&local));
        assert!(global.matches(&remote));
        assert!(local_bcast.matches(&local));
        assert!(!local_bcast.matches(&remote));
        assert!(remote_bcast.matches(&remote));
        assert!(!remote_bcast.matches(&Address::remote_station(6, Mac::from_octet(1))));
        assert!(remote.matches(&remote));
        assert!(!remote.matches(&Address::remote_station(5, Mac::from_octet(2))));
        assert!(!local.matches(&local_bcast));
    }

    #[test]
    fn mac_socket_addr_round_trip() {
        let v4: SocketAddr = "10.0.0.1:47809".parse().unwrap();
        assert_eq!(Mac::from(v4).to_socket_addr(), Some(v4));

        let v6: SocketAddr = "[2001:db8::1]:47808".parse().unwrap();
        assert_eq!(Mac::from(v6).to_socket_addr(), Some(v6));

        assert_eq!(Mac::from_octet(3).to_socket_addr(), None);
    }

    fn any_mac() -> impl Strategy<Value = Mac> {
        proptest::collection::vec(any::<u8>(), 1..=Mac::MAX_LEN)
            .prop_map(|bytes| Mac::new(&bytes).unwrap())
    }

    fn any_address() -> impl Strategy<Value = Address> {
        let kind = prop_oneof![
            any_mac().prop_map(Address::local_station),
            Just(Address::local_broadcast()),
            (1u16..=0xFFFE, any_mac()).prop_map(|(net, mac)| Address::remote_station(net, mac)),
            (1u16..=0xFFFE).prop_map(Address::remote_broadcast),
            Just(Address::global_broadcast()),
        ];
        (kind, proptest::option::of(any_mac())).prop_map(|(addr, route)| {
            // Annotations only parse back on remote forms.
            match (route, addr.kind()) {
                (Some(mac), AddressKind::RemoteStation { .. })
                | (Some(mac), AddressKind::RemoteBroadcast(_))
                | (Some(mac), AddressKind::GlobalBroadcast) => addr.with_route(mac),
                _ => addr,
            }
        })
    }

    proptest! {
        #[test]
        fn display_parse_round_trip(addr in any_address()) {
            let text = format!("{addr}");
            let back = Address::parse(&text).unwrap();
            prop_assert_eq!(back, addr);
        }
    }
}
