use std::net::{Ipv4Addr, SocketAddrV4};

use bacstack_datalink::{bind, BipLink, BroadcastDistributionEntry, Confirmations, LinkError};
use bacstack_network::NetworkLayer;

/// Parses a broadcast distribution table entry in `ip:port/mask` form,
/// where the mask is a dotted quad or a prefix length. `/32` (or an
/// omitted mask) marks a peer BBMD that rebroadcasts itself.
pub fn parse_bdt_entry(value: &str) -> Result<BroadcastDistributionEntry, String> {
    let (addr_part, mask_part) = match value.split_once('/') {
        Some((addr, mask)) => (addr, Some(mask)),
        None => (value, None),
    };
    let address: SocketAddrV4 = addr_part
        .parse()
        .map_err(|e| format!("invalid entry address '{addr_part}': {e}"))?;
    let mask = match mask_part {
        None => Ipv4Addr::BROADCAST,
        Some(mask) => parse_mask(mask)?,
    };
    Ok(BroadcastDistributionEntry { address, mask })
}

/// Parses a subnet mask given as a dotted quad or a prefix length.
pub fn parse_mask(value: &str) -> Result<Ipv4Addr, String> {
    if let Ok(prefix) = value.parse::<u8>() {
        if prefix > 32 {
            return Err(format!("prefix length {prefix} out of range"));
        }
        let bits = match prefix {
            0 => 0,
            _ => u32::MAX << (32 - u32::from(prefix)),
        };
        return Ok(Ipv4Addr::from(bits));
    }
    value
        .parse()
        .map_err(|e| format!("invalid subnet mask '{value}': {e}"))
}

/// A unicast-only link for BBMD management exchanges. No broadcast
/// socket is opened, so an ephemeral local port works fine.
pub async fn management_link(
    local: SocketAddrV4,
) -> Result<(BipLink, Confirmations), LinkError> {
    let (upstream, confirmations) = bind(32);
    let link = BipLink::bind(local, None, upstream).await?;
    Ok((link, confirmations))
}

/// One BACnet/IP adapter under a network layer, the composition every
/// routing diagnostic uses. The driver is spawned; the returned
/// [`Confirmations`] carries application NPDUs.
pub async fn single_adapter_stack(
    local: SocketAddrV4,
    mask: Option<Ipv4Addr>,
    network: Option<u16>,
) -> Result<(NetworkLayer<BipLink>, Confirmations), LinkError> {
    let (app_upstream, app) = bind(32);
    let (link_upstream, link_confirmations) = bind(32);
    let link = BipLink::bind(local, mask, link_upstream).await?;
    let mut builder = NetworkLayer::builder(app_upstream);
    builder.attach_adapter(network, link, link_confirmations);
    let (layer, driver) = builder.build();
    tokio::spawn(driver);
    Ok((layer, app))
}

#[cfg(test)]
mod tests {
    use super::{parse_bdt_entry, parse_mask};
    use std::net::Ipv4Addr;

    #[test]
    fn bdt_entries_parse_with_and_without_masks() {
        let entry = parse_bdt_entry("192.168.0.1:47808/255.255.255.0").unwrap();
        assert_eq!(entry.mask, Ipv4Addr::new(255, 255, 255, 0));
        let peer = parse_bdt_entry("192.168.1.1:47808").unwrap();
        assert_eq!(peer.mask, Ipv4Addr::BROADCAST);
        assert!(parse_bdt_entry("not-an-address/24").is_err());
    }

    #[test]
    fn masks_parse_as_prefix_or_dotted_quad() {
        assert_eq!(parse_mask("24").unwrap(), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(parse_mask("0").unwrap(), Ipv4Addr::UNSPECIFIED);
        assert_eq!(
            parse_mask("255.255.0.0").unwrap(),
            Ipv4Addr::new(255, 255, 0, 0)
        );
        assert!(parse_mask("33").is_err());
    }
}
