use bacstack_datalink::{bind, BipLink, BroadcastDistributionEntry};
use bacstack_tools::{parse_bdt_entry, parse_mask};
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddrV4};

#[derive(Parser, Debug)]
#[command(name = "bacnet-bbmd")]
struct Args {
    /// Interface address to bind, e.g. 192.168.0.2:47808.
    #[arg(long)]
    address: SocketAddrV4,
    /// Subnet mask (dotted quad or prefix length).
    #[arg(long, value_parser = parse_mask)]
    mask: Ipv4Addr,
    /// Peer BBMD in ip:port[/mask] form; repeat per peer. This BBMD's own
    /// entry is added automatically.
    #[arg(long, value_parser = parse_bdt_entry)]
    peer: Vec<BroadcastDistributionEntry>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let (upstream, mut confirmations) = bind(64);
    let link = BipLink::bind(args.address, Some(args.mask), upstream).await?;

    let mut table = vec![BroadcastDistributionEntry {
        address: link.local_addr(),
        mask: args.mask,
    }];
    table.extend(args.peer);
    let rows = table.len();
    link.set_broadcast_distribution_table(table).await;
    println!("bbmd on {} with {rows} bdt entries", link.local_addr());

    // Forwarding happens inside the link; the NPDUs themselves are not
    // our business, just count them for the log.
    while let Some(pdu) = confirmations.recv().await {
        log::debug!(
            "npdu from {}, {} bytes",
            pdu.source
                .map_or_else(|| "<unknown>".to_string(), |a| a.to_string()),
            pdu.data.len()
        );
    }
    Ok(())
}
