use bacstack_tools::{parse_mask, single_adapter_stack};
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddrV4};

#[derive(Parser, Debug)]
#[command(name = "bacnet-whois-router")]
struct Args {
    /// Destination network to find a router for.
    network: u16,
    /// Interface address to bind; port 47808 unless the segment uses
    /// another one.
    #[arg(long)]
    address: SocketAddrV4,
    /// Subnet mask (dotted quad or prefix length); without it the
    /// Who-Is-Router-To-Network broadcast cannot be sent.
    #[arg(long, value_parser = parse_mask)]
    mask: Option<Ipv4Addr>,
    /// Network number of the local segment, if known.
    #[arg(long)]
    net: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let (layer, _app) = single_adapter_stack(args.address, args.mask, args.net).await?;
    let info = layer.who_is_router_to_network(args.network).await?;
    println!("network {} via {}", info.network, info.address);
    Ok(())
}
