use bacstack_tools::{parse_mask, single_adapter_stack};
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddrV4};

#[derive(Parser, Debug)]
#[command(name = "bacnet-what-is-netnum")]
struct Args {
    /// Interface address to bind.
    #[arg(long)]
    address: SocketAddrV4,
    /// Subnet mask (dotted quad or prefix length), needed to broadcast
    /// the question.
    #[arg(long, value_parser = parse_mask)]
    mask: Option<Ipv4Addr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let (layer, _app) = single_adapter_stack(args.address, args.mask, None).await?;
    let network = layer.what_is_network_number().await?;
    println!("network number {network}");
    Ok(())
}
