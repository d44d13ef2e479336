use bacstack_datalink::{bind, BipLink};
use bacstack_network::NetworkLayer;
use bacstack_tools::parse_mask;
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Routes NPDUs between two BACnet/IP networks, answering
/// Who-Is-Router-To-Network and Initialize-Routing-Table on both sides.
#[derive(Parser, Debug)]
#[command(name = "bacnet-router")]
struct Args {
    /// First interface, e.g. 192.168.0.2:47808.
    #[arg(long)]
    a_address: SocketAddrV4,
    #[arg(long, value_parser = parse_mask)]
    a_mask: Option<Ipv4Addr>,
    /// Network number of the first interface's segment.
    #[arg(long)]
    a_net: u16,
    /// Second interface; a different port on the same host works for
    /// bench setups.
    #[arg(long)]
    b_address: SocketAddrV4,
    #[arg(long, value_parser = parse_mask)]
    b_mask: Option<Ipv4Addr>,
    /// Network number of the second interface's segment.
    #[arg(long)]
    b_net: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let (app_upstream, mut app) = bind(64);
    let (a_upstream, a_confirmations) = bind(64);
    let a = BipLink::bind(args.a_address, args.a_mask, a_upstream).await?;
    let (b_upstream, b_confirmations) = bind(64);
    let b = BipLink::bind(args.b_address, args.b_mask, b_upstream).await?;

    let mut builder = NetworkLayer::builder(app_upstream);
    builder.attach_adapter(Some(args.a_net), a, a_confirmations);
    builder.attach_adapter(Some(args.b_net), b, b_confirmations);
    let (layer, driver) = builder.build();
    tokio::spawn(driver);
    println!(
        "routing network {} on {} <-> network {} on {}",
        args.a_net, args.a_address, args.b_net, args.b_address
    );

    // A pure router has no application layer; locally addressed NPDUs
    // are drained so the binding never backs up.
    while let Some(pdu) = app.recv().await {
        log::debug!("npdu addressed to the router itself, {} bytes", pdu.data.len());
    }
    drop(layer);
    Ok(())
}
