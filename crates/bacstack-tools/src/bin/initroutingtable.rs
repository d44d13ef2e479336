use bacstack_core::npdu::RoutingTableEntry;
use bacstack_core::{Address, Mac};
use bacstack_tools::{parse_mask, single_adapter_stack};
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddrV4};

/// `network:port-id` with an optional `:hex-port-info` tail.
fn parse_table_entry(value: &str) -> Result<RoutingTableEntry, String> {
    let mut parts = value.splitn(3, ':');
    let network = parts
        .next()
        .unwrap_or_default()
        .parse::<u16>()
        .map_err(|e| format!("invalid network number: {e}"))?;
    let port_id = parts
        .next()
        .ok_or_else(|| "entry must be in network:port-id form".to_string())?
        .parse::<u8>()
        .map_err(|e| format!("invalid port id: {e}"))?;
    let port_info = match parts.next() {
        None => Vec::new(),
        Some(hex) => parse_hex(hex)?,
    };
    Ok(RoutingTableEntry {
        network,
        port_id,
        port_info,
    })
}

fn parse_hex(hex: &str) -> Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 {
        return Err("port info hex must have an even number of digits".to_string());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| format!("invalid port info hex: {e}"))
        })
        .collect()
}

#[derive(Parser, Debug)]
#[command(name = "bacnet-init-routing-table")]
struct Args {
    /// The router to query or configure.
    #[arg(long)]
    router: SocketAddrV4,
    /// Replacement entry in network:port-id[:hex] form; repeat per row.
    /// With no entries the router's current table is read back.
    #[arg(long, value_parser = parse_table_entry)]
    entry: Vec<RoutingTableEntry>,
    /// Interface address to bind.
    #[arg(long)]
    address: SocketAddrV4,
    #[arg(long, value_parser = parse_mask)]
    mask: Option<Ipv4Addr>,
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let (layer, _app) = single_adapter_stack(args.address, args.mask, None).await?;
    let router = Address::local_station(Mac::from(args.router));
    let table = layer.initialize_routing_table(router, args.entry).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&table)?);
        return Ok(());
    }
    if table.is_empty() {
        println!("routing table is empty");
        return Ok(());
    }
    for entry in table {
        if entry.port_info.is_empty() {
            println!("network {} port {}", entry.network, entry.port_id);
        } else {
            let info: String = entry
                .port_info
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect();
            println!("network {} port {} info {info}", entry.network, entry.port_id);
        }
    }
    Ok(())
}
