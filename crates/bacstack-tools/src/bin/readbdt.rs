use bacstack_tools::management_link;
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddrV4};

#[derive(Parser, Debug)]
#[command(name = "bacnet-read-bdt")]
struct Args {
    #[arg(long)]
    bbmd: SocketAddrV4,
    #[arg(long, default_value_t = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))]
    local: SocketAddrV4,
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let (link, _confirmations) = management_link(args.local).await?;
    let entries = link.read_broadcast_distribution_table(args.bbmd).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("bdt is empty");
        return Ok(());
    }
    for entry in entries {
        println!("{} mask {}", entry.address, entry.mask);
    }
    Ok(())
}
