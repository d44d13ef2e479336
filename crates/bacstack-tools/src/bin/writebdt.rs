use bacstack_datalink::BroadcastDistributionEntry;
use bacstack_tools::{management_link, parse_bdt_entry};
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddrV4};

#[derive(Parser, Debug)]
#[command(name = "bacnet-write-bdt")]
struct Args {
    #[arg(long)]
    bbmd: SocketAddrV4,
    /// Entry in ip:port/mask form; repeat for each row. The table should
    /// normally include the BBMD's own address.
    #[arg(long, value_parser = parse_bdt_entry, required = true)]
    entry: Vec<BroadcastDistributionEntry>,
    #[arg(long, default_value_t = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))]
    local: SocketAddrV4,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let (link, _confirmations) = management_link(args.local).await?;
    link.write_broadcast_distribution_table(args.bbmd, &args.entry)
        .await?;
    println!("wrote {} bdt entries", args.entry.len());
    Ok(())
}
