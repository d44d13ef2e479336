use bacstack_tools::management_link;
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddrV4};

#[derive(Parser, Debug)]
#[command(name = "bacnet-delete-fdt")]
struct Args {
    #[arg(long)]
    bbmd: SocketAddrV4,
    /// Registered foreign device to evict.
    #[arg(long)]
    target: SocketAddrV4,
    #[arg(long, default_value_t = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))]
    local: SocketAddrV4,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let (link, _confirmations) = management_link(args.local).await?;
    link.delete_foreign_device_table_entry(args.bbmd, args.target)
        .await?;
    println!("deleted fdt entry {}", args.target);
    Ok(())
}
