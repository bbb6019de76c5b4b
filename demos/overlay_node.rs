use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::mpsc;
use std::time::Duration;

use clap::Parser;
use layered_overlay::{Id, NodeRecord, Overlay, SnapshotHandle};
use tracing::Level;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Local node Id, random if missing
    #[arg(long)]
    id: Option<String>,
    /// Address the transport of this node listens on
    #[arg(long, default_value = "127.0.0.1:7000")]
    address: SocketAddr,
    /// Number of hex digits of every Id
    #[arg(long, default_value_t = 8)]
    dimension: usize,
    /// Bootstrap node as `<id>@<ip>:<port>`
    #[arg(long)]
    bootstrap: Option<String>,
    /// Directory of received, produced and persisted XML snapshots
    #[arg(long, default_value = "overlay-data")]
    storage: String,
    /// Snapshot files to ingest at startup, relative to the storage directory
    #[arg(long)]
    ingest: Vec<String>,
    /// Number of random nodes merged into the base layer
    #[arg(long, default_value_t = 32)]
    seed: usize,
    /// Target to resolve the next hop of, random if missing
    #[arg(long)]
    target: Option<String>,
    /// Keep running the background threads until Ctrl-C
    #[arg(long)]
    stay: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();

    let cli = Cli::parse();

    let id = match &cli.id {
        Some(id) => Id::parse(id, cli.dimension)?,
        None => Id::random(cli.dimension),
    };

    let mut builder = Overlay::builder()
        .dimension(cli.dimension)
        .local(NodeRecord::new(id, cli.address))
        .ingest_poll_interval(Duration::from_secs(1))
        .storage_directory(&cli.storage)?;

    if let Some(bootstrap) = &cli.bootstrap {
        let (id, address) = bootstrap
            .split_once('@')
            .ok_or("bootstrap must be <id>@<ip>:<port>")?;

        builder = builder.bootstrap(NodeRecord::new(
            Id::parse(id, cli.dimension)?,
            SocketAddr::from_str(address)?,
        ));
    }

    let overlay = builder.build()?;
    let base = overlay.layer_id("base").ok_or("missing base layer")?;

    println!("\nLocal node: {}\n", overlay.local().id());

    for port in 0..cli.seed {
        let node = NodeRecord::new(
            Id::random(cli.dimension),
            SocketAddr::from(([127, 0, 0, 1], 20_000 + port as u16)),
        );
        overlay.merge_routing_table(base, &node)?;
    }

    for file in &cli.ingest {
        overlay.receive(SnapshotHandle::new(file));
    }
    let ingested = overlay.drain_ingest();

    let table = overlay.routing_table(base)?;
    println!(
        "Routing table: {} entries, {} distinct nodes, {ingested} snapshots ingested",
        table.size(),
        table.nodes().len()
    );

    while let Some(request) = overlay.egress().pop() {
        println!("RTT probe request: {}", request.path().display());
    }

    let target = match &cli.target {
        Some(target) => Id::parse(target, cli.dimension)?,
        None => Id::random(cli.dimension),
    };

    match overlay.find_next_hop(base, &target)?.relay() {
        Some(node) => println!("Next hop to {target}: {} at {}", node.id(), node.address()),
        None => println!("Local node is the root of {target}"),
    }

    overlay.persist(base)?;

    if cli.stay {
        let (sender, receiver) = mpsc::channel();
        ctrlc::set_handler(move || {
            let _ = sender.send(());
        })?;

        println!("\nRunning, press Ctrl-C to stop");
        let _ = receiver.recv();
    }

    overlay.shutdown();

    Ok(())
}
