mod cli;

use chunknet::config;
use chunknet::core::peer::Peer;
use clap::Parser;
use cli::args::Arguments;
use log::{error, info, LevelFilter};
use chunknet::utils::logging::init_logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command-line arguments
    let args = Arguments::parse();

    // Initialize logging based on verbosity
    if args.verbose {
        init_logging(LevelFilter::Info);
    } else {
        init_logging(LevelFilter::Warn);
    }

    info!("Peer {} starting up", args.peer_id);

    // Load the static peer registry and check that this peer is in it
    let registry = match config::load_peer_registry(&args.base_dir.join(&args.peers_file)) {
        Ok(registry) => registry,
        Err(e) => {
            error!("Failed to load the peer registry: {:#}", e);
            std::process::exit(1);
        }
    };
    let Some(spec) = registry.get(&args.peer_id).cloned() else {
        error!("Peer {} is not in the peer registry", args.peer_id);
        std::process::exit(1);
    };

    // Load the topology and resolve this peer's neighbors
    let topology = match config::load_topology(&args.base_dir.join(&args.topology_file)) {
        Ok(topology) => topology,
        Err(e) => {
            error!("Failed to load the topology: {:#}", e);
            std::process::exit(1);
        }
    };
    if !topology.contains_key(&args.peer_id) {
        error!("Peer {} is not in the topology", args.peer_id);
        std::process::exit(1);
    }
    let neighbors = config::neighbor_endpoints(&topology, &registry, args.peer_id);

    // Bind both servers and run the searches
    let peer = Peer::new(args.peer_id, &spec, neighbors, &args.base_dir)
        .await
        .map_err(|e| {
            error!("Failed to start peer {}: {:#}", args.peer_id, e);
            e
        })?;

    peer.start(&args.file_names).await?;

    info!(
        "All searches finished on peer {}; still serving other peers",
        args.peer_id
    );

    // The accept loops run until the process is killed externally.
    std::future::pending::<()>().await;
    unreachable!()
}
