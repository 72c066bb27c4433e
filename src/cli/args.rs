use chunknet::constants::{DEFAULT_BASE_DIR, DEFAULT_PEERS_FILE, DEFAULT_TOPOLOGY_FILE};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "chunknet", version = "0.1.0")]
/// Peer-to-peer chunk exchange node
pub struct Arguments {
    /// This peer's id in the registry file.
    pub peer_id: u32,

    #[arg(required = true)]
    /// Names of the files to search for on the network.
    pub file_names: Vec<String>,

    #[arg(long, default_value = DEFAULT_BASE_DIR)]
    /// Directory holding the registry, topology, metadata sidecars and the
    /// per-peer chunk directories.
    pub base_dir: PathBuf,

    #[arg(long, default_value = DEFAULT_PEERS_FILE)]
    /// Peer registry file name inside the base directory.
    pub peers_file: String,

    #[arg(long, default_value = DEFAULT_TOPOLOGY_FILE)]
    /// Topology file name inside the base directory.
    pub topology_file: String,

    #[arg(short, long)]
    /// Log info about the ongoing communication to stderr.
    pub verbose: bool,
}
