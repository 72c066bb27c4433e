// This module contains all the constants that affect the behavior of the peer.

use std::time::Duration;

/// # Control header size.
/// Fixed size of the TCP control header in bytes. Senders pad with NULs up to
/// this size, receivers read exactly this many bytes before parsing.
pub const CONTROL_HEADER_BYTES: usize = 1024;

/// # Stream port derivation.
/// Offset between a peer's UDP port and its TCP stream port. This is a wire
/// invariant: REQUEST carries only the requester's stream port, while
/// DISCOVERY and RESPONSE carry only UDP endpoints.
pub const STREAM_PORT_OFFSET: u16 = 1000;

/// Suffix separating a file name from its chunk id in on-disk chunk files.
pub const CHUNK_SUFFIX: &str = ".ch";

/// Extension of the per-file metadata sidecar.
pub const METADATA_EXTENSION: &str = "p2p";

/// How long a requesting peer keeps absorbing RESPONSE messages after
/// flooding its neighbors.
pub const RESPONSE_WINDOW: Duration = Duration::from_secs(10);

/// Pause between DISCOVERY forwards to consecutive neighbors. Softens burst
/// loss on small test networks; not a correctness requirement.
pub const DISCOVERY_FANOUT_DELAY: Duration = Duration::from_secs(1);

/// Pause after each paced TCP send slice of at most the declared rate.
pub const PACING_INTERVAL: Duration = Duration::from_secs(1);

/// Grace period after spawning the servers, so the rest of the lab network
/// has time to come up before the first DISCOVERY goes out.
pub const SERVER_STARTUP_DELAY: Duration = Duration::from_secs(5);

/// Default directory holding the registry, topology, metadata sidecars and
/// the per-peer chunk directories.
pub const DEFAULT_BASE_DIR: &str = "./data";

/// Default peer registry file name inside the base directory.
pub const DEFAULT_PEERS_FILE: &str = "peers.txt";

/// Default topology file name inside the base directory.
pub const DEFAULT_TOPOLOGY_FILE: &str = "topology.txt";
