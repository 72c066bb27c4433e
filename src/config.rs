use crate::networking::endpoint::Endpoint;
use anyhow::{Context, Result};
use log::warn;
use std::collections::HashMap;
use std::path::Path;

/// One peer's static entry in the registry file: where it listens for
/// datagrams, and the byte rate it promises to pace its sends at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSpec {
    pub endpoint: Endpoint,
    pub declared_rate: usize,
}

/// `peer_id → spec`, loaded once and read-only for the whole run.
pub type PeerRegistry = HashMap<u32, PeerSpec>;

/// `peer_id → direct neighbor ids`. Not necessarily symmetric.
pub type Topology = HashMap<u32, Vec<u32>>;

///
/// Loads the peer registry file. One peer per line:
/// `<peer_id>:<ip>,<udp_port>,<declared_rate>`, whitespace around the IP is
/// tolerated. Malformed lines are logged and skipped.
///
pub fn load_peer_registry(path: &Path) -> Result<PeerRegistry> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("could not read the peer registry file {:?}", path))?;

    let mut registry = PeerRegistry::new();
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_registry_line(line) {
            Some((peer_id, spec)) => {
                registry.insert(peer_id, spec);
            }
            None => warn!("Skipping malformed peer registry line: '{}'", line),
        }
    }
    Ok(registry)
}

fn parse_registry_line(line: &str) -> Option<(u32, PeerSpec)> {
    let (peer_id, rest) = line.split_once(':')?;
    let peer_id = peer_id.trim().parse().ok()?;

    let mut fields = rest.split(',');
    let host = fields.next()?.trim();
    if host.is_empty() {
        return None;
    }
    let port = fields.next()?.trim().parse().ok()?;
    let declared_rate = fields.next()?.trim().parse().ok()?;
    if fields.next().is_some() {
        return None;
    }

    Some((
        peer_id,
        PeerSpec {
            endpoint: Endpoint::new(host, port),
            declared_rate,
        },
    ))
}

///
/// Loads the topology file. One peer per line:
/// `<peer_id>:<neighbor_id>[,<neighbor_id>...]`. Malformed lines are logged
/// and skipped.
///
pub fn load_topology(path: &Path) -> Result<Topology> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("could not read the topology file {:?}", path))?;

    let mut topology = Topology::new();
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_topology_line(line) {
            Some((peer_id, neighbors)) => {
                topology.insert(peer_id, neighbors);
            }
            None => warn!("Skipping malformed topology line: '{}'", line),
        }
    }
    Ok(topology)
}

fn parse_topology_line(line: &str) -> Option<(u32, Vec<u32>)> {
    let (peer_id, rest) = line.split_once(':')?;
    let peer_id = peer_id.trim().parse().ok()?;
    let neighbors = rest
        .split(',')
        .map(|neighbor| neighbor.trim().parse().ok())
        .collect::<Option<Vec<u32>>>()?;
    Some((peer_id, neighbors))
}

///
/// Resolves a peer's neighbor ids to datagram endpoints. Neighbor ids with
/// no registry entry are logged and skipped rather than failing the run.
///
pub fn neighbor_endpoints(
    topology: &Topology,
    registry: &PeerRegistry,
    peer_id: u32,
) -> Vec<Endpoint> {
    let Some(neighbor_ids) = topology.get(&peer_id) else {
        return Vec::new();
    };

    let mut endpoints = Vec::new();
    for neighbor_id in neighbor_ids {
        match registry.get(neighbor_id) {
            Some(spec) => endpoints.push(spec.endpoint.clone()),
            None => warn!(
                "Neighbor {} of peer {} has no registry entry, skipping it",
                neighbor_id, peer_id
            ),
        }
    }
    endpoints
}
