use crate::constants::{CONTROL_HEADER_BYTES, DISCOVERY_FANOUT_DELAY, RESPONSE_WINDOW};
use crate::core::selector;
use crate::networking::endpoint::Endpoint;
use crate::networking::messages::Datagram;
use crate::networking::transfer::TransferService;
use crate::storage::file_store::FileStore;
use crate::storage::location_registry::LocationRegistry;
use anyhow::Context;
use log::{error, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::sleep;

///
/// The datagram side of the protocol: a UDP server that floods DISCOVERY
/// messages through the neighbor graph under a TTL budget, collects chunk
/// advertisements into the location registry, and turns REQUEST messages
/// into outbound chunk pushes.
///
/// The service holds a one-way capability handle on the [`TransferService`]
/// so a REQUEST can trigger the push; the transfer side knows nothing about
/// discovery.
///
pub struct DiscoveryService {
    socket: UdpSocket,
    local: Endpoint,
    declared_rate: usize,
    neighbors: Vec<Endpoint>,
    /// Per searched file: whether RESPONSE messages are still absorbed.
    /// Single map-wide lock; the critical sections are one boolean each.
    windows: Mutex<HashMap<String, bool>>,
    store: Arc<FileStore>,
    registry: Arc<LocationRegistry>,
    transfer: Arc<TransferService>,
}

impl DiscoveryService {
    ///
    /// Binds the datagram socket on every local interface. `local` is the
    /// endpoint this peer is known by in the registry file; its port may be
    /// 0 in tests, in which case the actually bound port replaces it.
    ///
    pub async fn bind(
        local: Endpoint,
        declared_rate: usize,
        neighbors: Vec<Endpoint>,
        store: Arc<FileStore>,
        registry: Arc<LocationRegistry>,
        transfer: Arc<TransferService>,
    ) -> Result<Arc<DiscoveryService>, anyhow::Error> {
        let socket = UdpSocket::bind(("0.0.0.0", local.port))
            .await
            .with_context(|| format!("could not bind the UDP socket on port {}", local.port))?;
        let local = Endpoint::new(
            local.host,
            socket
                .local_addr()
                .context("could not read the UDP socket address")?
                .port(),
        );

        info!("UDP discovery server listening on {}", local);
        Ok(Arc::new(DiscoveryService {
            socket,
            local,
            declared_rate,
            neighbors,
            windows: Mutex::new(HashMap::new()),
            store,
            registry,
            transfer,
        }))
    }

    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }

    ///
    /// Receives datagrams until the process dies. Each datagram is handled
    /// in its own task; the receive loop never waits on a handler.
    ///
    pub async fn run(self: Arc<Self>) {
        let mut buffer = [0u8; CONTROL_HEADER_BYTES];
        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((length, sender)) => {
                    let text = String::from_utf8_lossy(&buffer[..length]).into_owned();
                    let service = Arc::clone(&self);
                    tokio::spawn(async move {
                        service.handle_datagram(&text, sender).await;
                    });
                }
                Err(e) => error!("UDP receive failed: {}", e),
            }
        }
    }

    async fn handle_datagram(&self, text: &str, sender: SocketAddr) {
        match Datagram::parse(text) {
            Ok(Datagram::Discovery {
                file_name,
                total_chunks,
                ttl,
                origin,
            }) => {
                self.handle_discovery(&file_name, total_chunks, ttl, origin, sender)
                    .await;
            }
            Ok(Datagram::Response {
                file_name,
                declared_rate,
                chunk_ids,
            }) => {
                self.handle_response(&file_name, declared_rate, chunk_ids, sender)
                    .await;
            }
            Ok(Datagram::Request {
                file_name,
                stream_port,
                chunk_ids,
            }) => {
                self.handle_request(&file_name, stream_port, chunk_ids, sender)
                    .await;
            }
            Err(e) => error!("Dropping datagram from {}: {}", sender, e),
        }
    }

    ///
    /// A DISCOVERY flooded our way: advertise whatever we hold directly to
    /// the origin, then keep flooding while the TTL budget lasts. Our own
    /// flood coming back through a cycle is dropped silently.
    ///
    async fn handle_discovery(
        &self,
        file_name: &str,
        total_chunks: usize,
        ttl: u32,
        origin: Endpoint,
        sender: SocketAddr,
    ) {
        if origin == self.local {
            return;
        }

        info!(
            "DISCOVERY for '{}' (ttl {}) via {}, origin {}",
            file_name, ttl, sender, origin
        );

        self.advertise(file_name, &origin).await;

        if ttl > 0 {
            self.flood(file_name, total_chunks, ttl - 1, &origin).await;
        }
    }

    /// Sends a RESPONSE listing our chunks of the file straight to the
    /// origin, if we hold any.
    async fn advertise(&self, file_name: &str, origin: &Endpoint) {
        let chunk_ids = self.store.available_chunks(file_name).await;
        if chunk_ids.is_empty() {
            info!("No chunks of '{}' to advertise", file_name);
            return;
        }

        let response = Datagram::Response {
            file_name: file_name.to_string(),
            declared_rate: self.declared_rate,
            chunk_ids,
        };
        match self.send(origin, &response).await {
            Ok(_) => info!("Advertised to {} -> {}", origin, response),
            Err(e) => error!("Failed to send a RESPONSE to {}: {}", origin, e),
        }
    }

    ///
    /// Forwards a DISCOVERY to every neighbor in order, pausing between
    /// sends. The flood is not deduplicated per (file, origin); duplicate
    /// advertisements collapse in the registry.
    ///
    async fn flood(&self, file_name: &str, total_chunks: usize, ttl: u32, origin: &Endpoint) {
        let message = Datagram::Discovery {
            file_name: file_name.to_string(),
            total_chunks,
            ttl,
            origin: origin.clone(),
        };

        for neighbor in &self.neighbors {
            match self.send(neighbor, &message).await {
                Ok(_) => info!("DISCOVERY sent to {} -> {}", neighbor, message),
                Err(e) => error!("Failed to send a DISCOVERY to {}: {}", neighbor, e),
            }
            sleep(DISCOVERY_FANOUT_DELAY).await;
        }
    }

    ///
    /// A RESPONSE came back for one of our searches. Absorbed only while
    /// the file's response window is open; chunk ids we already hold are
    /// filtered out before the registry records the advertisement.
    ///
    async fn handle_response(
        &self,
        file_name: &str,
        declared_rate: usize,
        chunk_ids: Vec<u32>,
        sender: SocketAddr,
    ) {
        {
            let windows = self.windows.lock().await;
            if !windows.get(file_name).copied().unwrap_or(false) {
                info!(
                    "Late RESPONSE for '{}' from {} dropped, the response window is closed",
                    file_name, sender
                );
                return;
            }
        }

        let mut missing = Vec::new();
        for chunk_id in chunk_ids {
            if !self.store.has_chunk(file_name, chunk_id).await {
                missing.push(chunk_id);
            }
        }
        if missing.is_empty() {
            return;
        }

        let advertiser = Endpoint::from(sender);
        self.registry
            .record(file_name, &missing, advertiser.clone(), declared_rate)
            .await;
        info!(
            "Recorded {} advertised chunks of '{}' from {} at {} B/s",
            missing.len(),
            file_name,
            advertiser,
            declared_rate
        );
    }

    ///
    /// A REQUEST names chunks we should push. The destination is the direct
    /// sender's host at the stream port carried in the message.
    ///
    async fn handle_request(
        &self,
        file_name: &str,
        stream_port: u16,
        chunk_ids: Vec<u32>,
        sender: SocketAddr,
    ) {
        info!(
            "REQUEST from {} for {} chunks of '{}', pushing to stream port {}",
            sender,
            chunk_ids.len(),
            file_name,
            stream_port
        );
        self.transfer
            .send_chunks(&sender.ip().to_string(), stream_port, file_name, &chunk_ids)
            .await;
    }

    ///
    /// Origin side: opens the response window and floods the neighbors with
    /// the full TTL budget, naming ourselves as origin.
    ///
    pub async fn start_discovery(&self, file_name: &str, total_chunks: usize, initial_ttl: u32) {
        {
            let mut windows = self.windows.lock().await;
            windows.insert(file_name.to_string(), true);
        }
        self.flood(file_name, total_chunks, initial_ttl, &self.local)
            .await;
    }

    ///
    /// Origin side: sleeps out the response window, then closes it. Any
    /// RESPONSE arriving afterwards is dropped as late.
    ///
    pub async fn wait_responses(&self, file_name: &str) {
        sleep(RESPONSE_WINDOW).await;
        {
            let mut windows = self.windows.lock().await;
            windows.insert(file_name.to_string(), false);
        }
        info!("Response window closed for '{}'", file_name);
    }

    ///
    /// Origin side: runs the selector over a registry snapshot and sends
    /// one REQUEST per selected source, carrying our stream port.
    ///
    pub async fn emit_requests(&self, file_name: &str) {
        let Some(snapshot) = self.registry.snapshot(file_name).await else {
            return;
        };

        let assignment = selector::assign_sources(&snapshot);
        if assignment.is_empty() {
            warn!("No peer advertised any missing chunk of '{}'", file_name);
            return;
        }

        for (endpoint, chunk_ids) in assignment {
            let message = Datagram::Request {
                file_name: file_name.to_string(),
                stream_port: self.transfer.local_port(),
                chunk_ids,
            };
            match self.send(&endpoint, &message).await {
                Ok(_) => info!("REQUEST sent to {} -> {}", endpoint, message),
                Err(e) => error!("Failed to send a REQUEST to {}: {}", endpoint, e),
            }
        }
    }

    async fn send(&self, destination: &Endpoint, message: &Datagram) -> std::io::Result<usize> {
        self.socket
            .send_to(
                message.to_string().as_bytes(),
                (destination.host.as_str(), destination.port),
            )
            .await
    }
}
