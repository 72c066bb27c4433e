use crate::config::PeerSpec;
use crate::constants::SERVER_STARTUP_DELAY;
use crate::networking::discovery::DiscoveryService;
use crate::networking::endpoint::Endpoint;
use crate::networking::transfer::TransferService;
use crate::storage::file_store::FileStore;
use crate::storage::location_registry::LocationRegistry;
use futures::future::join_all;
use log::{error, info};
use std::path::Path;
use std::sync::Arc;
use tokio::time::sleep;

///
/// One running peer: wires the file store, the location registry and the
/// two servers together, and drives the discover → wait → select → request
/// sequence for every file this peer was asked to fetch.
///
pub struct Peer {
    id: u32,
    endpoint: Endpoint,
    store: Arc<FileStore>,
    registry: Arc<LocationRegistry>,
    discovery: Arc<DiscoveryService>,
    transfer: Arc<TransferService>,
}

impl Peer {
    ///
    /// Binds both servers. The UDP port comes from the peer's registry
    /// entry; the TCP stream port is derived from it by the fixed offset.
    ///
    pub async fn new(
        id: u32,
        spec: &PeerSpec,
        neighbors: Vec<Endpoint>,
        base_dir: &Path,
    ) -> Result<Peer, anyhow::Error> {
        let registry = Arc::new(LocationRegistry::new());
        let store = Arc::new(FileStore::new(base_dir, id, registry.clone()));

        let transfer = TransferService::bind(
            spec.endpoint.stream_port(),
            spec.declared_rate,
            store.clone(),
        )
        .await?;
        let discovery = DiscoveryService::bind(
            spec.endpoint.clone(),
            spec.declared_rate,
            neighbors,
            store.clone(),
            registry.clone(),
            transfer.clone(),
        )
        .await?;

        Ok(Peer {
            id,
            endpoint: spec.endpoint.clone(),
            store,
            registry,
            discovery,
            transfer,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn store(&self) -> &Arc<FileStore> {
        &self.store
    }

    ///
    /// Scans the chunks already on disk, spawns both accept loops, waits
    /// out the startup grace period, then searches every requested file
    /// concurrently. Returns once all searches ran to completion; the
    /// servers keep serving other peers until the process dies.
    ///
    pub async fn start(&self, file_names: &[String]) -> Result<(), anyhow::Error> {
        self.store.scan().await?;

        tokio::spawn(self.transfer.clone().run());
        tokio::spawn(self.discovery.clone().run());

        info!(
            "Peer {} up at {} (stream port {})",
            self.id,
            self.endpoint,
            self.transfer.local_port()
        );

        sleep(SERVER_STARTUP_DELAY).await;

        let searches = file_names.iter().map(|file_name| self.search_file(file_name));
        join_all(searches).await;
        Ok(())
    }

    ///
    /// One file search: metadata, then either immediate assembly (we held
    /// everything already, nothing goes on the wire) or the full discover →
    /// wait → request round. Completion of the transfer is not awaited
    /// anywhere; chunks stream in through the transfer server and the file
    /// assembles whenever the last one lands.
    ///
    async fn search_file(&self, file_name: &str) {
        let Some(metadata) = self.store.load_metadata(file_name).await else {
            error!("Abandoning the search for '{}'", file_name);
            return;
        };
        let file_name = metadata.file_name.as_str();

        self.store
            .register_total(file_name, metadata.total_chunks)
            .await;
        self.registry.begin(file_name, metadata.total_chunks).await;

        match self.store.try_assemble(file_name).await {
            Ok(true) => {
                info!(
                    "Peer {} already held every chunk of '{}', skipping discovery",
                    self.id, file_name
                );
                return;
            }
            Ok(false) => {}
            Err(e) => {
                error!("Could not probe assembly of '{}': {}", file_name, e);
                return;
            }
        }

        self.discovery
            .start_discovery(file_name, metadata.total_chunks, metadata.initial_ttl)
            .await;
        self.discovery.wait_responses(file_name).await;
        self.discovery.emit_requests(file_name).await;
    }
}
