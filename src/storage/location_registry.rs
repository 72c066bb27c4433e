use crate::networking::endpoint::Endpoint;
use log::{error, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A single advertisement: some endpoint holds a chunk and promises to pace
/// its sends at `declared_rate` bytes per second.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkSource {
    pub endpoint: Endpoint,
    pub declared_rate: usize,
}

/// One table per searched file: position `c` holds every advertiser of chunk
/// `c`, at most once per endpoint.
type SourceTable = Vec<Vec<ChunkSource>>;

///
/// Aggregates RESPONSE advertisements per file and per chunk index, and
/// answers the selector with deep-copied snapshots.
///
/// Each file gets its own lazily created mutex, so inserts for different
/// files proceed in parallel while inserts and snapshots for the same file
/// serialize. The entry lives from the start of a search until the file is
/// assembled.
///
pub struct LocationRegistry {
    files: Mutex<HashMap<String, Arc<Mutex<SourceTable>>>>,
}

impl Default for LocationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationRegistry {
    pub fn new() -> LocationRegistry {
        LocationRegistry {
            files: Mutex::new(HashMap::new()),
        }
    }

    ///
    /// Prepares an empty table of `total_chunks` positions for a file about
    /// to be searched. Idempotent: an existing table is left untouched.
    ///
    pub async fn begin(&self, file_name: &str, total_chunks: usize) {
        let mut files = self.files.lock().await;
        files
            .entry(file_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(vec![Vec::new(); total_chunks])));
    }

    ///
    /// Records one advertisement at every listed chunk index. Out-of-range
    /// ids are logged and skipped; an endpoint already present at an index
    /// is skipped silently, which makes re-advertisements idempotent.
    ///
    pub async fn record(
        &self,
        file_name: &str,
        chunk_ids: &[u32],
        endpoint: Endpoint,
        declared_rate: usize,
    ) {
        let Some(table) = self.table(file_name).await else {
            warn!(
                "Dropping advertisement from {} for '{}': no active search for that file",
                endpoint, file_name
            );
            return;
        };

        let mut table = table.lock().await;
        for &chunk_id in chunk_ids {
            match table.get_mut(chunk_id as usize) {
                Some(sources) => {
                    let already_known = sources.iter().any(|source| source.endpoint == endpoint);
                    if !already_known {
                        sources.push(ChunkSource {
                            endpoint: endpoint.clone(),
                            declared_rate,
                        });
                    }
                }
                None => {
                    error!(
                        "chunk_id {} is out of range for file '{}'",
                        chunk_id, file_name
                    );
                }
            }
        }
    }

    /// Deep copy of the file's table, taken under its lock so the selector
    /// can run without holding it. `None` if no search is active.
    pub async fn snapshot(&self, file_name: &str) -> Option<SourceTable> {
        let table = self.table(file_name).await?;
        let table = table.lock().await;
        Some(table.clone())
    }

    /// Erases the file's table and its lock. Called once the file assembled.
    pub async fn discard(&self, file_name: &str) {
        let mut files = self.files.lock().await;
        files.remove(file_name);
    }

    async fn table(&self, file_name: &str) -> Option<Arc<Mutex<SourceTable>>> {
        let files = self.files.lock().await;
        files.get(file_name).cloned()
    }
}
