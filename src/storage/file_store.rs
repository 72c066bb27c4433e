use crate::constants::{CHUNK_SUFFIX, METADATA_EXTENSION};
use crate::storage::location_registry::LocationRegistry;
use log::{error, info};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("chunk storage I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Contents of a `<file_name>.p2p` sidecar: the authoritative file name, the
/// number of chunks the full file splits into, and the hop budget for the
/// discovery flood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub file_name: String,
    pub total_chunks: usize,
    pub initial_ttl: u32,
}

/// Per-file state under the per-file lock: which chunk ids this peer holds
/// on disk, and how many the complete file needs (known once the metadata
/// sidecar was read).
struct ChunkSet {
    held: BTreeSet<u32>,
    total_chunks: Option<usize>,
}

impl ChunkSet {
    fn new() -> ChunkSet {
        ChunkSet {
            held: BTreeSet::new(),
            total_chunks: None,
        }
    }
}

///
/// Owns every chunk byte on disk for this peer: enumerates chunks present at
/// startup, persists received ones, and concatenates the full file once all
/// chunks are held.
///
/// All chunk-set reads and writes for one file serialize on that file's
/// mutex; saving a chunk and attempting assembly happen under one lock
/// acquisition, so the completeness check and the concatenation are a single
/// logical step. Operations on different files do not contend.
///
pub struct FileStore {
    base_dir: PathBuf,
    peer_dir: PathBuf,
    registry: Arc<LocationRegistry>,
    files: Mutex<HashMap<String, Arc<Mutex<ChunkSet>>>>,
}

/// Splits `<name>.ch<digits>` into the file name and the chunk id. Anything
/// else is not a chunk file.
fn parse_chunk_file_name(name: &str) -> Option<(&str, u32)> {
    let pos = name.rfind(CHUNK_SUFFIX)?;
    let file_name = &name[..pos];
    let id_digits = &name[pos + CHUNK_SUFFIX.len()..];
    if file_name.is_empty() || id_digits.is_empty() {
        return None;
    }
    if !id_digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    Some((file_name, id_digits.parse().ok()?))
}

impl FileStore {
    pub fn new(base_dir: &Path, peer_id: u32, registry: Arc<LocationRegistry>) -> FileStore {
        FileStore {
            base_dir: base_dir.to_path_buf(),
            peer_dir: base_dir.join(peer_id.to_string()),
            registry,
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Path of one chunk file inside this peer's directory.
    pub fn chunk_path(&self, file_name: &str, chunk_id: u32) -> PathBuf {
        self.peer_dir
            .join(format!("{}{}{}", file_name, CHUNK_SUFFIX, chunk_id))
    }

    /// Path the assembled file is written to.
    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.peer_dir.join(file_name)
    }

    ///
    /// Populates the local chunk sets from the files already present in the
    /// peer directory, creating the directory if needed. Any file matching
    /// the chunk naming template is assumed to be a valid chunk.
    ///
    pub async fn scan(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.peer_dir).await?;

        let mut entries = fs::read_dir(&self.peer_dir).await?;
        while let Some(dir_entry) = entries.next_entry().await? {
            let os_name = dir_entry.file_name();
            let Some(name) = os_name.to_str() else {
                continue;
            };
            if let Some((file_name, chunk_id)) = parse_chunk_file_name(name) {
                let entry = self.entry(file_name).await;
                entry.lock().await.held.insert(chunk_id);
            }
        }
        Ok(())
    }

    ///
    /// Reads the `<file_name>.p2p` sidecar from the base directory. `None`
    /// means the sidecar is missing or malformed and the search for this
    /// file must be abandoned.
    ///
    pub async fn load_metadata(&self, file_name: &str) -> Option<FileMetadata> {
        let path = self
            .base_dir
            .join(format!("{}.{}", file_name, METADATA_EXTENSION));

        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) => {
                error!(
                    "Could not read the metadata sidecar {:?} for '{}': {}",
                    path, file_name, e
                );
                return None;
            }
        };

        let mut tokens = contents.split_whitespace();
        let metadata = (|| {
            Some(FileMetadata {
                file_name: tokens.next()?.to_string(),
                total_chunks: tokens.next()?.parse().ok()?,
                initial_ttl: tokens.next()?.parse().ok()?,
            })
        })();

        if metadata.is_none() {
            error!(
                "Metadata sidecar {:?} is malformed, expected '<name> <total_chunks> <ttl>'",
                path
            );
        }
        metadata
    }

    /// Records how many chunks the complete file needs, as loaded from its
    /// metadata sidecar.
    pub async fn register_total(&self, file_name: &str, total_chunks: usize) {
        let entry = self.entry(file_name).await;
        entry.lock().await.total_chunks = Some(total_chunks);
    }

    /// Sorted snapshot of the chunk ids this peer holds for a file.
    pub async fn available_chunks(&self, file_name: &str) -> Vec<u32> {
        let entry = self.entry(file_name).await;
        let chunks = entry.lock().await;
        chunks.held.iter().copied().collect()
    }

    pub async fn has_chunk(&self, file_name: &str, chunk_id: u32) -> bool {
        let entry = self.entry(file_name).await;
        let chunks = entry.lock().await;
        chunks.held.contains(&chunk_id)
    }

    ///
    /// Writes one received chunk to disk, marks it as held, and attempts
    /// assembly, all under the file's lock. Returns whether the file just
    /// assembled.
    ///
    pub async fn save_chunk(
        &self,
        file_name: &str,
        chunk_id: u32,
        data: &[u8],
    ) -> Result<bool, StoreError> {
        let entry = self.entry(file_name).await;
        let mut chunks = entry.lock().await;

        fs::write(self.chunk_path(file_name, chunk_id), data).await?;
        chunks.held.insert(chunk_id);

        self.assemble_locked(file_name, &chunks).await
    }

    ///
    /// Concatenates the chunk files into the final output if every id in
    /// `[0, total_chunks)` is held. Returns whether the file assembled.
    ///
    pub async fn try_assemble(&self, file_name: &str) -> Result<bool, StoreError> {
        let entry = self.entry(file_name).await;
        let chunks = entry.lock().await;
        self.assemble_locked(file_name, &chunks).await
    }

    async fn assemble_locked(
        &self,
        file_name: &str,
        chunks: &ChunkSet,
    ) -> Result<bool, StoreError> {
        let Some(total_chunks) = chunks.total_chunks else {
            return Ok(false);
        };
        let complete = (0..total_chunks).all(|chunk_id| chunks.held.contains(&(chunk_id as u32)));
        if !complete {
            return Ok(false);
        }

        let output_path = self.output_path(file_name);
        let mut output = fs::File::create(&output_path).await?;
        for chunk_id in 0..total_chunks {
            let data = fs::read(self.chunk_path(file_name, chunk_id as u32)).await?;
            output.write_all(&data).await?;
        }
        output.flush().await?;

        info!("File '{}' assembled at {:?}", file_name, output_path);
        self.registry.discard(file_name).await;
        Ok(true)
    }

    /// Lazily creates and returns the per-file lock. The outer map lock is
    /// held only for the lookup.
    async fn entry(&self, file_name: &str) -> Arc<Mutex<ChunkSet>> {
        let mut files = self.files.lock().await;
        files
            .entry(file_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ChunkSet::new())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &Path) -> FileStore {
        FileStore::new(dir, 1, Arc::new(LocationRegistry::new()))
    }

    #[test]
    fn test_parse_chunk_file_name() {
        assert_eq!(parse_chunk_file_name("movie.bin.ch7"), Some(("movie.bin", 7)));
        assert_eq!(parse_chunk_file_name("a.ch10"), Some(("a", 10)));
        assert_eq!(parse_chunk_file_name("movie.bin"), None);
        assert_eq!(parse_chunk_file_name("movie.ch"), None);
        assert_eq!(parse_chunk_file_name("movie.chx1"), None);
        assert_eq!(parse_chunk_file_name(".ch3"), None);
    }

    #[tokio::test]
    async fn test_scan_picks_up_existing_chunks() {
        let dir = tempdir().unwrap();
        let peer_dir = dir.path().join("1");
        std::fs::create_dir_all(&peer_dir).unwrap();
        std::fs::write(peer_dir.join("movie.bin.ch0"), b"aa").unwrap();
        std::fs::write(peer_dir.join("movie.bin.ch2"), b"bb").unwrap();
        std::fs::write(peer_dir.join("notes.txt"), b"not a chunk").unwrap();

        let store = store_in(dir.path());
        store.scan().await.unwrap();

        assert_eq!(store.available_chunks("movie.bin").await, vec![0, 2]);
        assert!(store.has_chunk("movie.bin", 2).await);
        assert!(!store.has_chunk("movie.bin", 1).await);
    }

    #[tokio::test]
    async fn test_scan_creates_the_peer_directory() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.scan().await.unwrap();
        assert!(dir.path().join("1").is_dir());
    }

    #[tokio::test]
    async fn test_save_chunk_persists_exact_bytes() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.scan().await.unwrap();

        let assembled = store.save_chunk("movie.bin", 3, b"payload").await.unwrap();
        assert!(!assembled);
        assert!(store.has_chunk("movie.bin", 3).await);

        let on_disk = std::fs::read(dir.path().join("1").join("movie.bin.ch3")).unwrap();
        assert_eq!(on_disk, b"payload");
    }

    #[tokio::test]
    async fn test_assembly_concatenates_in_chunk_order() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.scan().await.unwrap();
        store.register_total("movie.bin", 3).await;

        assert!(!store.save_chunk("movie.bin", 1, b"BBB").await.unwrap());
        assert!(!store.save_chunk("movie.bin", 0, b"AA").await.unwrap());
        assert!(store.save_chunk("movie.bin", 2, b"C").await.unwrap());

        let assembled = std::fs::read(dir.path().join("1").join("movie.bin")).unwrap();
        assert_eq!(assembled, b"AABBBC");
    }

    #[tokio::test]
    async fn test_assembly_releases_the_registry_entry() {
        let dir = tempdir().unwrap();
        let registry = Arc::new(LocationRegistry::new());
        let store = FileStore::new(dir.path(), 1, registry.clone());
        store.scan().await.unwrap();

        registry.begin("movie.bin", 1).await;
        store.register_total("movie.bin", 1).await;
        assert!(store.save_chunk("movie.bin", 0, b"X").await.unwrap());

        assert!(registry.snapshot("movie.bin").await.is_none());
    }

    #[tokio::test]
    async fn test_try_assemble_without_total_or_chunks_is_false() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.scan().await.unwrap();

        // Total unknown yet.
        assert!(!store.try_assemble("movie.bin").await.unwrap());

        // Total known but a chunk is missing.
        store.register_total("movie.bin", 2).await;
        store.save_chunk("movie.bin", 0, b"A").await.unwrap();
        assert!(!store.try_assemble("movie.bin").await.unwrap());
        assert!(!dir.path().join("1").join("movie.bin").exists());
    }

    #[tokio::test]
    async fn test_load_metadata_reads_three_tokens() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("movie.bin.p2p"), "movie.bin 12 3\n").unwrap();

        let store = store_in(dir.path());
        let metadata = store.load_metadata("movie.bin").await.unwrap();
        assert_eq!(
            metadata,
            FileMetadata {
                file_name: "movie.bin".to_string(),
                total_chunks: 12,
                initial_ttl: 3,
            }
        );
    }

    #[tokio::test]
    async fn test_load_metadata_missing_or_malformed_is_none() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());

        assert!(store.load_metadata("absent.bin").await.is_none());

        std::fs::write(dir.path().join("bad.bin.p2p"), "bad.bin twelve 3").unwrap();
        assert!(store.load_metadata("bad.bin").await.is_none());

        std::fs::write(dir.path().join("short.bin.p2p"), "short.bin 12").unwrap();
        assert!(store.load_metadata("short.bin").await.is_none());
    }
}
