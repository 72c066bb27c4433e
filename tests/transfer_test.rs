use chunknet::networking::transfer::TransferService;
use chunknet::storage::file_store::FileStore;
use chunknet::storage::location_registry::LocationRegistry;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::time::sleep;

const RATE: usize = 4096;

async fn transfer_node(
    base_dir: &Path,
    peer_id: u32,
) -> (Arc<TransferService>, Arc<FileStore>, Arc<LocationRegistry>) {
    let registry = Arc::new(LocationRegistry::new());
    let store = Arc::new(FileStore::new(base_dir, peer_id, registry.clone()));
    store.scan().await.unwrap();
    let service = TransferService::bind(0, RATE, store.clone()).await.unwrap();
    (service, store, registry)
}

async fn wait_for_file(path: &Path, wait: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + wait;
    while tokio::time::Instant::now() < deadline {
        if path.exists() {
            return true;
        }
        sleep(Duration::from_millis(200)).await;
    }
    path.exists()
}

/// Two chunks pushed over one connection: the receiver saves both, then
/// assembles the file and releases its registry entry.
#[tokio::test]
async fn test_chunk_push_saves_and_assembles() {
    let dir = tempdir().unwrap();

    // The sender (peer 1) holds both chunks on disk.
    let sender_dir = dir.path().join("1");
    std::fs::create_dir_all(&sender_dir).unwrap();
    std::fs::write(sender_dir.join("file.bin.ch0"), vec![0xAA; 1500]).unwrap();
    std::fs::write(sender_dir.join("file.bin.ch1"), b"tail").unwrap();

    let (sender, _, _) = transfer_node(dir.path(), 1).await;

    // The receiver (peer 2) starts empty and expects two chunks.
    let (receiver, receiver_store, receiver_registry) = transfer_node(dir.path(), 2).await;
    receiver_store.register_total("file.bin", 2).await;
    receiver_registry.begin("file.bin", 2).await;
    let receiver_port = receiver.local_port();
    tokio::spawn(receiver.run());

    sender
        .send_chunks("127.0.0.1", receiver_port, "file.bin", &[0, 1])
        .await;

    let output = dir.path().join("2").join("file.bin");
    assert!(wait_for_file(&output, Duration::from_secs(20)).await);

    let mut expected = vec![0xAA; 1500];
    expected.extend_from_slice(b"tail");
    assert_eq!(std::fs::read(&output).unwrap(), expected);

    assert!(receiver_store.has_chunk("file.bin", 0).await);
    assert!(receiver_store.has_chunk("file.bin", 1).await);
    assert!(receiver_registry.snapshot("file.bin").await.is_none());
}

/// A chunk the sender does not have is skipped; the rest of the batch still
/// goes through.
#[tokio::test]
async fn test_missing_chunk_is_skipped() {
    let dir = tempdir().unwrap();

    let sender_dir = dir.path().join("1");
    std::fs::create_dir_all(&sender_dir).unwrap();
    std::fs::write(sender_dir.join("file.bin.ch1"), b"only this one").unwrap();

    let (sender, _, _) = transfer_node(dir.path(), 1).await;
    let (receiver, receiver_store, _) = transfer_node(dir.path(), 2).await;
    let receiver_port = receiver.local_port();
    tokio::spawn(receiver.run());

    sender
        .send_chunks("127.0.0.1", receiver_port, "file.bin", &[0, 1])
        .await;

    let chunk = dir.path().join("2").join("file.bin.ch1");
    assert!(wait_for_file(&chunk, Duration::from_secs(20)).await);
    assert_eq!(std::fs::read(&chunk).unwrap(), b"only this one");
    assert!(!receiver_store.has_chunk("file.bin", 0).await);
}
