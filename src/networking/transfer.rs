use crate::constants::{CONTROL_HEADER_BYTES, PACING_INTERVAL};
use crate::networking::messages::PutHeader;
use crate::storage::file_store::FileStore;
use anyhow::Context;
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;

///
/// The stream side of the protocol: a TCP server that accepts one-way PUT
/// pushes from other peers, and a client that pushes requested chunks out.
///
/// Transfer is push-only. The server never writes back to the sender; a
/// session ends when the sender closes the connection. Every send is paced:
/// slices of at most the local declared rate, one per pacing interval.
///
pub struct TransferService {
    listener: TcpListener,
    local_port: u16,
    declared_rate: usize,
    store: Arc<FileStore>,
}

impl TransferService {
    ///
    /// Binds the stream listener. `port` 0 picks an ephemeral port, which
    /// the tests rely on; production passes the derived stream port.
    ///
    pub async fn bind(
        port: u16,
        declared_rate: usize,
        store: Arc<FileStore>,
    ) -> Result<Arc<TransferService>, anyhow::Error> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("could not bind the TCP stream listener on port {}", port))?;
        let local_port = listener
            .local_addr()
            .context("could not read the TCP listener address")?
            .port();

        info!("TCP transfer server listening on port {}", local_port);
        Ok(Arc::new(TransferService {
            listener,
            local_port,
            declared_rate,
            store,
        }))
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    ///
    /// Accepts connections until the process dies. Every accepted connection
    /// is served from its own task.
    ///
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.listener.accept().await {
                Ok((stream, sender)) => {
                    let service = Arc::clone(&self);
                    tokio::spawn(async move {
                        service.receive_session(stream, sender).await;
                    });
                }
                Err(e) => error!("Failed to accept a chunk stream: {}", e),
            }
        }
    }

    ///
    /// One receive session: header, payload, save, repeat, until the sender
    /// closes the connection. Any error abandons the whole session.
    ///
    async fn receive_session(&self, mut stream: TcpStream, sender: SocketAddr) {
        loop {
            // The control header is exactly CONTROL_HEADER_BYTES on the
            // wire; a shorter read just means more is coming.
            let mut header = [0u8; CONTROL_HEADER_BYTES];
            let mut filled = 0;
            while filled < CONTROL_HEADER_BYTES {
                match stream.read(&mut header[filled..]).await {
                    Ok(0) if filled == 0 => {
                        info!("Chunk stream from {} closed", sender);
                        return;
                    }
                    Ok(0) => {
                        error!(
                            "Chunk stream from {} closed mid-header ({}/{} bytes)",
                            sender, filled, CONTROL_HEADER_BYTES
                        );
                        return;
                    }
                    Ok(received) => filled += received,
                    Err(e) => {
                        error!("Failed to read a control header from {}: {}", sender, e);
                        return;
                    }
                }
            }

            let put = match PutHeader::parse(&header) {
                Ok(put) => put,
                Err(e) => {
                    error!("Dropping chunk stream from {}: {}", sender, e);
                    return;
                }
            };
            info!(
                "Receiving chunk {} of '{}' ({} bytes) from {}",
                put.chunk_id, put.file_name, put.chunk_size, sender
            );

            // Payload arrives in slices no larger than the sender's declared
            // rate; whatever follows the declared size belongs to the next
            // header in the same session.
            let slice = put.declared_rate.max(1);
            let mut payload = vec![0u8; put.chunk_size];
            let mut received_total = 0;
            while received_total < put.chunk_size {
                let slice_end = (received_total + slice).min(put.chunk_size);
                match stream.read(&mut payload[received_total..slice_end]).await {
                    Ok(0) => {
                        error!(
                            "Chunk stream from {} closed mid-chunk ({}/{} bytes of chunk {})",
                            sender, received_total, put.chunk_size, put.chunk_id
                        );
                        return;
                    }
                    Ok(received) => received_total += received,
                    Err(e) => {
                        error!("Failed to receive chunk {} from {}: {}", put.chunk_id, sender, e);
                        return;
                    }
                }
            }

            match self
                .store
                .save_chunk(&put.file_name, put.chunk_id, &payload)
                .await
            {
                Ok(_) => info!(
                    "Chunk {} of '{}' received from {} and saved",
                    put.chunk_id, put.file_name, sender
                ),
                Err(e) => error!(
                    "Failed to save chunk {} of '{}': {}",
                    put.chunk_id, put.file_name, e
                ),
            }
        }
    }

    ///
    /// Pushes the listed chunks, in order, over one connection to the
    /// destination's stream port. Chunks missing on disk are skipped; a
    /// transport error abandons the rest of the batch. No retries either
    /// way: the requester simply ends up short and the file does not
    /// assemble on this run.
    ///
    pub async fn send_chunks(&self, host: &str, stream_port: u16, file_name: &str, chunk_ids: &[u32]) {
        let address = format!("{}:{}", host, stream_port);
        let mut stream = match TcpStream::connect(&address).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Could not connect to {} to push '{}': {}", address, file_name, e);
                return;
            }
        };

        for &chunk_id in chunk_ids {
            let path = self.store.chunk_path(file_name, chunk_id);
            let data = match fs::read(&path).await {
                Ok(data) => data,
                Err(e) => {
                    error!("Chunk {} of '{}' is not on disk: {}", chunk_id, file_name, e);
                    continue;
                }
            };

            let header = PutHeader {
                file_name: file_name.to_string(),
                chunk_id,
                declared_rate: self.declared_rate,
                chunk_size: data.len(),
            };

            if let Err(e) = self.paced_send(&mut stream, &header.encode()).await {
                error!("Failed to send the header for chunk {} to {}: {}", chunk_id, address, e);
                return;
            }
            if let Err(e) = self.paced_send(&mut stream, &data).await {
                error!("Failed to send chunk {} to {}: {}", chunk_id, address, e);
                return;
            }
            info!(
                "Chunk {} of '{}' ({} bytes) sent to {}",
                chunk_id, file_name, data.len(), address
            );
        }
    }

    /// Writes `data` in slices of at most the declared rate, sleeping the
    /// pacing interval after each slice.
    async fn paced_send(&self, stream: &mut TcpStream, data: &[u8]) -> std::io::Result<()> {
        let slice = self.declared_rate.max(1);
        let mut sent = 0;
        while sent < data.len() {
            let slice_end = (sent + slice).min(data.len());
            stream.write_all(&data[sent..slice_end]).await?;
            sent = slice_end;
            sleep(PACING_INTERVAL).await;
        }
        Ok(())
    }
}
