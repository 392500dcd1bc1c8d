//! Chunked image transfer over a dedicated TCP connection per transfer.
//!
//! The sender writes one `ImageMeta` frame followed by `ImageChunk` frames in
//! increasing index order. The receiver reassembles into a pre-sized buffer
//! and only touches the filesystem once every chunk has arrived; a connection
//! lost mid-transfer leaves no partial file behind.

use crate::{
    config::Settings,
    event::{ChatEvent, EventSender},
    network::protocol::{self, Message, HEADER_LEN},
    ChatError, Result,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Upper bound on a declared transfer size. The buffer is allocated up
/// front, so the length field must never be an instruction to allocate
/// whatever a remote peer asks for.
pub const MAX_IMAGE_SIZE: u64 = 256 * 1024 * 1024;

/// Receiver-side reassembly state for one transfer.
#[derive(Debug)]
pub struct TransferSession {
    id: Uuid,
    sender: String,
    file_name: String,
    total_size: u64,
    chunk_size: u32,
    total_chunks: u32,
    received: Vec<bool>,
    received_count: u32,
    buffer: Vec<u8>,
}

impl TransferSession {
    pub fn open(
        id: Uuid,
        sender: String,
        file_name: String,
        total_size: u64,
        chunk_size: u32,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(ChatError::TransferAborted(
                "zero chunk size in transfer header".to_string(),
            ));
        }
        if total_size > MAX_IMAGE_SIZE {
            return Err(ChatError::TransferAborted(format!(
                "declared size {} exceeds the {} byte transfer limit",
                total_size, MAX_IMAGE_SIZE
            )));
        }

        // Safe: total_size is capped well below u64::MAX - chunk_size.
        let total_chunks = (total_size + chunk_size as u64 - 1) / chunk_size as u64;

        Ok(Self {
            id,
            sender,
            file_name,
            total_size,
            chunk_size,
            total_chunks: total_chunks as u32,
            received: vec![false; total_chunks as usize],
            received_count: 0,
            buffer: vec![0u8; total_size as usize],
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Copies `data` to the offset implied by `index`. Duplicate indices,
    /// out-of-range indices and wrongly sized chunks are ignored without
    /// error; the buffer only ever grows by previously-unseen valid chunks.
    pub fn accept_chunk(&mut self, index: u32, data: &[u8]) -> bool {
        if index >= self.total_chunks {
            return false;
        }
        if self.received[index as usize] {
            return false;
        }

        let offset = index as u64 * self.chunk_size as u64;
        let expected = if index == self.total_chunks - 1 {
            self.total_size - offset
        } else {
            self.chunk_size as u64
        };
        if data.len() as u64 != expected {
            return false;
        }

        let start = offset as usize;
        self.buffer[start..start + data.len()].copy_from_slice(data);
        self.received[index as usize] = true;
        self.received_count += 1;
        true
    }

    pub fn is_complete(&self) -> bool {
        self.received_count == self.total_chunks
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

async fn write_frame(stream: &mut TcpStream, message: &Message) -> Result<()> {
    let frame = protocol::encode(message)?;
    stream.write_all(&frame).await?;
    Ok(())
}

async fn read_frame(stream: &mut TcpStream) -> Result<Message> {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).await?;
    let (_, len) = protocol::decode_header(&header)?;

    let mut frame = vec![0u8; HEADER_LEN + len];
    frame[..HEADER_LEN].copy_from_slice(&header);
    stream.read_exact(&mut frame[HEADER_LEN..]).await?;

    Ok(protocol::decode(&frame)?)
}

/// Folds connection-level failures into the transfer taxonomy.
fn into_abort(err: ChatError) -> ChatError {
    match err {
        ChatError::Io(e) => ChatError::TransferAborted(e.to_string()),
        other => other,
    }
}

/// Sends the file at `path` to the transfer listener at `addr`, in order,
/// over one connection. No resume: any failure means restarting from scratch.
pub async fn send_image(
    addr: SocketAddr,
    path: &Path,
    chunk_size: u32,
    sender: &str,
) -> Result<Uuid> {
    if chunk_size == 0 {
        return Err(ChatError::Config("chunk size must be nonzero".to_string()));
    }

    let data = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            ChatError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path has no file name",
            ))
        })?
        .to_string();

    let id = Uuid::new_v4();
    let total_size = data.len() as u64;
    if total_size > MAX_IMAGE_SIZE {
        return Err(ChatError::TransferAborted(format!(
            "{} is {} bytes, over the {} byte transfer limit",
            file_name, total_size, MAX_IMAGE_SIZE
        )));
    }

    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| ChatError::TransferAborted(format!("connect to {} failed: {}", addr, e)))?;

    write_frame(
        &mut stream,
        &Message::ImageMeta {
            id,
            sender: sender.to_string(),
            file_name: file_name.clone(),
            total_size,
            chunk_size,
        },
    )
    .await
    .map_err(into_abort)?;

    for (index, piece) in data.chunks(chunk_size as usize).enumerate() {
        write_frame(
            &mut stream,
            &Message::ImageChunk {
                id,
                index: index as u32,
                data: piece.to_vec(),
            },
        )
        .await
        .map_err(into_abort)?;
    }

    stream.shutdown().await.map_err(|e| {
        ChatError::TransferAborted(format!("connection lost finishing transfer: {}", e))
    })?;

    info!(
        "Sent {} ({} bytes) to {} as transfer {}",
        file_name, total_size, addr, id
    );
    Ok(id)
}

/// Accepts inbound transfer connections and reassembles images to disk.
pub struct TransferListener {
    listener: TcpListener,
    image_dir: PathBuf,
    events: EventSender,
}

impl TransferListener {
    pub async fn bind(settings: &Settings, events: EventSender) -> Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, settings.network.transfer_port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ChatError::Bind { addr, source })?;

        Ok(Self {
            listener,
            image_dir: settings.image_dir(),
            events,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn start(self, shutdown: &broadcast::Sender<()>) {
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = self.accept_loop() => {}
                _ = shutdown_rx.recv() => {
                    info!("Transfer listener shutdown requested");
                }
            }
        });
    }

    async fn accept_loop(&self) {
        match self.listener.local_addr() {
            Ok(addr) => info!("Transfer listener on {}", addr),
            Err(e) => warn!("Transfer listener local_addr unavailable: {}", e),
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("Inbound transfer connection from {}", peer);
                    let image_dir = self.image_dir.clone();
                    let events = self.events.clone();
                    tokio::spawn(async move {
                        handle_incoming(stream, peer, image_dir, events).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept transfer connection: {}", e);
                    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                }
            }
        }
    }
}

async fn handle_incoming(
    mut stream: TcpStream,
    peer: SocketAddr,
    image_dir: PathBuf,
    events: EventSender,
) {
    let (id, sender, file_name, total_size, chunk_size) = match read_frame(&mut stream).await {
        Ok(Message::ImageMeta {
            id,
            sender,
            file_name,
            total_size,
            chunk_size,
        }) => (id, sender, file_name, total_size, chunk_size),
        Ok(other) => {
            warn!(
                "Rejected transfer connection from {}: expected IMAGE_META, got {:?}",
                peer,
                other.kind()
            );
            return;
        }
        Err(e) => {
            // No header yet, so no sender to notify.
            warn!("Rejected transfer connection from {}: {}", peer, into_abort(e));
            return;
        }
    };

    let mut session = match TransferSession::open(id, sender.clone(), file_name, total_size, chunk_size)
    {
        Ok(session) => session,
        Err(e) => {
            let err = into_abort(e);
            warn!("Rejected transfer {} from {}: {}", id, sender, err);
            let _ = events.send(ChatEvent::TransferFailed {
                sender,
                reason: err.to_string(),
            });
            return;
        }
    };

    info!(
        "Receiving {} from {} ({} bytes, {} chunks)",
        session.file_name(),
        session.sender(),
        session.total_size(),
        session.total_chunks()
    );

    while !session.is_complete() {
        match read_frame(&mut stream).await {
            Ok(Message::ImageChunk { id, index, data }) if id == session.id() => {
                if !session.accept_chunk(index, &data) {
                    debug!("Ignoring chunk {} for transfer {}", index, id);
                }
            }
            Ok(other) => {
                debug!("Ignoring {:?} frame mid-transfer", other.kind());
            }
            Err(e) => {
                let err = into_abort(e);
                warn!(
                    "Transfer {} from {} failed: {}",
                    session.id(),
                    session.sender(),
                    err
                );
                let _ = events.send(ChatEvent::TransferFailed {
                    sender: session.sender().to_string(),
                    reason: err.to_string(),
                });
                return;
            }
        }
    }

    finalize(session, &image_dir, &events).await;
}

async fn finalize(session: TransferSession, image_dir: &Path, events: &EventSender) {
    let id = session.id();
    let sender = session.sender().to_string();

    let result: Result<PathBuf> = async {
        tokio::fs::create_dir_all(image_dir).await?;
        let path = save_path(image_dir, session.file_name());
        tokio::fs::write(&path, session.into_bytes()).await?;
        Ok(path)
    }
    .await;

    match result {
        Ok(path) => {
            info!("Transfer {} complete, saved {:?}", id, path);
            let _ = events.send(ChatEvent::ImageReceived { sender, path });
        }
        Err(e) => {
            error!("Failed to write image for transfer {}: {}", id, e);
            let _ = events.send(ChatEvent::TransferFailed {
                sender,
                reason: e.to_string(),
            });
        }
    }
}

/// Picks a destination inside `dir`, stripping path components from the
/// advertised name and suffixing duplicates.
fn save_path(dir: &Path, file_name: &str) -> PathBuf {
    let name = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image.bin");

    let mut path = dir.join(name);
    let mut counter = 1;
    while path.exists() {
        let stem = Path::new(name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image");
        let extension = Path::new(name)
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| format!(".{}", s))
            .unwrap_or_default();

        path = dir.join(format!("{} ({}){}", stem, counter, extension));
        counter += 1;
    }
    path
}
