use crate::{
    config::Settings,
    event::EventReceiver,
    network::{DiscoveryService, Registry},
    service::transfer::{self, TransferListener},
    ChatError, Result,
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use uuid::Uuid;

/// Wires the registry, discovery service and transfer listener together and
/// owns their shutdown channel. Front-ends drive everything through this.
pub struct ChatDaemon {
    settings: Arc<Settings>,
    discovery: Arc<DiscoveryService>,
    transfer: Option<TransferListener>,
    transfer_addr: SocketAddr,
    events_rx: Option<EventReceiver>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ChatDaemon {
    /// Binds every socket up front; a port already in use fails here, before
    /// any loop starts.
    pub async fn new(settings: Settings) -> Result<Self> {
        let settings = Arc::new(settings);
        let (shutdown_tx, _) = broadcast::channel(1);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let registry = Registry::new();
        let discovery = Arc::new(
            DiscoveryService::bind(settings.clone(), registry, events_tx.clone()).await?,
        );
        let transfer = TransferListener::bind(&settings, events_tx).await?;
        let transfer_addr = transfer.local_addr()?;

        Ok(Self {
            settings,
            discovery,
            transfer: Some(transfer),
            transfer_addr,
            events_rx: Some(events_rx),
            shutdown_tx,
        })
    }

    /// Hands the notification channel to the consuming layer. Can only be
    /// taken once.
    pub fn take_events(&mut self) -> Option<EventReceiver> {
        self.events_rx.take()
    }

    /// Spawns the discovery, whois and transfer loops.
    pub fn start(&mut self) {
        info!("Starting chat daemon as '{}'", self.settings.user.handle);
        self.discovery.clone().start(&self.shutdown_tx);
        if let Some(listener) = self.transfer.take() {
            listener.start(&self.shutdown_tx);
        }
    }

    /// Closes the sockets via the shutdown channel. In-flight transfer
    /// sessions are abandoned, not drained.
    pub fn shutdown(&self) {
        info!("Shutting down chat daemon");
        let _ = self.shutdown_tx.send(());
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Registry {
        self.discovery.registry()
    }

    pub fn discovery(&self) -> &DiscoveryService {
        &self.discovery
    }

    /// Effective transfer listener address (useful with port 0).
    pub fn transfer_addr(&self) -> SocketAddr {
        self.transfer_addr
    }

    /// Sends an image to a known participant. The peer's transfer listener
    /// is assumed on the configured transfer port at the peer's address.
    pub async fn send_image(&self, recipient: &str, path: &Path) -> Result<Uuid> {
        let peer = self
            .registry()
            .lookup(recipient)
            .await
            .ok_or_else(|| ChatError::NotFound(recipient.to_string()))?;

        let target = SocketAddr::new(peer.ip(), self.settings.network.transfer_port);
        self.send_image_to(target, path).await
    }

    /// Sends an image straight to a transfer listener address.
    pub async fn send_image_to(&self, target: SocketAddr, path: &Path) -> Result<Uuid> {
        transfer::send_image(
            target,
            path,
            self.settings.transfer.chunk_size,
            &self.settings.user.handle,
        )
        .await
    }
}
