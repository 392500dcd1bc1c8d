use crate::{
    config::Settings,
    event::{ChatEvent, EventSender},
    network::protocol::{self, Message},
    network::registry::Registry,
    ChatError, Result,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Presence protocol state machine. Owns the broadcast discovery socket and
/// the unicast whois socket; all registry mutation happens here.
pub struct DiscoveryService {
    settings: Arc<Settings>,
    registry: Registry,
    events: EventSender,
    socket: Arc<UdpSocket>,
    whois_socket: Arc<UdpSocket>,
}

impl DiscoveryService {
    /// Binds both sockets. A port already in use is fatal and surfaces here,
    /// before any loop starts.
    pub async fn bind(
        settings: Arc<Settings>,
        registry: Registry,
        events: EventSender,
    ) -> Result<Self> {
        let socket = Self::bind_udp(settings.network.discovery_port).await?;
        socket.set_broadcast(true)?;
        let whois_socket = Self::bind_udp(settings.network.whois_port).await?;

        Ok(Self {
            settings,
            registry,
            events,
            socket: Arc::new(socket),
            whois_socket: Arc::new(whois_socket),
        })
    }

    async fn bind_udp(port: u16) -> Result<UdpSocket> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        UdpSocket::bind(addr)
            .await
            .map_err(|source| ChatError::Bind { addr, source })
    }

    /// Spawns the two receive loops. Each terminates when the shutdown
    /// channel fires; closing the pending recv unblocks immediately.
    pub fn start(self: Arc<Self>, shutdown: &broadcast::Sender<()>) {
        let service = self.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                result = service.discovery_loop() => {
                    if let Err(e) = result {
                        error!("Discovery loop error: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Discovery loop shutdown requested");
                }
            }
        });

        let service = self;
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                result = service.whois_loop() => {
                    if let Err(e) = result {
                        error!("Whois loop error: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Whois loop shutdown requested");
                }
            }
        });
    }

    /// Effective address of the discovery socket (useful with port 0).
    pub fn discovery_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn whois_addr(&self) -> Result<SocketAddr> {
        Ok(self.whois_socket.local_addr()?)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    async fn discovery_loop(&self) -> Result<()> {
        info!("Discovery listening on {}", self.socket.local_addr()?);
        let mut buf = vec![0u8; self.settings.network.buffer_size];

        loop {
            // Transient receive errors (e.g. WSAECONNRESET after a unicast
            // to a departed peer) must not kill the presence loop.
            let (len, origin) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("Discovery receive error: {}", e);
                    continue;
                }
            };
            match protocol::decode(&buf[..len]) {
                Ok(message) => self.handle_discovery(message, origin).await,
                Err(e) => warn!("Dropping malformed datagram from {}: {}", origin, e),
            }
        }
    }

    /// Dispatch for the discovery port. Must stay fast and non-blocking:
    /// this runs on the single receive path.
    async fn handle_discovery(&self, message: Message, origin: SocketAddr) {
        match message {
            Message::Join { name } => {
                // Our own broadcasts loop back; never register ourselves.
                if name == self.settings.user.handle {
                    return;
                }
                if self.registry.upsert(&name, origin).await {
                    info!("{} joined from {}", name, origin);
                    let _ = self.events.send(ChatEvent::PeerJoined(name));
                }
            }
            Message::Leave { name } => {
                if name == self.settings.user.handle {
                    return;
                }
                if self.registry.remove(&name).await {
                    info!("{} left the chat", name);
                    let _ = self.events.send(ChatEvent::PeerLeft(name));
                }
            }
            Message::Who => {
                // Re-announce straight to the asker so a peer starting with
                // an empty registry fills it without waiting for broadcast
                // traffic.
                debug!("WHO from {}", origin);
                let announce = Message::Join {
                    name: self.settings.user.handle.clone(),
                };
                if let Err(e) = self.send_direct(origin, &announce).await {
                    warn!("Failed to answer WHO from {}: {}", origin, e);
                }
            }
            Message::Chat { sender, text } => {
                debug!("Chat from {} ({})", sender, origin);
                let _ = self
                    .events
                    .send(ChatEvent::MessageReceived { sender, text });
            }
            other => {
                debug!("Ignoring {:?} on discovery port", other.kind());
            }
        }
    }

    async fn whois_loop(&self) -> Result<()> {
        info!("Whois listening on {}", self.whois_socket.local_addr()?);
        let mut buf = vec![0u8; self.settings.network.buffer_size];

        loop {
            let (len, origin) = match self.whois_socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("Whois receive error: {}", e);
                    continue;
                }
            };
            match protocol::decode(&buf[..len]) {
                Ok(Message::Whois { name }) => match self.registry.lookup(&name).await {
                    Some(addr) => {
                        let reply = Message::WhoisReply { name, addr };
                        if let Err(e) = self.send_whois_reply(origin, &reply).await {
                            warn!("Failed to answer WHOIS from {}: {}", origin, e);
                        }
                    }
                    // Unknown name: stay silent, the requester's deadline
                    // turns that into NotFound.
                    None => debug!("WHOIS for unknown {} from {}", name, origin),
                },
                Ok(other) => debug!("Ignoring {:?} on whois port", other.kind()),
                Err(e) => warn!("Dropping malformed whois datagram from {}: {}", origin, e),
            }
        }
    }

    async fn send_whois_reply(&self, origin: SocketAddr, reply: &Message) -> Result<()> {
        let frame = protocol::encode(reply)?;
        self.whois_socket.send_to(&frame, origin).await?;
        Ok(())
    }

    /// Announces this participant to the broadcast domain.
    pub async fn send_join(&self) -> Result<()> {
        self.broadcast(&Message::Join {
            name: self.settings.user.handle.clone(),
        })
        .await
    }

    /// Graceful departure. A peer that crashes without this stays in other
    /// registries until overwritten.
    pub async fn send_leave(&self) -> Result<()> {
        self.broadcast(&Message::Leave {
            name: self.settings.user.handle.clone(),
        })
        .await
    }

    /// Asks every peer to re-announce itself to us.
    pub async fn send_who(&self) -> Result<()> {
        self.broadcast(&Message::Who).await
    }

    async fn broadcast(&self, message: &Message) -> Result<()> {
        let target = SocketAddr::new(
            self.settings.network.broadcast_addr,
            self.settings.network.discovery_port,
        );
        let frame = protocol::encode(message)?;
        self.socket.send_to(&frame, target).await?;
        debug!("Broadcast {:?} to {}", message.kind(), target);
        Ok(())
    }

    /// Unicasts any message from the discovery socket.
    pub async fn send_direct(&self, addr: SocketAddr, message: &Message) -> Result<()> {
        let frame = protocol::encode(message)?;
        self.socket.send_to(&frame, addr).await?;
        Ok(())
    }

    /// Sends a text message to a participant known to the registry.
    pub async fn send_chat(&self, recipient: &str, text: &str) -> Result<()> {
        let addr = self
            .registry
            .lookup(recipient)
            .await
            .ok_or_else(|| ChatError::NotFound(recipient.to_string()))?;

        self.send_direct(
            addr,
            &Message::Chat {
                sender: self.settings.user.handle.clone(),
                text: text.to_string(),
            },
        )
        .await
    }

    /// Resolves `name` by asking the whois service at `target` directly.
    /// No reply within `deadline` means the name is unknown there.
    pub async fn whois(
        &self,
        target: SocketAddr,
        name: &str,
        deadline: Duration,
    ) -> Result<SocketAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        let query = Message::Whois {
            name: name.to_string(),
        };
        socket.send_to(&protocol::encode(&query)?, target).await?;

        let mut buf = vec![0u8; self.settings.network.buffer_size];
        let expires = tokio::time::Instant::now() + deadline;
        loop {
            let remaining = expires.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(ChatError::NotFound(name.to_string()));
            }
            match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
                Ok(Ok((len, origin))) => match protocol::decode(&buf[..len]) {
                    Ok(Message::WhoisReply { name: reply_name, addr }) if reply_name == name => {
                        // A reply is protocol-derived truth, refresh the cache.
                        self.registry.upsert(name, addr).await;
                        return Ok(addr);
                    }
                    // Anything else on this socket is noise, the answer may
                    // still arrive before the deadline.
                    _ => debug!("Ignoring stray datagram from {} while resolving {}", origin, name),
                },
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(ChatError::NotFound(name.to_string())),
            }
        }
    }
}
