use crate::events::EventSink;
use crate::peer::{now_secs, Peer};
use crate::protocol::{Announcement, BROADCAST_ADDR};
use crate::state::SharedState;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Presence discovery: one announcer loop broadcasting this host's identity
/// and one listener loop maintaining the known-peer set.
pub struct Discovery {
    state: SharedState,
    events: Arc<dyn EventSink>,
    port: u16,
    running: Arc<AtomicBool>,
}

impl Discovery {
    pub fn new(state: SharedState, events: Arc<dyn EventSink>, port: u16) -> Self {
        Self {
            state,
            events,
            port,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts the announcer and listener loops and returns immediately.
    /// Calling twice is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        self.spawn_announcer();
        self.spawn_listener();
    }

    /// Signals both loops to exit. Best-effort: an in-flight blocking
    /// receive is not interrupted; the loop exits on its next wakeup.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn spawn_announcer(&self) {
        let state = self.state.clone();
        let running = self.running.clone();
        let port = self.port;

        tokio::spawn(async move {
            let socket = match broadcast_socket() {
                Ok(s) => s,
                Err(e) => {
                    error!("failed to open broadcast socket: {e}");
                    return;
                }
            };
            let target = SocketAddr::from((BROADCAST_ADDR, port));
            let interval = state.settings.broadcast_interval;

            while running.load(Ordering::SeqCst) {
                let ann = Announcement::new(
                    state.local_ip.to_string(),
                    state.settings.nickname.clone(),
                    state.settings.avatar.clone(),
                );
                match serde_json::to_vec(&ann) {
                    Ok(data) => {
                        // Send failures are transient (interface down,
                        // no broadcast route); log and keep announcing.
                        if let Err(e) = socket.send_to(&data, target).await {
                            warn!("discovery broadcast failed: {e}");
                        }
                    }
                    Err(e) => warn!("failed to encode announcement: {e}"),
                }
                tokio::time::sleep(interval).await;
            }
            debug!("announcer loop exited");
        });
    }

    fn spawn_listener(&self) {
        let state = self.state.clone();
        let events = self.events.clone();
        let running = self.running.clone();
        let port = self.port;

        tokio::spawn(async move {
            let socket = match listener_socket(port) {
                Ok(s) => s,
                Err(e) => {
                    // Reported once; the announcer keeps running so this
                    // host stays visible to peers even if it cannot listen.
                    error!("error binding discovery port {port}: {e}");
                    return;
                }
            };

            let mut buf = [0u8; 2048];
            while running.load(Ordering::SeqCst) {
                match socket.recv_from(&mut buf).await {
                    Ok((len, _addr)) => {
                        if let Some(peer) = apply_announcement(&state, &buf[..len]) {
                            events.on_peer_found(&peer);
                        }
                    }
                    Err(e) => {
                        debug!("discovery recv error: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            debug!("discovery listener exited");
        });
    }
}

/// Decodes a datagram and upserts the peer set. Returns the peer on
/// success. Malformed or foreign-format datagrams and our own
/// announcements yield `None`; neither is an error.
fn apply_announcement(state: &SharedState, data: &[u8]) -> Option<Peer> {
    let ann: Announcement = match serde_json::from_slice(data) {
        Ok(a) => a,
        // Legacy-compatibility policy: other tools broadcast on this port.
        Err(_) => return None,
    };
    if ann.kind != Announcement::KIND {
        return None;
    }
    let ip = ann.ip.parse().ok()?;
    if ip == state.local_ip {
        return None;
    }

    let peer = Peer {
        ip,
        nickname: ann.nick,
        avatar: ann.avatar,
        last_seen: now_secs(),
    };
    state.add_peer(peer.clone());
    Some(peer)
}

fn broadcast_socket() -> std::io::Result<tokio::net::UdpSocket> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    tokio::net::UdpSocket::from_std(socket)
}

fn listener_socket(port: u16) -> std::io::Result<tokio::net::UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    tokio::net::UdpSocket::from_std(socket.into())
}
