use crate::peer::Peer;
use crate::settings::Settings;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Shared context owned by the process entry point and handed to every
/// component. All cross-worker state lives here behind its own mutex; there
/// are no module-level globals.
#[derive(Clone)]
pub struct SharedState {
    pub settings: Arc<Settings>,
    /// This host's identity, resolved once at startup.
    pub local_ip: IpAddr,
    /// Known peers, keyed by IP. Insert-or-replace on every announcement;
    /// entries are never evicted (last_seen lets callers filter).
    pub peers: Arc<Mutex<HashMap<IpAddr, Peer>>>,
    /// Outstanding screen-share requests we sent, keyed by target IP.
    pub pending_screen: Arc<Mutex<HashMap<IpAddr, Instant>>>,
    /// Last clipboard text observed, for echo/loop suppression.
    pub last_clipboard: Arc<Mutex<String>>,
}

impl SharedState {
    pub fn new(settings: Settings) -> Self {
        Self::with_local_ip(settings, crate::identity::local_ip())
    }

    pub fn with_local_ip(settings: Settings, local_ip: IpAddr) -> Self {
        Self {
            settings: Arc::new(settings),
            local_ip,
            peers: Arc::new(Mutex::new(HashMap::new())),
            pending_screen: Arc::new(Mutex::new(HashMap::new())),
            last_clipboard: Arc::new(Mutex::new(String::new())),
        }
    }

    pub fn add_peer(&self, peer: Peer) {
        let mut peers = self.peers.lock().unwrap();
        peers.insert(peer.ip, peer);
    }

    pub fn peers_snapshot(&self) -> HashMap<IpAddr, Peer> {
        let peers = self.peers.lock().unwrap();
        peers.clone()
    }
}
