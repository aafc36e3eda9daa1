//! Serverless LAN sharing core: UDP broadcast peer discovery, a typed
//! framed messaging channel (chat, clipboard, screen negotiation) and a
//! chunked file/directory transfer engine.

pub mod discovery;
pub mod events;
pub mod identity;
pub mod messaging;
pub mod peer;
pub mod protocol;
pub mod screen;
pub mod settings;
pub mod state;
pub mod transfer;

pub use discovery::Discovery;
pub use events::{EventSink, NullSink};
pub use messaging::Messaging;
pub use peer::Peer;
pub use screen::{ScreenSessionManager, ScreenShare};
pub use settings::Settings;
pub use state::SharedState;
pub use transfer::FileTransfer;

use std::sync::Arc;

/// The three listener ports. Defaults match the wire protocol; tests bind
/// ephemeral ports instead.
#[derive(Debug, Clone, Copy)]
pub struct Ports {
    pub discovery: u16,
    pub messaging: u16,
    pub transfer: u16,
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            discovery: protocol::DISCOVERY_PORT,
            messaging: protocol::CHAT_PORT,
            transfer: protocol::FILE_PORT,
        }
    }
}

/// Composition root: owns the shared context and wires discovery,
/// messaging, transfer and the screen negotiator together.
pub struct Node {
    pub state: SharedState,
    pub discovery: Discovery,
    pub messaging: Messaging,
    pub transfer: FileTransfer,
    pub screen: Arc<ScreenShare>,
}

impl Node {
    pub fn new(
        settings: Settings,
        manager: Arc<dyn ScreenSessionManager>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self::with_ports(settings, Ports::default(), manager, events)
    }

    pub fn with_ports(
        settings: Settings,
        ports: Ports,
        manager: Arc<dyn ScreenSessionManager>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let state = SharedState::new(settings);
        let discovery = Discovery::new(state.clone(), events.clone(), ports.discovery);
        let messaging = Messaging::new(state.clone(), events.clone(), ports.messaging);
        let transfer = FileTransfer::new(state.clone(), events.clone(), ports.transfer);
        let screen = Arc::new(ScreenShare::new(
            state.clone(),
            messaging.clone(),
            manager,
            events,
        ));

        Self {
            state,
            discovery,
            messaging,
            transfer,
            screen,
        }
    }

    /// Starts discovery and both TCP listeners. Each component is started
    /// independently: a bind failure on one listener does not prevent the
    /// others from running. The first failure is returned to the caller.
    pub async fn start(&self) -> std::io::Result<()> {
        self.discovery.start();

        let mut first_err = None;
        if let Err(e) = self.messaging.start_listening(self.screen.clone()).await {
            tracing::error!("messaging listener failed to start: {e}");
            first_err = Some(e);
        }
        if let Err(e) = self.transfer.start_listening().await {
            tracing::error!("transfer listener failed to start: {e}");
            first_err.get_or_insert(e);
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Best-effort shutdown signal. Listener workers finish their current
    /// connections on their own.
    pub fn shutdown(&self) {
        self.discovery.stop();
    }
}
