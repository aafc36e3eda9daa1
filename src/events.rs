use crate::peer::Peer;
use crate::protocol::ScreenControl;
use std::net::IpAddr;

/// Observer interface for everything the core reports upward. Components
/// depend on this trait, never on bound closures. Implementations are
/// called from listener tasks and must not block.
#[allow(unused_variables)]
pub trait EventSink: Send + Sync {
    /// A peer announced itself (new or refreshed).
    fn on_peer_found(&self, peer: &Peer) {}

    /// Chat text arrived from `sender`.
    fn on_message(&self, sender: IpAddr, text: &str) {}

    /// Clipboard text arrived from `sender` (already gated on the
    /// clipboard-share setting and the echo guard).
    fn on_clipboard(&self, sender: IpAddr, text: &str) {}

    /// A peer asked to view this host's screen. The decision layer answers
    /// via the negotiator's accept/reject calls.
    fn on_screen_request(&self, peer: IpAddr, info: &ScreenControl) {}

    /// Cumulative transfer progress, fired after every chunk.
    fn on_progress(&self, filename: &str, transferred: u64, total: u64) {}

    /// Human-readable status line, the only user-visible failure surface.
    fn on_status(&self, message: &str) {}
}

/// Sink that drops everything. Useful for send-only setups and tests.
pub struct NullSink;

impl EventSink for NullSink {}
