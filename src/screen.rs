use crate::events::EventSink;
use crate::messaging::{ControlHandler, Messaging};
use crate::protocol::{FrameKind, ScreenControl, SCREEN_PORT};
use crate::state::SharedState;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The external screen-session manager this core drives. Capture, viewing
/// and the streaming transport behind them live outside this crate.
pub trait ScreenSessionManager: Send + Sync {
    /// Starts the local capture server. Returns false if it could not start.
    fn start_capture_server(&self) -> bool;
    fn stop_capture_server(&self);
    /// Connects a viewer to a peer's capture server.
    fn connect_viewer(&self, ip: IpAddr, port: u16);
    fn disconnect_viewer(&self);
}

/// Turns REQUEST/ACCEPT/REJECT control messages into session-manager
/// calls. One pending entry per peer IP, created when a request is sent
/// and removed on accept or reject; a request that never gets an answer
/// stays pending indefinitely.
pub struct ScreenShare {
    state: SharedState,
    messaging: Messaging,
    manager: Arc<dyn ScreenSessionManager>,
    events: Arc<dyn EventSink>,
}

impl ScreenShare {
    pub fn new(
        state: SharedState,
        messaging: Messaging,
        manager: Arc<dyn ScreenSessionManager>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            state,
            messaging,
            manager,
            events,
        }
    }

    /// Asks to view the target's screen. On a successful send the request
    /// is recorded as pending until the peer answers.
    pub async fn request_screen(&self, target: IpAddr) -> bool {
        let control = ScreenControl {
            ip: self.state.local_ip.to_string(),
            port: Some(SCREEN_PORT),
            action: "request".to_string(),
        };
        match self
            .messaging
            .send_control(target, FrameKind::ScreenRequest, &control)
            .await
        {
            Ok(()) => {
                self.state
                    .pending_screen
                    .lock()
                    .unwrap()
                    .insert(target, Instant::now());
                self.events
                    .on_status(&format!("Screen request sent to {target}"));
                true
            }
            Err(e) => {
                warn!("error sending screen request to {target}: {e}");
                false
            }
        }
    }

    /// Accepts a request from `target`: the capture server is started
    /// first, and the accept goes out only once it is up. If the server
    /// cannot start, the requester gets a reject instead of silence.
    pub async fn accept_request(&self, target: IpAddr) -> bool {
        if !self.manager.start_capture_server() {
            warn!("capture server failed to start, rejecting {target}");
            let _ = self.reject_request(target).await;
            return false;
        }

        let control = ScreenControl {
            ip: self.state.local_ip.to_string(),
            port: Some(SCREEN_PORT),
            action: "accept".to_string(),
        };
        match self
            .messaging
            .send_control(target, FrameKind::ScreenAccept, &control)
            .await
        {
            Ok(()) => {
                self.events
                    .on_status(&format!("Sharing screen with {target}"));
                true
            }
            Err(e) => {
                warn!("error sending screen accept to {target}: {e}");
                self.manager.stop_capture_server();
                false
            }
        }
    }

    /// Declines a request from `target`.
    pub async fn reject_request(&self, target: IpAddr) -> bool {
        let control = ScreenControl {
            ip: self.state.local_ip.to_string(),
            port: None,
            action: "reject".to_string(),
        };
        self.messaging
            .send_control(target, FrameKind::ScreenReject, &control)
            .await
            .is_ok()
    }
}

impl ControlHandler for ScreenShare {
    fn on_control(&self, kind: FrameKind, sender: IpAddr, payload: &[u8]) {
        let control: ScreenControl = match serde_json::from_slice(payload) {
            Ok(c) => c,
            Err(e) => {
                debug!("malformed screen control from {sender}: {e}");
                return;
            }
        };

        match kind {
            FrameKind::ScreenRequest => {
                info!("screen request from {sender}");
                self.events.on_screen_request(sender, &control);
            }
            FrameKind::ScreenAccept => {
                let was_pending = self
                    .state
                    .pending_screen
                    .lock()
                    .unwrap()
                    .remove(&sender)
                    .is_some();
                if !was_pending {
                    debug!("unsolicited screen accept from {sender}, ignoring");
                    return;
                }
                let host = control.ip.parse().unwrap_or(sender);
                let port = control.port.unwrap_or(SCREEN_PORT);
                self.events
                    .on_status(&format!("Screen request accepted by {sender}"));
                self.manager.connect_viewer(host, port);
            }
            FrameKind::ScreenReject => {
                self.state.pending_screen.lock().unwrap().remove(&sender);
                self.events
                    .on_status(&format!("Screen request rejected by {sender}"));
            }
            // Chat and clipboard frames are never routed here.
            _ => {}
        }
    }
}
