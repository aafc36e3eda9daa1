use crate::events::EventSink;
use crate::protocol::{encode_frame, read_frame, FrameKind, ScreenControl};
use crate::state::SharedState;
use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Connect timeout applied to negotiation sends, so the negotiator never
/// hangs on an unreachable target.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on concurrent inbound connection workers.
const MAX_CONNECTIONS: usize = 64;

/// Receiver for the Screen* control frames the messaging listener does not
/// interpret itself.
pub trait ControlHandler: Send + Sync {
    fn on_control(&self, kind: FrameKind, sender: IpAddr, payload: &[u8]);
}

/// Typed, length-framed messaging over TCP.
///
/// The two sides are deliberately asymmetric: the listener multiplexes many
/// consecutive frames on one long-lived connection, while every send opens
/// a fresh connection, writes exactly one frame and closes it. Delivery is
/// fire-and-forget — no ack, no retry, and no ordering across separate
/// send calls.
#[derive(Clone)]
pub struct Messaging {
    inner: Arc<Inner>,
}

struct Inner {
    state: SharedState,
    events: Arc<dyn EventSink>,
    port: u16,
    limiter: Arc<Semaphore>,
}

impl Messaging {
    pub fn new(state: SharedState, events: Arc<dyn EventSink>, port: u16) -> Self {
        Self {
            inner: Arc::new(Inner {
                state,
                events,
                port,
                limiter: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
            }),
        }
    }

    /// Binds the listener and spawns the accept loop. Returns the bound
    /// address (useful when constructed with port 0). Bind failure is fatal
    /// to this component only.
    pub async fn start_listening(
        &self,
        control: Arc<dyn ControlHandler>,
    ) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(("0.0.0.0", self.inner.port)).await?;
        let local_addr = listener.local_addr()?;
        info!("messaging listening on {local_addr}");

        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                // The permit bounds worker count under hostile or buggy
                // peers; acquire before accept so the backlog queues in
                // the kernel instead of as tasks.
                let permit = match inner.limiter.clone().acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break,
                };
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let inner = inner.clone();
                        let control = control.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            handle_connection(stream, addr, &inner, control.as_ref()).await;
                        });
                    }
                    Err(e) => {
                        warn!("messaging accept failed: {e}");
                    }
                }
            }
        });

        Ok(local_addr)
    }

    /// Sends chat text to the target's messaging port.
    pub async fn send_message(
        &self,
        target: IpAddr,
        text: &str,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.send_frame(target, FrameKind::Chat, text.as_bytes(), None)
            .await
    }

    /// Sends clipboard text to the target's messaging port.
    pub async fn send_clipboard(
        &self,
        target: IpAddr,
        text: &str,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.send_frame(target, FrameKind::Clipboard, text.as_bytes(), None)
            .await
    }

    /// Sends a screen-negotiation control frame, with a short connect
    /// timeout so an unreachable target cannot stall the negotiator.
    pub async fn send_control(
        &self,
        target: IpAddr,
        kind: FrameKind,
        control: &ScreenControl,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let payload = serde_json::to_vec(control)?;
        self.send_frame(target, kind, &payload, Some(CONNECT_TIMEOUT))
            .await
    }

    async fn send_frame(
        &self,
        target: IpAddr,
        kind: FrameKind,
        payload: &[u8],
        connect_timeout: Option<Duration>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let addr = SocketAddr::new(target, self.inner.port);
        let result = async {
            let connect = TcpStream::connect(addr);
            let mut stream = match connect_timeout {
                Some(limit) => tokio::time::timeout(limit, connect).await.map_err(|_| {
                    std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out")
                })??,
                None => connect.await?,
            };
            stream.write_all(&encode_frame(kind, payload)).await?;
            stream.shutdown().await?;
            Ok::<(), Box<dyn Error + Send + Sync>>(())
        }
        .await;

        if let Err(e) = &result {
            warn!("failed to send {:?} to {}: {}", kind, addr, e);
        }
        result
    }
}

/// Per-connection worker: frame loop until the peer closes or a decode
/// error aborts this connection. The listener is unaffected either way.
async fn handle_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    inner: &Inner,
    control: &dyn ControlHandler,
) {
    let sender = addr.ip();
    loop {
        match read_frame(&mut stream).await {
            Ok(Some((kind, payload))) => match kind {
                FrameKind::Chat => match String::from_utf8(payload) {
                    Ok(text) => inner.events.on_message(sender, &text),
                    Err(e) => {
                        debug!("invalid chat payload from {sender}: {e}");
                        break;
                    }
                },
                FrameKind::Clipboard => match String::from_utf8(payload) {
                    Ok(text) => {
                        if !inner.state.settings.clipboard_share {
                            debug!("clipboard sharing disabled, dropping frame from {sender}");
                            continue;
                        }
                        // Echo guard: a peer relaying our own clipboard
                        // back must not re-trigger subscribers.
                        {
                            let mut last = inner.state.last_clipboard.lock().unwrap();
                            if *last == text {
                                continue;
                            }
                            *last = text.clone();
                        }
                        inner.events.on_clipboard(sender, &text);
                    }
                    Err(e) => {
                        debug!("invalid clipboard payload from {sender}: {e}");
                        break;
                    }
                },
                FrameKind::ScreenRequest | FrameKind::ScreenAccept | FrameKind::ScreenReject => {
                    control.on_control(kind, sender, &payload);
                }
            },
            Ok(None) => break, // peer closed
            Err(e) => {
                debug!("dropping connection from {sender}: {e}");
                break;
            }
        }
    }
}
