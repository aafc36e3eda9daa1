//! End-to-end tests over 127.0.0.1 with ephemeral ports: chat delivery,
//! exact-size chunked file transfer, directory round-trips and the full
//! screen-share negotiation between two wired-up nodes.

use lanlink::messaging::ControlHandler;
use lanlink::protocol::{FrameKind, ScreenControl, CHUNK_SIZE, SCREEN_PORT};
use lanlink::{EventSink, FileTransfer, Messaging, NullSink, ScreenSessionManager, ScreenShare, Settings, SharedState};
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;

fn state(local_ip: &str, download_dir: Option<&Path>, clipboard_share: bool) -> SharedState {
    let mut settings = Settings {
        clipboard_share,
        ..Settings::default()
    };
    if let Some(dir) = download_dir {
        settings.download_dir = dir.to_path_buf();
    }
    SharedState::with_local_ip(settings, local_ip.parse().unwrap())
}

async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

struct NoControl;
impl ControlHandler for NoControl {
    fn on_control(&self, _kind: FrameKind, _sender: IpAddr, _payload: &[u8]) {}
}

// ---------------------------------------------------------------------------
// Messaging
// ---------------------------------------------------------------------------

struct ChatSink {
    tx: mpsc::UnboundedSender<(IpAddr, String)>,
}

impl EventSink for ChatSink {
    fn on_message(&self, sender: IpAddr, text: &str) {
        let _ = self.tx.send((sender, text.to_string()));
    }
}

#[tokio::test]
async fn chat_hello_arrives_with_sender_ip() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let receiver = Messaging::new(state("10.0.0.9", None, false), Arc::new(ChatSink { tx }), 0);
    let addr = receiver.start_listening(Arc::new(NoControl)).await.unwrap();

    let sender = Messaging::new(state("10.0.0.5", None, false), Arc::new(NullSink), addr.port());
    sender
        .send_message("127.0.0.1".parse().unwrap(), "Hello")
        .await
        .unwrap();

    let (ip, text) = rx.recv().await.unwrap();
    assert_eq!(text, "Hello");
    assert_eq!(ip, "127.0.0.1".parse::<IpAddr>().unwrap());
}

// ---------------------------------------------------------------------------
// File transfer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ProgressSink {
    progress: Mutex<Vec<(String, u64, u64)>>,
}

impl EventSink for ProgressSink {
    fn on_progress(&self, filename: &str, transferred: u64, total: u64) {
        self.progress
            .lock()
            .unwrap()
            .push((filename.to_string(), transferred, total));
    }
}

#[tokio::test]
async fn ten_mib_file_arrives_in_160_chunks() {
    const TOTAL: usize = 10 * 1024 * 1024; // 10,485,760

    let tmp = tempfile::tempdir().unwrap();
    let downloads = tmp.path().join("downloads");

    let sink = Arc::new(ProgressSink::default());
    let receiver = FileTransfer::new(state("10.0.0.9", Some(&downloads), false), sink.clone(), 0);
    let addr = receiver.start_listening().await.unwrap();

    let payload: Vec<u8> = (0..TOTAL).map(|i| (i % 249) as u8).collect();
    let src = tmp.path().join("big.bin");
    std::fs::write(&src, &payload).unwrap();

    let sender = FileTransfer::new(
        state("10.0.0.5", Some(tmp.path()), false),
        Arc::new(NullSink),
        addr.port(),
    );
    sender
        .send_path("127.0.0.1".parse().unwrap(), &src)
        .await
        .unwrap();

    let dest = downloads.join("big.bin");
    wait_for("file to arrive", || {
        sink.progress
            .lock()
            .unwrap()
            .last()
            .map(|(_, got, total)| got == total)
            .unwrap_or(false)
    })
    .await;

    assert_eq!(std::fs::read(&dest).unwrap(), payload);

    let progress = sink.progress.lock().unwrap();
    assert_eq!(progress.len(), TOTAL / CHUNK_SIZE); // exactly 160
    for (i, (name, transferred, total)) in progress.iter().enumerate() {
        assert_eq!(name, "big.bin");
        assert_eq!(*total, TOTAL as u64);
        assert_eq!(*transferred, ((i + 1) * CHUNK_SIZE) as u64);
    }
}

#[tokio::test]
async fn directory_round_trip_leaves_no_archives() {
    let tmp = tempfile::tempdir().unwrap();
    let downloads = tmp.path().join("downloads");

    let receiver = FileTransfer::new(
        state("10.0.0.9", Some(&downloads), false),
        Arc::new(ProgressSink::default()),
        0,
    );
    let addr = receiver.start_listening().await.unwrap();

    let src_dir = tmp.path().join("project");
    std::fs::create_dir_all(src_dir.join("nested")).unwrap();
    std::fs::write(src_dir.join("readme.md"), b"# project\n").unwrap();
    std::fs::write(src_dir.join("nested/data.bin"), vec![42u8; 100_000]).unwrap();

    let sender = FileTransfer::new(
        state("10.0.0.5", Some(tmp.path()), false),
        Arc::new(NullSink),
        addr.port(),
    );
    sender
        .send_path("127.0.0.1".parse().unwrap(), &src_dir)
        .await
        .unwrap();

    // The sender's temporary archive is gone after a successful send.
    assert!(!tmp.path().join("project.zip").exists());

    let extracted = downloads.join("project");
    wait_for("directory to be extracted", || {
        extracted.join("nested/data.bin").exists()
    })
    .await;

    assert_eq!(
        std::fs::read(extracted.join("readme.md")).unwrap(),
        b"# project\n"
    );
    assert_eq!(
        std::fs::read(extracted.join("nested/data.bin")).unwrap(),
        vec![42u8; 100_000]
    );
    // The received archive was a transfer encoding only.
    assert!(!downloads.join("project.zip").exists());
}

// ---------------------------------------------------------------------------
// Screen negotiation between two full nodes
// ---------------------------------------------------------------------------

struct MockManager {
    starts: AtomicUsize,
    connects: Mutex<Vec<(IpAddr, u16)>>,
}

impl MockManager {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            starts: AtomicUsize::new(0),
            connects: Mutex::new(Vec::new()),
        })
    }
}

impl ScreenSessionManager for MockManager {
    fn start_capture_server(&self) -> bool {
        self.starts.fetch_add(1, Ordering::SeqCst);
        true
    }
    fn stop_capture_server(&self) {}
    fn connect_viewer(&self, ip: IpAddr, port: u16) {
        self.connects.lock().unwrap().push((ip, port));
    }
    fn disconnect_viewer(&self) {}
}

struct RequestSink {
    requests: mpsc::UnboundedSender<IpAddr>,
}

impl EventSink for RequestSink {
    fn on_screen_request(&self, peer: IpAddr, _info: &ScreenControl) {
        let _ = self.requests.send(peer);
    }
}

/// Breaks the listener/negotiator construction cycle: the listener starts
/// with this placeholder, the negotiator is plugged in once both ports are
/// known.
#[derive(Default)]
struct LateControl(OnceLock<Arc<ScreenShare>>);

impl ControlHandler for LateControl {
    fn on_control(&self, kind: FrameKind, sender: IpAddr, payload: &[u8]) {
        if let Some(handler) = self.0.get() {
            handler.on_control(kind, sender, payload);
        }
    }
}

#[tokio::test]
async fn full_negotiation_accept_flow() {
    let localhost: IpAddr = "127.0.0.1".parse().unwrap();

    // Two listeners on distinct ephemeral ports stand in for the fixed
    // messaging port of two hosts.
    let late_a = Arc::new(LateControl::default());
    let late_b = Arc::new(LateControl::default());

    let state_a = state("10.0.0.5", None, false);
    let state_b = state("10.0.0.9", None, false);

    let listener_a = Messaging::new(state_a.clone(), Arc::new(NullSink), 0);
    let addr_a = listener_a.start_listening(late_a.clone()).await.unwrap();
    let listener_b = Messaging::new(state_b.clone(), Arc::new(NullSink), 0);
    let addr_b = listener_b.start_listening(late_b.clone()).await.unwrap();

    let manager_a = MockManager::new();
    let manager_b = MockManager::new();
    let (req_tx, mut req_rx) = mpsc::unbounded_channel();

    // A sends toward B's port and vice versa.
    let screen_a = Arc::new(ScreenShare::new(
        state_a.clone(),
        Messaging::new(state_a.clone(), Arc::new(NullSink), addr_b.port()),
        manager_a.clone(),
        Arc::new(NullSink),
    ));
    let screen_b = Arc::new(ScreenShare::new(
        state_b.clone(),
        Messaging::new(state_b.clone(), Arc::new(NullSink), addr_a.port()),
        manager_b.clone(),
        Arc::new(RequestSink { requests: req_tx }),
    ));
    late_a.0.set(screen_a.clone()).ok().unwrap();
    late_b.0.set(screen_b.clone()).ok().unwrap();

    // A asks to view B's screen.
    assert!(screen_a.request_screen(localhost).await);
    assert!(state_a.pending_screen.lock().unwrap().contains_key(&localhost));

    // B's decision layer sees the request and accepts.
    let requester = req_rx.recv().await.unwrap();
    assert_eq!(requester, localhost);
    assert!(screen_b.accept_request(requester).await);
    assert_eq!(manager_b.starts.load(Ordering::SeqCst), 1);

    // A's pending entry clears and its viewer connects to B's advertised
    // capture endpoint.
    wait_for("pending request to clear", || {
        state_a.pending_screen.lock().unwrap().is_empty()
    })
    .await;
    let connects = manager_a.connects.lock().unwrap();
    assert_eq!(
        connects.as_slice(),
        &[("10.0.0.9".parse::<IpAddr>().unwrap(), SCREEN_PORT)]
    );
}

#[tokio::test]
async fn full_negotiation_reject_flow() {
    let localhost: IpAddr = "127.0.0.1".parse().unwrap();

    let late_a = Arc::new(LateControl::default());
    let state_a = state("10.0.0.5", None, false);
    let state_b = state("10.0.0.9", None, false);

    let listener_a = Messaging::new(state_a.clone(), Arc::new(NullSink), 0);
    let addr_a = listener_a.start_listening(late_a.clone()).await.unwrap();

    // B only ever answers, so it needs no listener of its own here.
    let manager_a = MockManager::new();
    let screen_b = ScreenShare::new(
        state_b.clone(),
        Messaging::new(state_b, Arc::new(NullSink), addr_a.port()),
        MockManager::new(),
        Arc::new(NullSink),
    );

    // Simulate A's outstanding request, then B rejects.
    state_a
        .pending_screen
        .lock()
        .unwrap()
        .insert(localhost, std::time::Instant::now());
    let screen_a = Arc::new(ScreenShare::new(
        state_a.clone(),
        Messaging::new(state_a.clone(), Arc::new(NullSink), 1), // unused
        manager_a.clone(),
        Arc::new(NullSink),
    ));
    late_a.0.set(screen_a).ok().unwrap();

    assert!(screen_b.reject_request(localhost).await);

    wait_for("pending request to clear", || {
        state_a.pending_screen.lock().unwrap().is_empty()
    })
    .await;
    assert!(manager_a.connects.lock().unwrap().is_empty());
}
