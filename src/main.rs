use clap::Parser;
use lanlink::protocol::ScreenControl;
use lanlink::{EventSink, Node, Peer, ScreenSessionManager, Settings};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[derive(Parser)]
#[command(name = "lanlink", about = "LanLink P2P LAN Transfer & Chat")]
struct Cli {
    /// Nickname shown to peers (generated if omitted)
    #[arg(long)]
    nick: Option<String>,

    /// Avatar shown to peers
    #[arg(long, default_value = "👤")]
    avatar: String,

    /// Directory incoming files are saved to
    #[arg(long, default_value = "received_files")]
    download_dir: PathBuf,

    /// Accept clipboard content from peers
    #[arg(long)]
    share_clipboard: bool,

    /// Seconds between presence broadcasts
    #[arg(long, default_value_t = 3)]
    broadcast_interval: u64,

    /// Also write logs to daily-rotated files in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

/// Prints everything the core reports. A GUI would feed these into its
/// widgets; here they go straight to the terminal.
struct CliSink;

impl EventSink for CliSink {
    fn on_peer_found(&self, peer: &Peer) {
        info!("peer online: {} {} ({})", peer.avatar, peer.nickname, peer.ip);
    }
    fn on_message(&self, sender: IpAddr, text: &str) {
        println!("[{sender}] {text}");
    }
    fn on_clipboard(&self, sender: IpAddr, text: &str) {
        println!("[{sender}] (clipboard) {text}");
    }
    fn on_screen_request(&self, peer: IpAddr, _info: &ScreenControl) {
        println!("{peer} wants to view your screen — `accept {peer}` or `reject {peer}`");
    }
    fn on_progress(&self, filename: &str, transferred: u64, total: u64) {
        if transferred == total {
            println!("{filename}: done ({total} bytes)");
        }
    }
    fn on_status(&self, message: &str) {
        println!("* {message}");
    }
}

/// Placeholder for the external screen-session manager. The real capture
/// server and viewer are separate programs; this one only reports what it
/// was asked to do.
struct ExternalScreenManager;

impl ScreenSessionManager for ExternalScreenManager {
    fn start_capture_server(&self) -> bool {
        info!("capture server start requested");
        true
    }
    fn stop_capture_server(&self) {
        info!("capture server stop requested");
    }
    fn connect_viewer(&self, ip: IpAddr, port: u16) {
        info!("viewer connect requested for {ip}:{port}");
    }
    fn disconnect_viewer(&self) {
        info!("viewer disconnect requested");
    }
}

fn init_tracing(log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "lanlink.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_deref());

    let defaults = Settings::default();
    let settings = Settings {
        nickname: cli.nick.unwrap_or(defaults.nickname),
        avatar: cli.avatar,
        download_dir: cli.download_dir,
        clipboard_share: cli.share_clipboard,
        broadcast_interval: Duration::from_secs(cli.broadcast_interval.max(1)),
    };

    let node = Node::new(settings, Arc::new(ExternalScreenManager), Arc::new(CliSink));
    println!(
        "lanlink — you are {} ({})",
        node.state.settings.nickname, node.state.local_ip
    );

    if let Err(e) = node.start().await {
        // Discovery and any listener that did bind keep running.
        eprintln!("warning: {e}");
    }

    println!("commands: peers | msg <ip> <text> | clip <ip> <text> | send <ip> <path> | screen <ip> | accept <ip> | reject <ip> | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if !run_command(&node, line.trim()).await {
                            break;
                        }
                    }
                    _ => break, // stdin closed
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    node.shutdown();
}

/// Returns false when the loop should exit.
async fn run_command(node: &Node, line: &str) -> bool {
    let mut parts = line.splitn(3, ' ');
    let cmd = parts.next().unwrap_or("");

    match cmd {
        "" => {}
        "quit" | "exit" => return false,
        "peers" => {
            let peers = node.state.peers_snapshot();
            if peers.is_empty() {
                println!("no peers discovered yet");
            }
            for peer in peers.values() {
                println!("{} {} ({})", peer.avatar, peer.nickname, peer.ip);
            }
        }
        "msg" | "clip" | "send" | "screen" | "accept" | "reject" => {
            let Some(ip) = parts.next().and_then(|s| s.parse::<IpAddr>().ok()) else {
                println!("usage: {cmd} <ip> ...");
                return true;
            };
            let rest = parts.next().unwrap_or("");
            match cmd {
                "msg" => {
                    if node.messaging.send_message(ip, rest).await.is_ok() {
                        println!("[me -> {ip}] {rest}");
                    }
                }
                "clip" => {
                    // Remember our own content so a relay of it back is
                    // suppressed by the echo guard.
                    *node.state.last_clipboard.lock().unwrap() = rest.to_string();
                    let _ = node.messaging.send_clipboard(ip, rest).await;
                }
                "send" => {
                    let _ = node.transfer.send_path(ip, Path::new(rest)).await;
                }
                "screen" => {
                    node.screen.request_screen(ip).await;
                }
                "accept" => {
                    node.screen.accept_request(ip).await;
                }
                "reject" => {
                    node.screen.reject_request(ip).await;
                }
                _ => unreachable!(),
            }
        }
        _ => println!("unknown command: {cmd}"),
    }
    true
}
