use std::path::PathBuf;
use std::time::Duration;

/// Read-only configuration handed to the core at startup. Persistence is
/// the embedding application's concern; the core never writes settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub nickname: String,
    pub avatar: String,
    pub download_dir: PathBuf,
    pub clipboard_share: bool,
    pub broadcast_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            nickname: default_nickname(),
            avatar: "👤".to_string(),
            download_dir: PathBuf::from("received_files"),
            clipboard_share: false,
            broadcast_interval: Duration::from_secs(3),
        }
    }
}

/// A generated name, falling back to the machine hostname if the generator
/// runs dry.
fn default_nickname() -> String {
    names::Generator::default()
        .next()
        .or_else(|| {
            hostname::get()
                .ok()
                .map(|h| h.to_string_lossy().to_string())
        })
        .unwrap_or_else(|| "lanlink-user".to_string())
}
