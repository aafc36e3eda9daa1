#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Peer {
    pub ip: std::net::IpAddr,
    pub nickname: String,
    pub avatar: String,
    pub last_seen: u64,
} // unix seconds, refreshed on every announcement

pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
