use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Port for file/directory transfers.
pub const FILE_PORT: u16 = 5001;
/// Port for UDP presence broadcasts.
pub const DISCOVERY_PORT: u16 = 5002;
/// Port for the framed messaging channel.
pub const CHAT_PORT: u16 = 5003;
/// Port the external screen-session server listens on.
pub const SCREEN_PORT: u16 = 5000;

/// Chunk size for file streaming. Shared by sender and receiver; also the
/// granularity of progress callbacks.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Limited-broadcast address announcements are sent to.
pub const BROADCAST_ADDR: std::net::Ipv4Addr = std::net::Ipv4Addr::BROADCAST;

/// Upper bound on a single message frame. A length prefix above this is
/// treated as a decode error and the connection is dropped.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Message kind tag, the first byte of every frame on the chat port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    Chat = 0,
    Clipboard = 1,
    ScreenRequest = 2,
    ScreenAccept = 3,
    ScreenReject = 4,
}

impl FrameKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(FrameKind::Chat),
            1 => Some(FrameKind::Clipboard),
            2 => Some(FrameKind::ScreenRequest),
            3 => Some(FrameKind::ScreenAccept),
            4 => Some(FrameKind::ScreenReject),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// UDP presence broadcast. Datagrams whose `type` is not `discovery` are
/// ignored by the listener.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Announcement {
    #[serde(rename = "type")]
    pub kind: String,
    pub ip: String,
    pub nick: String,
    pub avatar: String,
}

impl Announcement {
    pub const KIND: &'static str = "discovery";

    pub fn new(ip: String, nick: String, avatar: String) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            ip,
            nick,
            avatar,
        }
    }
}

/// JSON preamble sent ahead of the byte stream on the file port.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FileMetadata {
    pub filename: String,
    pub filesize: u64,
    #[serde(default)]
    pub is_zip: bool,
}

/// Payload of the Screen* control frames. `port` is absent on rejects.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScreenControl {
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub action: String,
}

/// Encodes one frame: `[1-byte kind][4-byte BE length][payload]`.
pub fn encode_frame(kind: FrameKind, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5 + payload.len());
    frame.push(kind.as_byte());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Reads one frame from the stream. Returns `Ok(None)` when the peer closed
/// the connection cleanly before a new frame started; any truncation,
/// unknown kind byte or oversized length is an error that aborts only this
/// connection.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<(FrameKind, Vec<u8>)>>
where
    R: AsyncRead + Unpin,
{
    let mut kind_byte = [0u8; 1];
    match reader.read_exact(&mut kind_byte).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let kind = FrameKind::from_byte(kind_byte[0]).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unknown message type {}", kind_byte[0]),
        )
    })?;

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame length {} exceeds limit", len),
        ));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some((kind, payload)))
}
