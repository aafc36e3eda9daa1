use crate::events::EventSink;
use crate::protocol::{FileMetadata, CHUNK_SIZE};
use crate::state::SharedState;
use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Sanity cap on the metadata preamble.
const MAX_METADATA_LEN: u32 = 16 * 1024;

/// Bound on concurrent inbound transfer workers.
const MAX_TRANSFERS: usize = 16;

/// File and directory transfer engine. Runs its own listener on a port
/// separate from chat; each accepted connection carries exactly one
/// transfer. Directories travel as zip archives, a transfer encoding that
/// is deleted after extraction on the receiving side and after a
/// successful send on the sending side.
#[derive(Clone)]
pub struct FileTransfer {
    inner: Arc<Inner>,
}

struct Inner {
    state: SharedState,
    events: Arc<dyn EventSink>,
    port: u16,
    limiter: Arc<Semaphore>,
}

impl FileTransfer {
    pub fn new(state: SharedState, events: Arc<dyn EventSink>, port: u16) -> Self {
        Self {
            inner: Arc::new(Inner {
                state,
                events,
                port,
                limiter: Arc::new(Semaphore::new(MAX_TRANSFERS)),
            }),
        }
    }

    /// Binds the transfer listener and spawns the accept loop. Returns the
    /// bound address. Bind failure is fatal to this component only.
    pub async fn start_listening(&self) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(("0.0.0.0", self.inner.port)).await?;
        let local_addr = listener.local_addr()?;
        info!("file transfer listening on {local_addr}");

        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                let permit = match inner.limiter.clone().acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break,
                };
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!("incoming transfer from {addr}");
                        let inner = inner.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            if let Err(e) = receive_transfer(stream, &inner).await {
                                warn!("error receiving file from {addr}: {e}");
                                inner
                                    .events
                                    .on_status(&format!("Error receiving file: {e}"));
                            }
                        });
                    }
                    Err(e) => warn!("transfer accept failed: {e}"),
                }
            }
        });

        Ok(local_addr)
    }

    /// Sends a file, or a whole directory as a zip archive, to the
    /// target's transfer port. The temporary archive for a directory is
    /// removed only after a successful send.
    pub async fn send_path(
        &self,
        target: IpAddr,
        path: &Path,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let result = self.try_send(target, path).await;
        if let Err(e) = &result {
            warn!("error sending {}: {}", path.display(), e);
            self.inner
                .events
                .on_status(&format!("Error sending file: {e}"));
        }
        result
    }

    async fn try_send(
        &self,
        target: IpAddr,
        path: &Path,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let fs_meta = tokio::fs::metadata(path).await?;
        let is_dir = fs_meta.is_dir();

        let final_path = if is_dir {
            let archive = archive_path_for(path);
            let src = path.to_path_buf();
            let dst = archive.clone();
            tokio::task::spawn_blocking(move || zip_dir(&src, &dst)).await??;
            archive
        } else {
            path.to_path_buf()
        };

        let filesize = tokio::fs::metadata(&final_path).await?.len();
        let filename = final_path
            .file_name()
            .ok_or("path has no file name")?
            .to_string_lossy()
            .to_string();

        let metadata = FileMetadata {
            filename: filename.clone(),
            filesize,
            is_zip: is_dir,
        };
        let meta_json = serde_json::to_vec(&metadata)?;

        let addr = SocketAddr::new(target, self.inner.port);
        let mut stream = TcpStream::connect(addr).await?;
        stream
            .write_all(&(meta_json.len() as u32).to_be_bytes())
            .await?;
        stream.write_all(&meta_json).await?;

        let mut file = tokio::fs::File::open(&final_path).await?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut sent: u64 = 0;
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n]).await?;
            sent += n as u64;
            self.inner.events.on_progress(&filename, sent, filesize);
        }
        stream.shutdown().await?;

        if is_dir {
            // Success path only; a failed send may leave the archive behind.
            tokio::fs::remove_file(&final_path).await?;
        }

        info!("sent {} ({} bytes) to {}", filename, filesize, target);
        Ok(())
    }
}

/// One inbound transfer: metadata preamble, exactly `filesize` bytes in
/// fixed-size chunks, then optional archive extraction. Any I/O error
/// aborts the transfer and leaves a partial destination file on disk.
async fn receive_transfer(
    mut stream: TcpStream,
    inner: &Inner,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    let meta_len = u32::from_be_bytes(len_bytes);
    if meta_len > MAX_METADATA_LEN {
        return Err(format!("metadata length {meta_len} exceeds limit").into());
    }

    let mut meta_buf = vec![0u8; meta_len as usize];
    stream.read_exact(&mut meta_buf).await?;
    let metadata: FileMetadata = serde_json::from_slice(&meta_buf)?;

    // Strip directory components before the name touches the filesystem.
    let filename = sanitize_filename(&metadata.filename)
        .ok_or_else(|| format!("unusable filename {:?}", metadata.filename))?;

    let download_dir = inner.state.settings.download_dir.clone();
    tokio::fs::create_dir_all(&download_dir).await?;
    let save_path = download_dir.join(&filename);

    let mut file = tokio::fs::File::create(&save_path).await?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut received: u64 = 0;
    while received < metadata.filesize {
        let want = std::cmp::min(CHUNK_SIZE as u64, metadata.filesize - received) as usize;
        stream.read_exact(&mut buf[..want]).await?;
        file.write_all(&buf[..want]).await?;
        received += want as u64;
        inner
            .events
            .on_progress(&filename, received, metadata.filesize);
    }
    file.flush().await?;
    drop(file);

    if metadata.is_zip {
        let extract_dir = download_dir.join(stem_of(&filename));
        let archive = save_path.clone();
        let dest = extract_dir.clone();
        tokio::task::spawn_blocking(move || extract_zip(&archive, &dest)).await??;
        tokio::fs::remove_file(&save_path).await?;
        info!("extracted {} into {}", filename, extract_dir.display());
    } else {
        info!("received {} ({} bytes)", filename, metadata.filesize);
    }

    Ok(())
}

/// Reduces a transmitted filename to its base name, rejecting names with
/// no usable component. Both separator styles are stripped since the
/// sender's platform is unknown.
fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Some(base.to_string())
}

fn stem_of(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string())
}

/// `<dir>.zip` next to the directory being sent.
fn archive_path_for(dir: &Path) -> PathBuf {
    let mut os = dir.as_os_str().to_os_string();
    os.push(".zip");
    PathBuf::from(os)
}

fn zip_dir(src: &Path, dst: &Path) -> Result<(), Box<dyn Error + Send + Sync>> {
    let file = std::fs::File::create(dst)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for entry in walkdir::WalkDir::new(src) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src)?;
        if rel.as_os_str().is_empty() {
            continue; // the root directory itself
        }
        let name = rel.to_string_lossy().replace('\\', "/");
        if entry.file_type().is_dir() {
            writer.add_directory(name, options)?;
        } else if entry.file_type().is_file() {
            writer.start_file(name, options)?;
            let mut f = std::fs::File::open(entry.path())?;
            std::io::copy(&mut f, &mut writer)?;
        }
    }
    writer.finish()?;
    Ok(())
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<(), Box<dyn Error + Send + Sync>> {
    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)?;
    zip.extract(dest)?;
    Ok(())
}
