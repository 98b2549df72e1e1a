//! Control Trigger (§4.H): a minimal unix-socket endpoint accepting a
//! single HTTP/1.0-ish `GET /reload`, re-reading and re-validating the
//! config file from disk and applying it via `Server::reload`. No web
//! framework pulled in, since the surface is a single route.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

use crate::config::Config;
use crate::error::Result;
use crate::server::Server;
use crate::tailnet::netmap::NetmapSource;

const OK_RESPONSE: &str = "HTTP/1.0 200 OK\r\nContent-Length: 8\r\n\r\nreloaded";
const ERROR_STATUS: &str = "HTTP/1.0 500 Internal Server Error\r\n\r\n";

/// Runs forever, accepting one connection at a time. Each connection is
/// handled on its own task so a slow client can't block subsequent
/// reload requests.
pub async fn serve(
    socket_path: PathBuf,
    server: Server,
    config_path: PathBuf,
    netmap_source: Option<Arc<dyn NetmapSource>>,
) -> Result<()> {
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)?;
    log::info!(target: "control", "listening on {}", socket_path.display());

    loop {
        let (stream, _addr) = listener.accept().await?;
        let server = server.clone();
        let config_path = config_path.clone();
        let netmap_source = netmap_source.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &server, &config_path, netmap_source).await {
                log::warn!(target: "control", "control connection failed: {}", e);
            }
        });
    }
}

async fn handle_connection(
    stream: tokio::net::UnixStream,
    server: &Server,
    config_path: &PathBuf,
    netmap_source: Option<Arc<dyn NetmapSource>>,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    if !request_line.starts_with("GET /reload") {
        write_half.write_all(ERROR_STATUS.as_bytes()).await?;
        return Ok(());
    }

    match reload(server, config_path, netmap_source).await {
        Ok(()) => write_half.write_all(OK_RESPONSE.as_bytes()).await?,
        Err(e) => {
            log::warn!(target: "control", "reload failed: {}", e);
            write_half.write_all(ERROR_STATUS.as_bytes()).await?;
        }
    }

    Ok(())
}

async fn reload(server: &Server, config_path: &PathBuf, netmap_source: Option<Arc<dyn NetmapSource>>) -> Result<()> {
    let bytes = std::fs::read(config_path)?;
    let config = Config::try_from(bytes.as_slice())?;
    server.reload(&config, netmap_source).await
}
