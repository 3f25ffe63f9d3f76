use crate::error::ProxyError;
use crate::http_relay::connect_upstream;
use crate::request::ConnectTarget;
use log::debug;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Bytes moved in each direction of a finished tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelStats {
    pub client_to_server: u64,
    pub server_to_client: u64,
}

/// Connects to `target`, acknowledges the CONNECT and relays raw bytes both
/// ways until both directions have ended.
///
/// On connect failure nothing is written to the client. A failure to send
/// the acknowledgement comes back as [`ProxyError::Io`].
pub async fn open_tunnel<C>(
    mut client: C,
    target: &ConnectTarget,
    connect_timeout: Option<Duration>,
    buffer_size: usize,
) -> Result<TunnelStats, ProxyError>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let upstream = connect_upstream(&target.host, target.port, connect_timeout).await?;
    client.write_all(CONNECTION_ESTABLISHED).await?;
    client.flush().await?;
    debug!("Tunnel established to {}", target);

    let stats = relay_bidirectional(client, upstream, buffer_size).await;
    debug!(
        "Tunnel to {} closed ({} bytes up, {} bytes down)",
        target, stats.client_to_server, stats.server_to_client
    );
    Ok(stats)
}

/// Runs the two directions as separate tasks and waits for both. Either side
/// finishing early leaves the other running; the streams are released only
/// once both tasks have returned.
pub async fn relay_bidirectional<C, S>(client: C, server: S, buffer_size: usize) -> TunnelStats
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (server_read, server_write) = tokio::io::split(server);

    let upstream = tokio::spawn(pump(client_read, server_write, buffer_size));
    let downstream = tokio::spawn(pump(server_read, client_write, buffer_size));

    let (up, down) = tokio::join!(upstream, downstream);
    TunnelStats {
        client_to_server: up.unwrap_or(0),
        server_to_client: down.unwrap_or(0),
    }
}

/// Copies until the reader hits EOF or either side errors, then half-closes
/// the writer. Errors end the copy and are not reported.
async fn pump<R, W>(mut reader: R, mut writer: W, buffer_size: usize) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; buffer_size];
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buffer).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if writer.write_all(&buffer[..n]).await.is_err() {
            break;
        }
        total += n as u64;
    }

    let _ = writer.shutdown().await;
    total
}
