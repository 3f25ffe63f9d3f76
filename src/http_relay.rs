use crate::error::ProxyError;
use crate::forward_proxy::HandlerSettings;
use crate::logging::AccessLog;
use crate::request::{ParsedRequest, pending_body_len, rewrite_request};
use log::debug;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;

/// Resolves `host` and connects to the first address it yields.
///
/// Every failure here is a [`ProxyError::Connect`] or
/// [`ProxyError::Connection`], so callers can tell it apart from errors on an
/// established stream.
pub async fn connect_upstream(host: &str, port: u16, connect_timeout: Option<Duration>) -> Result<TcpStream, ProxyError> {
    let addr = lookup_host((host, port))
        .await
        .map_err(ProxyError::Connect)?
        .next()
        .ok_or_else(|| ProxyError::Connection(format!("no address found for {}", host)))?;

    let connected = match connect_timeout {
        Some(limit) => timeout(limit, TcpStream::connect(addr))
            .await
            .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, format!("connect to {} timed out", addr)))),
        None => TcpStream::connect(addr).await,
    };
    let stream = connected.map_err(ProxyError::Connect)?;
    debug!("Connected to upstream {}:{} ({})", host, port, addr);
    Ok(stream)
}

/// Forwards one plain HTTP request over a fresh upstream connection and
/// streams the answer back. Returns the number of response bytes relayed.
///
/// `raw_request` is what was buffered from the client. Any `Content-Length`
/// body beyond it is copied from `client` after the rewritten head.
pub async fn relay_plain<C>(
    client: &mut C,
    request: &ParsedRequest,
    raw_request: &[u8],
    settings: &HandlerSettings,
    access_log: &AccessLog,
) -> Result<u64, ProxyError>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let mut upstream = connect_upstream(&request.host, request.port, settings.connect_timeout).await?;

    let rewritten = rewrite_request(raw_request, &request.method, &request.path);
    upstream.write_all(&rewritten).await?;

    let pending = pending_body_len(raw_request);
    if pending > 0 {
        let forwarded = forward_body(
            client,
            &mut upstream,
            pending,
            settings.request_read_timeout,
            settings.relay_buffer_size,
        )
        .await?;
        debug!("Streamed {} of {} pending body bytes for {}", forwarded, pending, request.target_url);
    }

    let relayed = relay_response(
        &mut upstream,
        client,
        &request.target_url,
        settings.upstream_read_timeout,
        settings.relay_buffer_size,
        access_log,
    )
    .await;
    let _ = upstream.shutdown().await;
    Ok(relayed)
}

/// Copies up to `remaining` request body bytes from the client to the
/// upstream. A client that stops sending (EOF, error or a read timeout) ends
/// the copy early; a failed upstream write is an error.
async fn forward_body<C, U>(
    client: &mut C,
    upstream: &mut U,
    mut remaining: usize,
    read_timeout: Duration,
    buffer_size: usize,
) -> Result<u64, ProxyError>
where
    C: AsyncRead + Unpin,
    U: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; buffer_size.min(remaining)];
    let mut total = 0u64;

    while remaining > 0 {
        let want = buffer.len().min(remaining);
        let n = match timeout(read_timeout, client.read(&mut buffer[..want])).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                debug!("Client body read ended: {}", e);
                break;
            }
            Err(_) => {
                debug!("Client body read timed out with {} bytes outstanding", remaining);
                break;
            }
        };
        upstream.write_all(&buffer[..n]).await?;
        remaining -= n;
        total += n as u64;
    }

    Ok(total)
}

/// Copies the upstream response to the client verbatim until EOF, a read
/// timeout or a transport error. The first chunk's status line is sniffed for
/// the access log; forwarding of that chunk is not delayed by it.
pub async fn relay_response<U, C>(
    upstream: &mut U,
    client: &mut C,
    url: &str,
    read_timeout: Duration,
    buffer_size: usize,
    access_log: &AccessLog,
) -> u64
where
    U: AsyncRead + Unpin,
    C: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; buffer_size];
    let mut first_chunk = true;
    let mut total = 0u64;

    loop {
        let n = match timeout(read_timeout, upstream.read(&mut buffer)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                debug!("Upstream read for {} ended: {}", url, e);
                break;
            }
            Err(_) => {
                debug!("Upstream read for {} timed out after {:?}", url, read_timeout);
                break;
            }
        };

        if first_chunk {
            first_chunk = false;
            if let Some((code, reason)) = parse_status_line(&buffer[..n]) {
                access_log.record(url, || format!("{} - {} {}", url, code, reason));
            }
        }

        if let Err(e) = client.write_all(&buffer[..n]).await {
            debug!("Client write for {} failed: {}", url, e);
            break;
        }
        total += n as u64;
    }

    let _ = client.flush().await;
    total
}

/// Returns the status code and reason phrase when the first line has at
/// least three space-separated tokens.
fn parse_status_line(chunk: &[u8]) -> Option<(String, String)> {
    let text = String::from_utf8_lossy(chunk);
    let status_line = text.split("\r\n").next()?;
    let tokens: Vec<&str> = status_line.split(' ').collect();
    if tokens.len() < 3 {
        return None;
    }
    Some((tokens[1].to_string(), tokens[2..].join(" ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_throttle::LogThrottle;
    use crate::logging::MemorySink;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    fn access_log() -> (AccessLog, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (AccessLog::new(Arc::new(LogThrottle::default()), sink.clone()), sink)
    }

    #[test]
    fn test_parse_status_line() {
        assert_eq!(
            parse_status_line(b"HTTP/1.1 404 Not Found\r\nServer: x\r\n\r\n"),
            Some(("404".to_string(), "Not Found".to_string()))
        );
        assert_eq!(parse_status_line(b"HTTP/1.1 200 OK"), Some(("200".to_string(), "OK".to_string())));
        assert_eq!(parse_status_line(b"HTTP/1.1 204\r\n\r\n"), None);
        assert_eq!(parse_status_line(b"garbage"), None);
    }

    #[tokio::test]
    async fn test_relay_response_is_verbatim_and_logs_once() {
        let (log, sink) = access_log();
        let response: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        let mut upstream = response;
        let mut client = Vec::new();

        let relayed = relay_response(&mut upstream, &mut client, "http://a.com/", Duration::from_secs(1), 8, &log).await;

        assert_eq!(relayed, response.len() as u64);
        assert_eq!(client, response);
        assert_eq!(sink.lines(), vec!["http://a.com/ - 200 OK"]);
    }

    #[tokio::test]
    async fn test_relay_response_without_status_line_is_not_logged() {
        let (log, sink) = access_log();
        let mut upstream: &[u8] = b"not http";
        let mut client = Vec::new();

        relay_response(&mut upstream, &mut client, "http://a.com/", Duration::from_secs(1), 1024, &log).await;

        assert_eq!(client, b"not http");
        assert!(sink.lines().is_empty());
    }

    #[tokio::test]
    async fn test_relay_response_stops_on_read_timeout() {
        let (log, _sink) = access_log();
        let (mut origin, mut upstream) = tokio::io::duplex(1024);
        origin.write_all(b"HTTP/1.1 200 OK\r\n\r\npartial").await.unwrap();

        // origin stays open without sending more
        let mut client = Vec::new();
        let relayed = relay_response(&mut upstream, &mut client, "http://a.com/", Duration::from_millis(50), 1024, &log).await;

        assert_eq!(client, b"HTTP/1.1 200 OK\r\n\r\npartial");
        assert_eq!(relayed, client.len() as u64);
        drop(origin);
    }

    fn settings() -> HandlerSettings {
        HandlerSettings {
            request_read_timeout: Duration::from_millis(200),
            upstream_read_timeout: Duration::from_secs(5),
            relay_buffer_size: 1024,
            ..HandlerSettings::default()
        }
    }

    /// An origin that records one request and answers with `response`.
    async fn origin(response: &'static [u8]) -> (u16, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let received = crate::request::read_request(&mut socket, Duration::from_secs(5), 64 * 1024).await;
            socket.write_all(response).await.unwrap();
            received.to_vec()
        });
        (port, handle)
    }

    #[tokio::test]
    async fn test_relay_plain_rewrites_request_line() {
        let (port, origin) = origin(b"HTTP/1.1 201 Created\r\n\r\n").await;

        let raw = format!("PUT http://127.0.0.1:{}/item HTTP/1.0\r\nHost: 127.0.0.1\r\n\r\n", port);
        let request = ParsedRequest::parse(&raw).unwrap();
        let (log, sink) = access_log();
        let (mut peer, mut client) = tokio::io::duplex(1024);

        let relayed = relay_plain(&mut client, &request, raw.as_bytes(), &settings(), &log)
            .await
            .unwrap();
        drop(client);

        let received = origin.await.unwrap();
        assert_eq!(&received[..], b"PUT /item HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n");
        let mut response = Vec::new();
        peer.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"HTTP/1.1 201 Created\r\n\r\n");
        assert_eq!(relayed, response.len() as u64);
        assert_eq!(sink.lines(), vec![format!("http://127.0.0.1:{}/item - 201 Created", port)]);
    }

    #[tokio::test]
    async fn test_relay_plain_streams_body_not_yet_buffered() {
        let (port, origin) = origin(b"HTTP/1.1 200 OK\r\n\r\n").await;

        // only the head and two body bytes were buffered before relaying
        let raw = format!(
            "POST http://127.0.0.1:{}/up HTTP/1.1\r\nContent-Length: 6\r\n\r\nab",
            port
        );
        let request = ParsedRequest::parse(&raw).unwrap();
        let (log, _sink) = access_log();
        let (mut peer, mut client) = tokio::io::duplex(1024);
        peer.write_all(b"cdef").await.unwrap();

        relay_plain(&mut client, &request, raw.as_bytes(), &settings(), &log)
            .await
            .unwrap();

        let received = origin.await.unwrap();
        assert_eq!(&received[..], b"POST /up HTTP/1.1\r\nContent-Length: 6\r\n\r\nabcdef");
    }

    #[tokio::test]
    async fn test_forward_body_stops_at_declared_length() {
        let mut client: &[u8] = b"0123456789";
        let mut upstream = Vec::new();

        let forwarded = forward_body(&mut client, &mut upstream, 4, Duration::from_secs(1), 3)
            .await
            .unwrap();

        assert_eq!(forwarded, 4);
        assert_eq!(upstream, b"0123");
    }

    #[tokio::test]
    async fn test_connect_upstream_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect_upstream("127.0.0.1", port, Some(Duration::from_secs(5))).await.unwrap_err();
        assert!(err.is_connect_failure());
        assert!(err.is_benign_connect_failure());
    }
}
