use crate::config::Config;
use crate::domain_filter::DomainFilter;
use crate::error::ProxyError;
use crate::http_relay::relay_plain;
use crate::logging::AccessLog;
use crate::request::{ConnectTarget, ParsedRequest, has_complete_head, is_connect, read_request};
use crate::tunnel::open_tunnel;
use log::debug;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

const FAVICON_SUFFIX: &str = "/favicon.ico";

/// How a connection ended. Every connection serves exactly one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing usable was read; closed without a response.
    Invalid,
    /// Infrastructure host or favicon request; closed silently.
    Ignored,
    /// Blacklisted; the 403 page was sent.
    Blocked,
    /// Resolution or connect failed; closed without a response.
    UpstreamUnavailable,
    /// The upstream was reached but the exchange broke off mid-way.
    Aborted,
    /// A plain request was relayed; carries the response bytes forwarded.
    Relayed(u64),
    /// A CONNECT tunnel ran to completion.
    Tunneled { client_to_server: u64, server_to_client: u64 },
}

#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub request_read_timeout: Duration,
    pub upstream_read_timeout: Duration,
    pub connect_timeout: Option<Duration>,
    pub relay_buffer_size: usize,
    /// Cap on the bytes buffered before forwarding. The request head must fit
    /// in it; a longer `Content-Length` body is streamed after the head.
    pub max_request_size: usize,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for HandlerSettings {
    fn from(config: &Config) -> Self {
        Self {
            request_read_timeout: config.request_read_timeout(),
            upstream_read_timeout: config.upstream_read_timeout(),
            connect_timeout: config.connect_timeout(),
            relay_buffer_size: config.relay_buffer_size,
            max_request_size: config.max_request_size,
        }
    }
}

/// Per-connection request handling: reads the request, applies the domain
/// filter and dispatches to the plain relay or the CONNECT tunnel.
///
/// Cheap to clone; clones share the blacklist and the log throttle.
#[derive(Clone)]
pub struct ForwardProxy {
    filter: DomainFilter,
    access_log: AccessLog,
    settings: HandlerSettings,
}

impl ForwardProxy {
    pub fn new(filter: DomainFilter, access_log: AccessLog, settings: HandlerSettings) -> Self {
        Self {
            filter,
            access_log,
            settings,
        }
    }

    /// Serves one accepted client stream to completion and closes it.
    pub async fn handle_connection<S>(&self, mut client: S) -> Outcome
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let raw = read_request(
            &mut client,
            self.settings.request_read_timeout,
            self.settings.max_request_size,
        )
        .await;
        if raw.is_empty() {
            return Outcome::Invalid;
        }
        if raw.len() >= self.settings.max_request_size && !has_complete_head(&raw) {
            debug!(
                "Dropping connection: request head exceeds {} bytes",
                self.settings.max_request_size
            );
            return Outcome::Invalid;
        }

        let text = String::from_utf8_lossy(&raw).into_owned();
        if is_connect(&text) {
            // the tunnel owns the client stream from here on
            return self.handle_connect(client, &text).await;
        }

        let outcome = self.handle_plain(&mut client, &text, &raw).await;
        let _ = client.shutdown().await;
        outcome
    }

    async fn handle_plain<S>(&self, client: &mut S, text: &str, raw: &[u8]) -> Outcome
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request = match ParsedRequest::parse(text) {
            Ok(request) => request,
            Err(e) => {
                debug!("Dropping connection: {}", e);
                return Outcome::Invalid;
            }
        };

        if self.filter.is_ignored(&request.host) || request.target_url.ends_with(FAVICON_SUFFIX) {
            return Outcome::Ignored;
        }

        if self.filter.is_blacklisted(&request.host) {
            self.block(client, &request.target_url).await;
            return Outcome::Blocked;
        }

        match relay_plain(client, &request, raw, &self.settings, &self.access_log).await {
            Ok(relayed) => Outcome::Relayed(relayed),
            Err(e) => self.report_upstream_failure(&request.host, request.port, &e),
        }
    }

    async fn handle_connect<S>(&self, mut client: S, text: &str) -> Outcome
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let target = match ConnectTarget::parse(text) {
            Ok(target) => target,
            Err(e) => {
                debug!("Dropping CONNECT: {}", e);
                return Outcome::Invalid;
            }
        };

        if self.filter.is_ignored(&target.host) {
            return Outcome::Ignored;
        }

        if self.filter.is_blacklisted(&target.host) {
            self.block(&mut client, &target.host).await;
            let _ = client.shutdown().await;
            return Outcome::Blocked;
        }

        match open_tunnel(client, &target, self.settings.connect_timeout, self.settings.relay_buffer_size).await {
            Ok(stats) => Outcome::Tunneled {
                client_to_server: stats.client_to_server,
                server_to_client: stats.server_to_client,
            },
            Err(e) => self.report_upstream_failure(&target.host, target.port, &e),
        }
    }

    async fn block<S>(&self, client: &mut S, target: &str)
    where
        S: AsyncWrite + Unpin,
    {
        if let Err(e) = client.write_all(blocked_response(target).as_bytes()).await {
            debug!("Failed to send blocked response for {}: {}", target, e);
        }
        self.access_log.record(target, || format!("{} - 403 Forbidden", target));
    }

    fn report_upstream_failure(&self, host: &str, port: u16, error: &ProxyError) -> Outcome {
        if !error.is_connect_failure() {
            self.access_log
                .diagnostic(&format!("Error relaying to {}:{}: {}", host, port, error));
            return Outcome::Aborted;
        }

        if error.is_benign_connect_failure() {
            debug!("Upstream {}:{} unavailable: {}", host, port, error);
        } else {
            self.access_log
                .diagnostic(&format!("Error connecting to {}:{}: {}", host, port, error));
        }
        Outcome::UpstreamUnavailable
    }
}

pub fn blocked_response(target: &str) -> String {
    format!(
        "HTTP/1.1 403 Forbidden\r\n\
         Content-Type: text/html\r\n\
         \r\n\
         <html><body><h1>Access Denied</h1><p>This site is blocked: {}</p></body></html>",
        target
    )
}
