use crate::blacklist::Blacklist;
use crate::config::Config;
use crate::domain_filter::DomainFilter;
use crate::error::ProxyError;
use crate::forward_proxy::{ForwardProxy, HandlerSettings};
use crate::log_throttle::LogThrottle;
use crate::logging::{AccessLog, LogSink};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Accept loop: one task per client connection, no cap.
pub struct ProxyServer {
    proxy: ForwardProxy,
    listen_addr: SocketAddr,
}

impl ProxyServer {
    pub fn new(proxy: ForwardProxy, listen_addr: SocketAddr) -> Self {
        Self { proxy, listen_addr }
    }

    pub fn from_config(config: &Config, blacklist: Blacklist, sink: Arc<dyn LogSink>) -> Self {
        info!("Creating forward proxy on {}", config.listen_addr);
        debug!(
            "Proxy settings - ignored domains: {:?}, blacklist entries: {}",
            config.ignored_domains,
            blacklist.len()
        );

        let filter = DomainFilter::new(blacklist, config.ignored_domains.clone());
        let throttle = Arc::new(LogThrottle::new(config.log_throttle_interval()));
        let access_log = AccessLog::new(throttle, sink);
        let proxy = ForwardProxy::new(filter, access_log, HandlerSettings::from(config));

        Self::new(proxy, config.listen_addr)
    }

    pub async fn run(self) -> Result<(), ProxyError> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        info!("Proxy server started on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serves an already bound listener. Only returns if the listener itself
    /// becomes unusable; per-connection failures never reach here.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ProxyError> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let proxy = self.proxy.clone();
            tokio::spawn(async move {
                let outcome = proxy.handle_connection(stream).await;
                debug!("Connection from {} finished: {:?}", peer, outcome);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemorySink;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_serves_concurrent_clients() {
        let mut config = Config::default();
        config.request_read_timeout_ms = 200;
        let sink = Arc::new(MemorySink::new());
        let server = ProxyServer::from_config(&config, Blacklist::from_entries(["blocked.com"]), sink.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.serve(listener));

        let mut clients = Vec::new();
        for i in 0..4 {
            clients.push(tokio::spawn(async move {
                let mut stream = TcpStream::connect(addr).await.unwrap();
                let request = format!("GET http://blocked.com/{} HTTP/1.1\r\nHost: blocked.com\r\n\r\n", i);
                stream.write_all(request.as_bytes()).await.unwrap();
                let mut response = String::new();
                stream.read_to_string(&mut response).await.unwrap();
                response
            }));
        }

        for client in clients {
            let response = client.await.unwrap();
            assert!(response.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        }
        assert_eq!(sink.lines().len(), 4);
    }
}
