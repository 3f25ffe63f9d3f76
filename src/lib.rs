pub mod blacklist;
pub mod config;
pub mod domain_filter;
pub mod error;
pub mod forward_proxy;
pub mod http_relay;
pub mod log_throttle;
pub mod logging;
pub mod proxy;
pub mod request;
pub mod tunnel;

pub use blacklist::Blacklist;
pub use config::Config;
pub use error::ProxyError;
pub use forward_proxy::{ForwardProxy, Outcome};
pub use proxy::ProxyServer;
