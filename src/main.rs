use anyhow::{Context, Result, anyhow};
use blacklist_proxy::blacklist::Blacklist;
use blacklist_proxy::config::Config;
use blacklist_proxy::logging::{self, LoggerSink, parse_log_format, parse_log_level};
use blacklist_proxy::proxy::ProxyServer;
use clap::Parser;
use log::{error, info};
use std::path::Path;
use std::sync::Arc;
use tokio::signal;

#[derive(Parser)]
#[clap(
    version,
    about = "Forward proxy for HTTP and CONNECT tunnels with a domain blacklist"
)]
struct Args {
    #[clap(short, long, value_name = "FILE", help = "Configuration file path (JSON)")]
    config: Option<String>,

    #[clap(short, long, value_name = "ADDR", help = "Listen address (e.g., 0.0.0.0:8080)")]
    listen: Option<String>,

    #[clap(short, long, value_name = "FILE", help = "Blacklist file, one domain per line")]
    blacklist: Option<String>,

    #[clap(long, value_name = "LEVEL", help = "Log level: trace, debug, info, warn, error")]
    log_level: Option<String>,

    #[clap(long, value_name = "FORMAT", help = "Log format: text or json")]
    log_format: Option<String>,

    #[clap(long, value_name = "FILE", help = "Write a sample configuration file and exit")]
    generate_config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(config_file) = &args.generate_config {
        Config::default()
            .to_file(config_file)
            .with_context(|| format!("Failed to write {}", config_file))?;
        println!("Sample configuration file generated: {}", config_file);
        return Ok(());
    }

    let config = load_config(&args)?;
    config.validate()?;

    logging::init(&config.logging).map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    let blacklist = match Blacklist::load_or_create(&config.blacklist_file) {
        Ok(blacklist) => blacklist,
        Err(e) => {
            error!("Error loading blacklist: {}", e);
            Blacklist::new()
        }
    };

    let server = ProxyServer::from_config(&config, blacklist, Arc::new(LoggerSink));

    tokio::select! {
        result = server.run() => {
            result.context("Proxy server stopped")?;
        }
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(config_file) => {
            if !Path::new(config_file).exists() {
                return Err(anyhow!("Configuration file not found: {}", config_file));
            }
            Config::from_file(config_file).with_context(|| format!("Failed to load {}", config_file))?
        }
        None => Config::default(),
    };

    if let Some(listen) = &args.listen {
        config.listen_addr = listen
            .parse()
            .with_context(|| format!("Invalid listen address: {}", listen))?;
    }
    if let Some(blacklist) = &args.blacklist {
        config.blacklist_file = blacklist.clone();
    }
    if let Some(level) = &args.log_level {
        config.logging.level = parse_log_level(level).map_err(|e| anyhow!(e))?;
    }
    if let Some(format) = &args.log_format {
        config.logging.format = parse_log_format(format).map_err(|e| anyhow!(e))?;
    }

    Ok(config)
}
