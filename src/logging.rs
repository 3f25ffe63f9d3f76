use crate::config::{LogFormat, LogLevel, LoggingConfig};
use crate::log_throttle::LogThrottle;
use chrono::{DateTime, Utc};
use log::info;
use serde_json::json;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Destination for access lines (`http://example.com/ - 200 OK`) and
/// upstream diagnostics. Fire-and-forget.
pub trait LogSink: Send + Sync {
    fn write_line(&self, line: &str);
}

/// Sends lines through the `log` facade under the `access` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggerSink;

impl LogSink for LoggerSink {
    fn write_line(&self, line: &str) {
        info!(target: "access", "{}", line);
    }
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

impl LogSink for MemorySink {
    fn write_line(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line.to_string());
    }
}

/// Access lines debounced per identity, plus unthrottled diagnostics, both
/// written to one sink.
#[derive(Clone)]
pub struct AccessLog {
    throttle: Arc<LogThrottle>,
    sink: Arc<dyn LogSink>,
}

impl AccessLog {
    pub fn new(throttle: Arc<LogThrottle>, sink: Arc<dyn LogSink>) -> Self {
        Self { throttle, sink }
    }

    /// Writes the line unless `identity` was logged within the throttle
    /// interval. Returns whether it was written.
    pub fn record(&self, identity: &str, line: impl FnOnce() -> String) -> bool {
        if !self.throttle.should_log(identity) {
            return false;
        }
        self.sink.write_line(&line());
        true
    }

    pub fn diagnostic(&self, line: &str) {
        self.sink.write_line(line);
    }
}

/// Installs env_logger. `RUST_LOG` still wins over the configured level.
pub fn init(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let level = config.level.to_string();
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));

    if config.format == LogFormat::Json {
        builder.format(|buf, record| {
            let timestamp: DateTime<Utc> = Utc::now();
            let timestamp_str = timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
            let log_entry = json!({
                "timestamp": timestamp_str,
                "level": record.level().to_string().to_lowercase(),
                "target": record.target(),
                "message": record.args().to_string(),
            });
            writeln!(buf, "{}", log_entry)
        });
    }

    builder.try_init()?;
    Ok(())
}

pub fn parse_log_level(s: &str) -> Result<LogLevel, Box<dyn std::error::Error + Send + Sync>> {
    match s.to_lowercase().as_str() {
        "trace" => Ok(LogLevel::Trace),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        _ => Err(format!("Invalid log level: {}. Must be one of: trace, debug, info, warn, error", s).into()),
    }
}

pub fn parse_log_format(s: &str) -> Result<LogFormat, Box<dyn std::error::Error + Send + Sync>> {
    match s.to_lowercase().as_str() {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        _ => Err(format!("Invalid log format: {}. Must be one of: text, json", s).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_keeps_order() {
        let sink = MemorySink::new();
        sink.write_line("first");
        sink.write_line("second");
        assert_eq!(sink.lines(), vec!["first", "second"]);
    }

    #[test]
    fn test_access_log_debounces_per_identity() {
        let sink = Arc::new(MemorySink::new());
        let log = AccessLog::new(Arc::new(LogThrottle::default()), sink.clone());

        assert!(log.record("http://a.com/", || "http://a.com/ - 200 OK".to_string()));
        assert!(!log.record("http://a.com/", || "http://a.com/ - 200 OK".to_string()));
        assert!(log.record("b.com", || "b.com - 403 Forbidden".to_string()));
        log.diagnostic("Error connecting to c.com:80: boom");
        log.diagnostic("Error connecting to c.com:80: boom");

        assert_eq!(
            sink.lines(),
            vec![
                "http://a.com/ - 200 OK",
                "b.com - 403 Forbidden",
                "Error connecting to c.com:80: boom",
                "Error connecting to c.com:80: boom",
            ]
        );
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("DEBUG").unwrap(), LogLevel::Debug);
        assert_eq!(parse_log_level("warn").unwrap(), LogLevel::Warn);
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_parse_log_format() {
        assert_eq!(parse_log_format("Json").unwrap(), LogFormat::Json);
        assert_eq!(parse_log_format("text").unwrap(), LogFormat::Text);
        assert!(parse_log_format("yaml").is_err());
    }
}
