//! Structured logging setup
//!
//! Logs go to stderr so `check` and `run` keep stdout for command output.
//! `RUST_LOG` overrides the configured level.

use anyhow::Result;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

/// Output layout of log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid log format: {}", s)),
        }
    }
}

/// `--verbose` raises the level to at least DEBUG
pub fn effective_level(level: Level, verbose: bool) -> Level {
    if verbose && level < Level::DEBUG {
        Level::DEBUG
    } else {
        level
    }
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

/// Install the global subscriber
pub fn init_tracing(level: Level, format: LogFormat, verbose: bool) -> Result<()> {
    let level = effective_level(level, verbose);
    let builder = fmt()
        .with_max_level(level)
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr);

    let installed = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tracing::{debug, info, info_span};

    /// Collects formatted log output in memory
    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
        }
    }

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("Pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert_eq!("compact".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_verbose_raises_level() {
        assert_eq!(effective_level(Level::INFO, true), Level::DEBUG);
        assert_eq!(effective_level(Level::INFO, false), Level::INFO);
        assert_eq!(effective_level(Level::TRACE, true), Level::TRACE);
        assert_eq!(effective_level(Level::ERROR, true), Level::DEBUG);
    }

    #[test]
    fn test_level_filtering() {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = fmt()
            .with_max_level(Level::INFO)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            info!("kept line");
            debug!("dropped line");
        });

        let output = capture.contents();
        assert!(output.contains("kept line"));
        assert!(!output.contains("dropped line"));
    }

    #[test]
    fn test_json_lines_carry_span_fields() {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = fmt()
            .json()
            .with_max_level(Level::INFO)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let span = info_span!("tool_call", request_id = "req-1", client_id = "-");
            let _guard = span.enter();
            info!(program = "oc", "Executing command");
        });

        let output = capture.contents();
        let line: serde_json::Value = serde_json::from_str(output.lines().next().unwrap()).unwrap();
        assert_eq!(line["fields"]["message"], "Executing command");
        assert_eq!(line["fields"]["program"], "oc");
        assert_eq!(line["span"]["request_id"], "req-1");
    }
}
