//! Command-line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Economic-impact analysis server: submit causal analyses, poll for results.
#[derive(Parser, Debug, Clone)]
#[command(name = "ei-server", version = ei_core::VERSION, about)]
pub struct Config {
    /// Port to listen on.
    #[arg(short, long, env = "EI_PORT", default_value = "3743")]
    pub port: u16,

    /// Bind address.
    #[arg(long, env = "EI_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Number of analysis workers.
    #[arg(long, env = "EI_WORKERS", default_value = "2")]
    pub workers: usize,

    /// Maximum number of CPU threads for estimation (0 = auto).
    #[arg(long, env = "EI_THREADS", default_value = "0")]
    pub threads: usize,

    /// JSON warehouse snapshot to serve panels from.
    #[arg(long, env = "EI_WAREHOUSE_SNAPSHOT")]
    pub warehouse_snapshot: Option<PathBuf>,

    /// Deadline for a single warehouse call, in milliseconds.
    #[arg(long, env = "EI_WAREHOUSE_TIMEOUT_MS", default_value = "30000")]
    pub warehouse_timeout_ms: u64,

    /// SQLite database for analysis records. In-memory store when omitted.
    #[arg(long, env = "EI_SQLITE_PATH")]
    pub sqlite_path: Option<PathBuf>,

    /// Enable the synthetic-control estimators (scm, augmented_scm).
    #[arg(long, env = "EI_SYNTHETIC_CONTROL")]
    pub synthetic_control: bool,

    /// Idle workers re-check the queue at this interval, in milliseconds.
    #[arg(long, env = "EI_POLL_INTERVAL_MS", default_value = "1000")]
    pub poll_interval_ms: u64,

    /// Maximum request body size in MiB.
    #[arg(long, env = "EI_MAX_BODY_MB", default_value = "4")]
    pub max_body_mb: usize,
}

impl Config {
    /// Settings consumed by the orchestrator.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            workers: self.workers.max(1),
            warehouse_timeout: Duration::from_millis(self.warehouse_timeout_ms),
            synthetic_control: self.synthetic_control,
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(10)),
        }
    }

    /// Body limit in bytes.
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_mb.saturating_mul(1024).saturating_mul(1024)
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Worker tasks.
    pub workers: usize,
    /// Per-call warehouse deadline.
    pub warehouse_timeout: Duration,
    /// Synthetic-control family enabled.
    pub synthetic_control: bool,
    /// Idle poll interval.
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            warehouse_timeout: ei_panel::DEFAULT_WAREHOUSE_TIMEOUT,
            synthetic_control: false,
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let cfg = Config::try_parse_from(["ei-server"]).unwrap();
        assert_eq!(cfg.port, 3743);
        assert!(cfg.sqlite_path.is_none());
        let engine = cfg.engine();
        assert_eq!(engine.workers, 2);
        assert_eq!(engine.warehouse_timeout, Duration::from_secs(30));
        assert!(!engine.synthetic_control);
    }

    #[test]
    fn flags_override() {
        let cfg = Config::try_parse_from([
            "ei-server",
            "--workers",
            "0",
            "--synthetic-control",
            "--warehouse-timeout-ms",
            "250",
            "--max-body-mb",
            "1",
        ])
        .unwrap();
        let engine = cfg.engine();
        assert_eq!(engine.workers, 1);
        assert!(engine.synthetic_control);
        assert_eq!(engine.warehouse_timeout, Duration::from_millis(250));
        assert_eq!(cfg.max_body_bytes(), 1024 * 1024);
    }
}
