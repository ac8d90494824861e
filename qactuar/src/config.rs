//! Process-wide configuration, immutable after init.
//!
//! Configuration is loaded from a JSON file named by the `QACTUAR_CONFIG`
//! environment variable. When the variable is unset or the file cannot be
//! read or parsed, defaults are used and a warning is reported to the
//! caller. Field names in the file are upper-case, matching the CLI
//! option table.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Environment variable naming the JSON config file.
pub const CONFIG_ENV_VAR: &str = "QACTUAR_CONFIG";

/// Which execution model drives the accept loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerType {
    SimpleFork,
    Prefork,
    AsyncOnly,
}

impl ServerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerType::SimpleFork => "simple_fork",
            ServerType::Prefork => "prefork",
            ServerType::AsyncOnly => "async_only",
        }
    }
}

impl FromStr for ServerType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "simple_fork" => Ok(ServerType::SimpleFork),
            "prefork" => Ok(ServerType::Prefork),
            "async_only" => Ok(ServerType::AsyncOnly),
            other => Err(format!(
                "unknown server type {other:?}; expected simple_fork, prefork or async_only"
            )),
        }
    }
}

impl std::fmt::Display for ServerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "HOST")]
    pub host: String,
    #[serde(rename = "PORT")]
    pub port: u16,
    #[serde(rename = "SERVER_TYPE")]
    pub server_type: ServerType,
    #[serde(rename = "LOG_LEVEL")]
    pub log_level: String,
    /// Seconds between worker-reap ticks (fork models).
    #[serde(rename = "CHECK_PROCESS_INTERVAL")]
    pub check_process_interval: f64,
    /// Bounded poll interval of the accept loops, in seconds.
    #[serde(rename = "SELECT_SLEEP_TIME")]
    pub select_sleep_time: f64,
    /// Per-recv socket timeout, in seconds.
    #[serde(rename = "RECV_TIMEOUT")]
    pub recv_timeout: f64,
    /// Per-recv byte budget.
    #[serde(rename = "RECV_BYTES")]
    pub recv_bytes: usize,
    /// Worker cap for the simple-fork model; excess load gets 503.
    #[serde(rename = "MAX_PROCESSES")]
    pub max_processes: usize,
    /// Pre-fork pool size; defaults to the host CPU count when unset.
    #[serde(rename = "PROCESS_POOL_SIZE")]
    pub process_pool_size: Option<usize>,
    /// Total idle-read budget for one request, in seconds.
    #[serde(rename = "REQUEST_TIMEOUT")]
    pub request_timeout: f64,
    #[serde(rename = "SSL_CERT_PATH")]
    pub ssl_cert_path: Option<PathBuf>,
    #[serde(rename = "SSL_KEY_PATH")]
    pub ssl_key_path: Option<PathBuf>,
    /// OpenSSL-style cipher list, matched against the TLS provider's
    /// suite names. Empty means provider defaults.
    #[serde(rename = "SSL_CIPHERS")]
    pub ssl_ciphers: String,
    /// Route prefix -> `"module:symbol"` application references.
    #[serde(rename = "APPS")]
    pub apps: BTreeMap<String, String>,
    #[serde(rename = "GATHER_PROC_STATS")]
    pub gather_proc_stats: bool,
    /// Extra log-target -> level directives for the logging collaborator.
    #[serde(rename = "LOGS")]
    pub logs: BTreeMap<String, String>,
    /// Extra directory prepended to the application search path; consumed
    /// by the application loader collaborator.
    #[serde(rename = "APP_DIR")]
    pub app_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
            server_type: ServerType::SimpleFork,
            log_level: "DEBUG".to_string(),
            check_process_interval: 1.0,
            select_sleep_time: 0.025,
            recv_timeout: 0.001,
            recv_bytes: 65536,
            max_processes: 500,
            process_pool_size: None,
            request_timeout: 5.0,
            ssl_cert_path: None,
            ssl_key_path: None,
            ssl_ciphers: String::new(),
            apps: BTreeMap::new(),
            gather_proc_stats: false,
            logs: BTreeMap::new(),
            app_dir: None,
        }
    }
}

impl Config {
    pub fn check_process_interval(&self) -> Duration {
        Duration::from_secs_f64(self.check_process_interval.max(0.0))
    }

    pub fn select_sleep(&self) -> Duration {
        Duration::from_secs_f64(self.select_sleep_time.max(0.0))
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.recv_timeout.max(0.0))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout.max(0.0))
    }

    /// Pre-fork pool size, defaulting to the host CPU count.
    pub fn pool_size(&self) -> usize {
        self.process_pool_size
            .unwrap_or_else(num_cpus::get)
            .max(1)
    }

    pub fn tls_configured(&self) -> bool {
        self.ssl_cert_path.is_some() && self.ssl_key_path.is_some()
    }
}

/// Load configuration from the file named by `QACTUAR_CONFIG`.
///
/// Returns the config plus an optional notice describing why defaults
/// were used; the caller logs the notice once logging is initialized.
pub fn config_init() -> (Config, Option<String>) {
    let path = match std::env::var(CONFIG_ENV_VAR) {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => {
            return (
                Config::default(),
                Some(format!(
                    "{CONFIG_ENV_VAR} is not set, loading default values. To use a config \
                     file, point {CONFIG_ENV_VAR} at a JSON config file path."
                )),
            );
        }
    };
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) => {
            return (
                Config::default(),
                Some(format!(
                    "could not read config file {}: {err}; loading default values",
                    path.display()
                )),
            );
        }
    };
    match serde_json::from_str::<Config>(&raw) {
        Ok(config) => (config, None),
        Err(err) => (
            Config::default(),
            Some(format!(
                "invalid config file {}: {err}; loading default values",
                path.display()
            )),
        ),
    }
}
