//! Configuration types for nzb-triage
//!
//! Options arrive as plain values; loading them from files or the environment is
//! the embedding application's job. Every field has a serde default so a partial
//! JSON/TOML document deserializes into a complete [`TriageOptions`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Duration;

/// NNTP server configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NntpServerConfig {
    /// Server hostname
    pub host: String,

    /// Server port (default: 119; typically 563 for TLS)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Username for AUTHINFO
    #[serde(default)]
    pub user: Option<String>,

    /// Password for AUTHINFO
    #[serde(default)]
    pub pass: Option<String>,

    /// Use implicit TLS (not STARTTLS)
    #[serde(default)]
    pub use_tls: bool,
}

impl NntpServerConfig {
    /// Create a plain-text configuration without credentials
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            user: None,
            pass: None,
            use_tls: false,
        }
    }

    /// `host:port` socket address string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Options for one [`triage`](crate::TriageEngine::triage) call
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TriageOptions {
    /// Directories searched for already-staged archive files (default: none)
    #[serde(default)]
    pub archive_dirs: Vec<PathBuf>,

    /// NNTP server; `None` disables all network checks
    #[serde(default)]
    pub nntp_config: Option<NntpServerConfig>,

    /// Global deadline for the whole batch (default: 35000)
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,

    /// Cap on decoded bytes kept from a fetched article (default: 65536)
    #[serde(default = "default_max_decoded_bytes")]
    pub max_decoded_bytes: usize,

    /// Size of the NNTP connection pool (default: 60)
    #[serde(default = "default_nntp_max_connections")]
    pub nntp_max_connections: usize,

    /// Reuse the engine's shared pool across calls (default: true)
    #[serde(default = "default_true")]
    pub reuse_nntp_pool: bool,

    /// Idle keep-alive probe interval, 0 disables (default: 0)
    #[serde(default)]
    pub nntp_keep_alive_ms: u64,

    /// Maximum NZBs analyzed concurrently (default: unlimited)
    #[serde(default)]
    pub max_parallel_nzbs: Option<usize>,

    /// Extra STAT probes on the primary archive's other segments (default: 1)
    #[serde(default = "default_sample_count")]
    pub stat_sample_count: usize,

    /// Other archive candidates probed with STAT (default: 1)
    #[serde(default = "default_sample_count")]
    pub archive_sample_count: usize,

    /// Timeout for TCP connect, TLS handshake, greeting and auth (default: 10000)
    #[serde(default = "default_connect_timeout_ms")]
    pub nntp_connect_timeout_ms: u64,

    /// Timeout for a single STAT/BODY exchange (default: 15000)
    #[serde(default = "default_command_timeout_ms")]
    pub nntp_command_timeout_ms: u64,

    /// Shared pool idle longer than this is rebuilt instead of reused (default: 300000)
    #[serde(default = "default_shared_pool_idle_timeout_ms")]
    pub shared_pool_idle_timeout_ms: u64,
}

impl Default for TriageOptions {
    fn default() -> Self {
        Self {
            archive_dirs: Vec::new(),
            nntp_config: None,
            health_check_timeout_ms: default_health_check_timeout_ms(),
            max_decoded_bytes: default_max_decoded_bytes(),
            nntp_max_connections: default_nntp_max_connections(),
            reuse_nntp_pool: true,
            nntp_keep_alive_ms: 0,
            max_parallel_nzbs: None,
            stat_sample_count: default_sample_count(),
            archive_sample_count: default_sample_count(),
            nntp_connect_timeout_ms: default_connect_timeout_ms(),
            nntp_command_timeout_ms: default_command_timeout_ms(),
            shared_pool_idle_timeout_ms: default_shared_pool_idle_timeout_ms(),
        }
    }
}

impl TriageOptions {
    /// Reject option combinations that cannot run
    pub fn validate(&self) -> Result<()> {
        if self.health_check_timeout_ms == 0 {
            return Err(config_error(
                "health_check_timeout_ms must be greater than zero",
                "health_check_timeout_ms",
            ));
        }
        if self.max_decoded_bytes == 0 {
            return Err(config_error(
                "max_decoded_bytes must be greater than zero",
                "max_decoded_bytes",
            ));
        }
        if self.nntp_max_connections == 0 {
            return Err(config_error(
                "nntp_max_connections must be greater than zero",
                "nntp_max_connections",
            ));
        }
        if self.max_parallel_nzbs == Some(0) {
            return Err(config_error(
                "max_parallel_nzbs must be greater than zero when set",
                "max_parallel_nzbs",
            ));
        }
        if let Some(server) = &self.nntp_config
            && server.host.trim().is_empty()
        {
            return Err(config_error("nntp_config.host is empty", "nntp_config.host"));
        }
        Ok(())
    }

    /// Global batch deadline
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    /// Keep-alive interval, `None` when disabled
    pub fn keep_alive(&self) -> Option<Duration> {
        (self.nntp_keep_alive_ms > 0).then(|| Duration::from_millis(self.nntp_keep_alive_ms))
    }

    /// Connect/handshake timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.nntp_connect_timeout_ms)
    }

    /// Per-command timeout
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.nntp_command_timeout_ms)
    }

    /// Activity window of the shared pool
    pub fn shared_pool_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.shared_pool_idle_timeout_ms)
    }

    /// Number of workers for a batch of `nzb_count` payloads
    pub fn worker_count(&self, nzb_count: usize) -> usize {
        match self.max_parallel_nzbs {
            Some(limit) => limit.min(nzb_count),
            None => nzb_count,
        }
    }

    /// Key identifying a pool built from these options.
    ///
    /// Encodes everything that makes two pools incompatible, so a shared pool is
    /// never handed to a caller with different credentials, TLS mode, size or
    /// keep-alive. The password only enters as a truncated SHA-256 digest so the
    /// key is safe to log.
    pub fn pool_key(&self) -> Option<String> {
        let server = self.nntp_config.as_ref()?;
        let pass_digest = server.pass.as_deref().map(|pass| {
            let digest = Sha256::digest(pass.as_bytes());
            digest
                .iter()
                .take(6)
                .map(|b| format!("{:02x}", b))
                .collect::<String>()
        });
        Some(format!(
            "{}:{}|{}|{}|tls={}|conns={}|ka={}",
            server.host,
            server.port,
            server.user.as_deref().unwrap_or(""),
            pass_digest.as_deref().unwrap_or(""),
            server.use_tls,
            self.nntp_max_connections,
            self.nntp_keep_alive_ms
        ))
    }
}

// Conversion to nntp-rs's ServerConfig, used for TLS sessions
impl From<NntpServerConfig> for nntp_rs::ServerConfig {
    fn from(config: NntpServerConfig) -> Self {
        nntp_rs::ServerConfig {
            host: config.host,
            port: config.port,
            tls: config.use_tls,
            allow_insecure_tls: false,
            username: config.user.unwrap_or_default(),
            password: config.pass.unwrap_or_default(),
        }
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn default_port() -> u16 {
    119
}

fn default_true() -> bool {
    true
}

fn default_health_check_timeout_ms() -> u64 {
    35_000
}

fn default_max_decoded_bytes() -> usize {
    65_536
}

fn default_nntp_max_connections() -> usize {
    60
}

fn default_sample_count() -> usize {
    1
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_command_timeout_ms() -> u64 {
    15_000
}

fn default_shared_pool_idle_timeout_ms() -> u64 {
    300_000
}
