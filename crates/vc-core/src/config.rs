use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;
use utoipa::ToSchema;

pub const CURRENT_SCHEMA_VERSION: i32 = 1;

pub const ENV_PORT: &str = "VC_PORT";
pub const ENV_LAN_ENABLED: &str = "VC_LAN_ENABLED";
pub const ENV_LOG_PATH: &str = "VC_LOG_PATH";
pub const ENV_BATCH_SECS: &str = "VC_BATCH_SECS";
pub const ENV_NOTIFY_ON_JOIN: &str = "VC_NOTIFY_ON_JOIN";
pub const ENV_NOTIFY_ON_LEAVE: &str = "VC_NOTIFY_ON_LEAVE";
pub const ENV_NOTIFY_ON_WORLD_JOIN: &str = "VC_NOTIFY_ON_WORLD_JOIN";

/// Non-secret configuration. Stored as JSON in the data directory; missing or
/// corrupt files fall back to defaults so a bad edit never bricks startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Config {
    pub schema_version: i32,
    pub port: u16,
    pub lan_enabled: bool,
    pub log_path: String,
    pub batch_delay_secs: u32,
    pub notify_on_join: bool,
    pub notify_on_leave: bool,
    pub notify_on_world_join: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            port: 8737,
            lan_enabled: false,
            log_path: String::new(),
            batch_delay_secs: 3,
            notify_on_join: true,
            notify_on_leave: true,
            notify_on_world_join: true,
        }
    }
}

impl Config {
    pub fn load_from(path: &Path) -> Config {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Config::default(),
            Err(err) => {
                warn!(error = %err, "failed to read config file, using defaults");
                return Config::default();
            }
        };

        let cfg: Config = match serde_json::from_slice(&data) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!(error = %err, "config file is corrupt, using defaults");
                return Config::default();
            }
        };

        if cfg.schema_version != CURRENT_SCHEMA_VERSION {
            warn!(
                got = cfg.schema_version,
                expected = CURRENT_SCHEMA_VERSION,
                "config schema version mismatch, using defaults"
            );
            return Config::default();
        }

        cfg.normalized()
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        let mut cfg = self.clone();
        cfg.schema_version = CURRENT_SCHEMA_VERSION;
        let data = serde_json::to_vec_pretty(&cfg)?;
        write_atomic(path, &data)
    }

    pub fn normalized(mut self) -> Config {
        let defaults = Config::default();
        self.schema_version = CURRENT_SCHEMA_VERSION;
        if self.port == 0 {
            self.port = defaults.port;
        }
        self
    }

    /// Environment variables take priority over file values.
    pub fn apply_env_overrides(mut self) -> Config {
        if let Some(port) = env_parsed::<u16>(ENV_PORT) {
            if port > 0 {
                self.port = port;
            }
        }
        if let Ok(v) = std::env::var(ENV_LAN_ENABLED) {
            self.lan_enabled = parse_bool(&v);
        }
        if let Ok(v) = std::env::var(ENV_LOG_PATH) {
            if !v.is_empty() {
                self.log_path = v;
            }
        }
        if let Some(secs) = env_parsed::<u32>(ENV_BATCH_SECS) {
            self.batch_delay_secs = secs;
        }
        if let Ok(v) = std::env::var(ENV_NOTIFY_ON_JOIN) {
            self.notify_on_join = parse_bool(&v);
        }
        if let Ok(v) = std::env::var(ENV_NOTIFY_ON_LEAVE) {
            self.notify_on_leave = parse_bool(&v);
        }
        if let Ok(v) = std::env::var(ENV_NOTIFY_ON_WORLD_JOIN) {
            self.notify_on_world_join = parse_bool(&v);
        }
        self
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Write to a sibling temp file, then rename over the target.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}
