//! Configuration system: TOML file + env var overrides + smart defaults.
//!
//! The loaded [`Config`] is built once at process start and handed by
//! reference to the publisher and sweeper. Nothing re-reads it afterwards, so
//! the TTL is fixed for the lifetime of the process.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{AlmError, Result};
use crate::core::paths::{default_scratch_dir, resolve_absolute_path, trim_trailing_slash};

/// Full configuration model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub artifacts: ArtifactsConfig,
    pub sweep: SweepConfig,
    pub paths: PathsConfig,
}

/// Where publishable files live and where their public links go.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArtifactsConfig {
    /// Only regular files under this directory may be published.
    pub allowed_root: PathBuf,
    /// Publicly served directory receiving the links.
    pub scratch_dir: PathBuf,
    /// Seconds a link survives after its last modification.
    pub ttl_seconds: u64,
    /// URL path under which `scratch_dir` is served (e.g. `/tmp`).
    pub public_path: String,
}

/// Periodic sweep scheduling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SweepConfig {
    pub interval_secs: u64,
    pub dry_run: bool,
}

/// Filesystem paths used by alm itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub jsonl_log: PathBuf,
    pub sqlite_db: PathBuf,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            allowed_root: PathBuf::from("."),
            scratch_dir: default_scratch_dir(),
            ttl_seconds: 3_600,
            public_path: "/tmp".to_string(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 120,
            dry_run: false,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[ALM-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("alm").join("config.toml");
        let data = home_dir.join(".local").join("share").join("alm");
        Self {
            config_file: cfg,
            jsonl_log: data.join("activity.jsonl"),
            sqlite_db: data.join("activity.sqlite3"),
        }
    }
}

impl ArtifactsConfig {
    /// TTL as a `Duration`.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl SweepConfig {
    /// Interval between scheduled sweeps.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| AlmError::Io {
                path: path_buf.clone(),
                source,
            })?;
            Self::from_toml_str(&raw)?
        } else if is_explicit_path {
            return Err(AlmError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document without touching the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a keeps the value stable across processes and Rust releases.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("ALM_ARTIFACTS_ALLOWED_ROOT") {
            self.artifacts.allowed_root = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("ALM_ARTIFACTS_SCRATCH_DIR") {
            self.artifacts.scratch_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("ALM_ARTIFACTS_TTL_SECONDS") {
            self.artifacts.ttl_seconds = parse_env_u64("ALM_ARTIFACTS_TTL_SECONDS", &raw)?;
        }
        if let Some(raw) = lookup("ALM_ARTIFACTS_PUBLIC_PATH") {
            self.artifacts.public_path = raw;
        }
        if let Some(raw) = lookup("ALM_SWEEP_INTERVAL_SECS") {
            self.sweep.interval_secs = parse_env_u64("ALM_SWEEP_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("ALM_SWEEP_DRY_RUN") {
            self.sweep.dry_run = parse_env_bool("ALM_SWEEP_DRY_RUN", &raw)?;
        }
        Ok(())
    }

    /// Make directory paths absolute and comparable.
    fn normalize_paths(&mut self) {
        self.artifacts.allowed_root =
            trim_trailing_slash(&resolve_absolute_path(&self.artifacts.allowed_root));
        self.artifacts.scratch_dir =
            trim_trailing_slash(&resolve_absolute_path(&self.artifacts.scratch_dir));

        let public = self.artifacts.public_path.trim();
        let public = if public.len() > 1 {
            public.trim_end_matches('/')
        } else {
            public
        };
        self.artifacts.public_path = public.to_string();
    }

    fn validate(&self) -> Result<()> {
        if self.sweep.interval_secs == 0 {
            return Err(AlmError::InvalidConfig {
                details: "sweep.interval_secs must be >= 1".to_string(),
            });
        }

        if !self.artifacts.public_path.starts_with('/') {
            return Err(AlmError::InvalidConfig {
                details: format!(
                    "artifacts.public_path must start with '/', got {:?}",
                    self.artifacts.public_path
                ),
            });
        }

        if self.artifacts.scratch_dir == self.artifacts.allowed_root {
            return Err(AlmError::InvalidConfig {
                details: format!(
                    "artifacts.scratch_dir and artifacts.allowed_root must differ (both {})",
                    self.artifacts.scratch_dir.display()
                ),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_u64(name: &str, raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|error| AlmError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    raw.trim().parse::<bool>().map_err(|error| AlmError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
