use config::{Config, ConfigError, File as ConfigFile};
use glob::Pattern;
use serde::Deserialize;
use std::path::Path;

use crate::error::Error;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root of the exported archive tree.
    pub root_path: String,
    /// Glob patterns excluded from indexing, matched against relative paths.
    pub ignore_patterns: Vec<String>,
    /// Extraction/hashing workers. 0 means one per core.
    pub cpu_workers: usize,
    /// File-read workers. 0 means twice the core count, capped at 16.
    pub io_workers: usize,
    /// System CPU percentage above which the pools shed workers.
    pub cpu_ceiling_pct: f32,
    /// System memory percentage above which the pools shed workers.
    pub memory_ceiling_pct: f32,
    /// Per-item deadline; an item still running past this is abandoned.
    pub item_timeout_secs: u64,
    /// Retry attempts for transient read failures before the item fails.
    pub max_io_retries: u32,
    /// Retry attempts for a failing catalog write before the item fails.
    pub max_sink_retries: u32,
    pub db_path: String,
    pub state_path: String,
    /// When false, the scan-state store is cleared before scanning.
    pub resume: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root_path: String::new(),
            ignore_patterns: Vec::new(),
            cpu_workers: 0,
            io_workers: 0,
            cpu_ceiling_pct: 85.0,
            memory_ceiling_pct: 90.0,
            item_timeout_secs: 120,
            max_io_retries: 3,
            max_sink_retries: 3,
            db_path: "shoebox.db".to_string(),
            state_path: "scan_state.db".to_string(),
            resume: true,
        }
    }
}

impl AppConfig {
    pub fn resolved_cpu_workers(&self) -> usize {
        if self.cpu_workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.cpu_workers
        }
    }

    pub fn resolved_io_workers(&self) -> usize {
        if self.io_workers == 0 {
            (num_cpus::get() * 2).clamp(2, 16)
        } else {
            self.io_workers
        }
    }

    /// Reject limits a scan cannot run under. Called before any work starts;
    /// failures here are fatal.
    pub fn validate(&self) -> Result<(), Error> {
        if self.root_path.is_empty() {
            return Err(Error::Config("root_path is not set".to_string()));
        }
        let root = Path::new(&self.root_path);
        if !root.is_dir() {
            return Err(Error::Config(format!(
                "root_path '{}' is not a directory",
                self.root_path
            )));
        }
        if self.cpu_workers > 512 || self.io_workers > 512 {
            return Err(Error::Config(
                "worker counts above 512 are not supported".to_string(),
            ));
        }
        for (name, pct) in [
            ("cpu_ceiling_pct", self.cpu_ceiling_pct),
            ("memory_ceiling_pct", self.memory_ceiling_pct),
        ] {
            if !(pct > 0.0 && pct <= 100.0) {
                return Err(Error::Config(format!(
                    "{} must be within (0, 100], got {}",
                    name, pct
                )));
            }
        }
        if self.item_timeout_secs == 0 {
            return Err(Error::Config("item_timeout_secs must be at least 1".to_string()));
        }
        for pattern in &self.ignore_patterns {
            Pattern::new(pattern).map_err(|e| {
                Error::Config(format!("invalid ignore pattern '{}': {}", pattern, e))
            })?;
        }
        Ok(())
    }
}

pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_missing_root() {
        let config = AppConfig::default();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_ceiling() {
        let tmp = tempfile::tempdir().unwrap();
        let config = AppConfig {
            root_path: tmp.path().to_string_lossy().into_owned(),
            cpu_ceiling_pct: 0.0,
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_glob() {
        let tmp = tempfile::tempdir().unwrap();
        let config = AppConfig {
            root_path: tmp.path().to_string_lossy().into_owned(),
            ignore_patterns: vec!["[".to_string()],
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_accepts_defaults_with_root() {
        let tmp = tempfile::tempdir().unwrap();
        let config = AppConfig {
            root_path: tmp.path().to_string_lossy().into_owned(),
            ..AppConfig::default()
        };
        config.validate().unwrap();
        assert!(config.resolved_cpu_workers() >= 1);
        assert!(config.resolved_io_workers() >= 2);
    }
}
