use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LeaseError, Result};

pub const STATE_DIR: &str = ".pathlease";
pub const CONFIG_FILE: &str = "config.yaml";
pub const DB_FILE: &str = "leases.db";

pub const ENV_DB: &str = "PATHLEASE_DB";
pub const ENV_LISTEN: &str = "PATHLEASE_LISTEN";
pub const ENV_REAPER_INTERVAL: &str = "PATHLEASE_REAPER_INTERVAL_SECS";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// SQLite file; `<root>/.pathlease/leases.db` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    pub listen: String,
    pub default_ttl_secs: u64,
    pub min_ttl_secs: u64,
    pub max_ttl_secs: u64,
    pub reaper_interval_secs: u64,
    pub lock_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database: None,
            listen: "127.0.0.1:7411".into(),
            default_ttl_secs: 3600,
            min_ttl_secs: 1,
            max_ttl_secs: 7 * 24 * 3600,
            reaper_interval_secs: 30,
            lock_timeout_ms: 5000,
        }
    }
}

impl ServiceConfig {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LeaseError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&raw)
    }

    /// Resolve the effective config for `root`: an explicit file if given,
    /// else `<root>/.pathlease/config.yaml` if present, else defaults; then
    /// environment overrides; then validation.
    pub fn resolve(root: &Path, explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => {
                let default_path = root.join(STATE_DIR).join(CONFIG_FILE);
                if default_path.exists() {
                    Self::load(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PATHLEASE_*` overrides; `lookup` is usually `std::env::var`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(db) = lookup(ENV_DB) {
            self.database = Some(PathBuf::from(db));
        }
        if let Some(listen) = lookup(ENV_LISTEN) {
            self.listen = listen;
        }
        if let Some(interval) = lookup(ENV_REAPER_INTERVAL) {
            self.reaper_interval_secs = interval.trim().parse().map_err(|_| {
                LeaseError::Config(format!("{ENV_REAPER_INTERVAL} must be an integer, got '{interval}'"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_ttl_secs == 0 {
            return Err(LeaseError::Config("min_ttl_secs must be at least 1".into()));
        }
        if self.min_ttl_secs > self.max_ttl_secs {
            return Err(LeaseError::Config(format!(
                "min_ttl_secs ({}) exceeds max_ttl_secs ({})",
                self.min_ttl_secs, self.max_ttl_secs
            )));
        }
        if !(self.min_ttl_secs..=self.max_ttl_secs).contains(&self.default_ttl_secs) {
            return Err(LeaseError::Config(format!(
                "default_ttl_secs ({}) must lie within [{}, {}]",
                self.default_ttl_secs, self.min_ttl_secs, self.max_ttl_secs
            )));
        }
        if self.reaper_interval_secs == 0 {
            return Err(LeaseError::Config("reaper_interval_secs must be at least 1".into()));
        }
        if self.lock_timeout_ms == 0 {
            return Err(LeaseError::Config("lock_timeout_ms must be at least 1".into()));
        }
        if self.listen.trim().is_empty() {
            return Err(LeaseError::Config("listen address cannot be empty".into()));
        }
        Ok(())
    }

    pub fn database_path(&self, root: &Path) -> PathBuf {
        match &self.database {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => root.join(path),
            None => root.join(STATE_DIR).join(DB_FILE),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

/// Walk up from `start` to the nearest directory holding `.pathlease` or
/// `.git`; fall back to `start` itself.
pub fn find_root(start: &Path) -> PathBuf {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join(STATE_DIR).exists() || dir.join(".git").exists() {
            return dir;
        }
        if !dir.pop() {
            return start.to_path_buf();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let c = ServiceConfig::default();
        c.validate().unwrap();
        assert_eq!(c.listen, "127.0.0.1:7411");
        assert_eq!(c.default_ttl_secs, 3600);
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let c = ServiceConfig::from_yaml("max_ttl_secs: 600\ndefault_ttl_secs: 300\n").unwrap();
        assert_eq!(c.max_ttl_secs, 600);
        assert_eq!(c.default_ttl_secs, 300);
        assert_eq!(c.reaper_interval_secs, 30);
        c.validate().unwrap();
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = ServiceConfig::from_yaml("ttl: 5\n").unwrap_err();
        assert_eq!(err.code(), "yaml_error");
    }

    #[test]
    fn invalid_bounds_are_config_errors() {
        let c = ServiceConfig {
            min_ttl_secs: 100,
            max_ttl_secs: 10,
            ..Default::default()
        };
        assert_eq!(c.validate().unwrap_err().code(), "config_error");
        let c = ServiceConfig {
            reaper_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(c.validate().unwrap_err().code(), "config_error");
    }

    #[test]
    fn env_overrides_win() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_DB, "/tmp/x.db"),
            (ENV_LISTEN, "0.0.0.0:9000"),
            (ENV_REAPER_INTERVAL, "5"),
        ]);
        let mut c = ServiceConfig::default();
        c.apply_overrides(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(c.database, Some(PathBuf::from("/tmp/x.db")));
        assert_eq!(c.listen, "0.0.0.0:9000");
        assert_eq!(c.reaper_interval_secs, 5);

        let mut c = ServiceConfig::default();
        let err = c
            .apply_overrides(|k| (k == ENV_REAPER_INTERVAL).then(|| "soon".to_string()))
            .unwrap_err();
        assert_eq!(err.code(), "config_error");
    }

    #[test]
    fn resolve_reads_default_file_under_root() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(STATE_DIR)).unwrap();
        std::fs::write(
            dir.path().join(STATE_DIR).join(CONFIG_FILE),
            "lock_timeout_ms: 250\n",
        )
        .unwrap();
        let c = ServiceConfig::resolve(dir.path(), None).unwrap();
        assert_eq!(c.lock_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn database_path_is_relative_to_root() {
        let root = Path::new("/work/repo");
        let mut c = ServiceConfig::default();
        assert_eq!(c.database_path(root), root.join(".pathlease/leases.db"));
        c.database = Some("state/l.db".into());
        assert_eq!(c.database_path(root), root.join("state/l.db"));
    }

    #[test]
    fn find_root_walks_up_to_marker() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(STATE_DIR)).unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_root(&nested), dir.path());
    }
}
