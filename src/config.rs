//! `Conf` — the configuration collaborator named in spec §6: `TopDir`,
//! `PoolDir`, `CPoolDir`, `Conf.PoolSizeNightlyUpdatePeriod`,
//! `Conf.XferLogLevel`, and the host list, loaded from a TOML file.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{MaintError, Result};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Deserialize, Clone)]
pub struct Conf {
    /// Root of the per-host working areas (`TopDir`).
    pub top_dir: PathBuf,
    /// Root of the uncompressed pool (`PoolDir`, compression class 0).
    pub pool_dir: PathBuf,
    /// Root of the compressed pool (`CPoolDir`, compression class 1).
    pub cpool_dir: PathBuf,
    /// Period (in shard-octets) of the full-scan rotation; one of
    /// `{0,1,2,4,8,16}`, `0` disables full scans entirely.
    #[serde(default = "default_nightly_period")]
    pub pool_size_nightly_update_period: u8,
    /// Verbosity floor for the transfer/maintenance log.
    #[serde(default = "default_xfer_log_level")]
    pub xfer_log_level: u8,
    /// Hosts to reconcile in global mode.
    #[serde(default)]
    pub hosts: Vec<String>,
}

fn default_nightly_period() -> u8 {
    1
}

fn default_xfer_log_level() -> u8 {
    0
}

const VALID_PERIODS: [u8; 6] = [0, 1, 2, 4, 8, 16];

impl Conf {
    /// Loads configuration from a TOML file at `path`.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MaintError::Config(format!("cannot read config file: {e}")))?;
        let conf: Conf = toml::from_str(&content)
            .map_err(|e| MaintError::Config(format!("invalid TOML: {e}")))?;
        conf.validate()?;
        Ok(conf)
    }

    /// Root directory for pool objects of the given compression class.
    pub fn pool_root(&self, class: u8) -> &std::path::Path {
        if class == 0 {
            &self.pool_dir
        } else {
            &self.cpool_dir
        }
    }

    /// Per-host working directory: `<TopDir>/<host>`.
    pub fn host_dir(&self, host: &str) -> PathBuf {
        self.top_dir.join(host)
    }

    fn validate(&self) -> Result<()> {
        if !VALID_PERIODS.contains(&self.pool_size_nightly_update_period) {
            return Err(MaintError::Config(format!(
                "pool_size_nightly_update_period must be one of {VALID_PERIODS:?}, got {}",
                self.pool_size_nightly_update_period
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_conf(body: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_minimal_conf_with_defaults() {
        let f = write_conf(
            r#"
            top_dir = "/var/lib/backuppc"
            pool_dir = "/var/lib/backuppc/pool"
            cpool_dir = "/var/lib/backuppc/cpool"
            "#,
        );
        let conf = Conf::from_file(f.path()).unwrap();
        assert_eq!(conf.pool_size_nightly_update_period, 1);
        assert_eq!(conf.xfer_log_level, 0);
        assert!(conf.hosts.is_empty());
    }

    #[test]
    fn rejects_invalid_nightly_period() {
        let f = write_conf(
            r#"
            top_dir = "/t"
            pool_dir = "/p"
            cpool_dir = "/c"
            pool_size_nightly_update_period = 3
            "#,
        );
        assert!(Conf::from_file(f.path()).is_err());
    }

    #[test]
    fn pool_root_selects_by_class() {
        let f = write_conf(
            r#"
            top_dir = "/t"
            pool_dir = "/p"
            cpool_dir = "/c"
            "#,
        );
        let conf = Conf::from_file(f.path()).unwrap();
        assert_eq!(conf.pool_root(0), std::path::Path::new("/p"));
        assert_eq!(conf.pool_root(1), std::path::Path::new("/c"));
    }
}
