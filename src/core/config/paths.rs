//! Filesystem locations used by the server.
//!
//! The root holds the public `config.yml`. The data directory holds the
//! secrets file, an optional config override and the logs. Both default to
//! the working directory and can be moved through the environment.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_ROOT: &str = "RAGCHAT_ROOT";
pub const ENV_DATA_DIR: &str = "RAGCHAT_DATA_DIR";

const CONFIG_FILE: &str = "config.yml";
const SECRETS_FILE: &str = "secrets.yaml";
const LOG_DIR: &str = "logs";

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub root: PathBuf,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub secrets_path: PathBuf,
}

impl AppPaths {
    pub fn from_env() -> Self {
        let root = env::var_os(ENV_ROOT)
            .map(PathBuf::from)
            .unwrap_or_else(default_root);
        let data_dir = env::var_os(ENV_DATA_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| root.clone());
        Self::with_dirs(root, data_dir)
    }

    /// Lays out paths under explicit directories. The log directory is
    /// created here; a failure surfaces later when logging opens its file.
    pub fn with_dirs(root: PathBuf, data_dir: PathBuf) -> Self {
        let log_dir = data_dir.join(LOG_DIR);
        let _ = fs::create_dir_all(&log_dir);

        Self {
            secrets_path: data_dir.join(SECRETS_FILE),
            root,
            data_dir,
            log_dir,
        }
    }

    pub fn public_config(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Per-installation config that replaces the public one when present.
    pub fn config_override(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE)
    }
}

/// The working directory when it has a config file, else the crate
/// directory when it has one, else the working directory anyway.
fn default_root() -> PathBuf {
    let cwd = env::current_dir().ok();
    if let Some(dir) = cwd.as_deref().filter(|dir| has_config(dir)) {
        return dir.to_path_buf();
    }

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    if has_config(&manifest_dir) {
        return manifest_dir;
    }

    cwd.unwrap_or(manifest_dir)
}

fn has_config(dir: &Path) -> bool {
    dir.join(CONFIG_FILE).is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_follows_root_and_data_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data = dir.path().join("data");

        let paths = AppPaths::with_dirs(dir.path().to_path_buf(), data.clone());

        assert!(paths.log_dir.is_dir());
        assert_eq!(paths.log_dir, data.join("logs"));
        assert_eq!(paths.secrets_path, data.join("secrets.yaml"));
        assert_eq!(paths.public_config(), dir.path().join("config.yml"));
        assert_eq!(paths.config_override(), data.join("config.yml"));
    }
}
