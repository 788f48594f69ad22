//! Where the console keeps its files
//!
//! - **Dev mode** (debug builds only): a `config.yaml` in the working
//!   directory wins, and logs and history sit next to it.
//! - **Installed mode**: everything lives under the platform config
//!   directory, e.g. `~/.config/padmap` on Linux.

use std::path::{Path, PathBuf};
use tracing::debug;

const APP_DIR: &str = "padmap";

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config: PathBuf,
    /// Default target of the file log
    pub logs_dir: PathBuf,
    /// Console line history
    pub history: PathBuf,
}

impl AppPaths {
    /// Resolve paths for this machine
    ///
    /// Runs before logging is set up, so diagnostics go to stderr.
    pub fn detect() -> Self {
        #[cfg(debug_assertions)]
        {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            if cwd.join("config.yaml").exists() {
                eprintln!("[paths] DEV mode, using {}", cwd.display());
                return Self::rooted_at(cwd);
            }
        }

        let base = dirs::config_dir()
            .unwrap_or_else(|| {
                eprintln!("[paths] WARNING: no platform config dir, using current directory");
                PathBuf::from(".")
            })
            .join(APP_DIR);
        Self::rooted_at(base)
    }

    /// All paths under one directory
    pub fn rooted_at(base: PathBuf) -> Self {
        Self {
            config: base.join("config.yaml"),
            logs_dir: base.join("logs"),
            history: base.join("history.txt"),
        }
    }

    /// Directory for the daily JSON log, if file logging is on
    ///
    /// A `log_dir` from the config wins; `--log-file` alone falls back to
    /// [`AppPaths::logs_dir`].
    pub fn log_dir(&self, configured: Option<&Path>, requested: bool) -> Option<PathBuf> {
        match configured {
            Some(dir) => Some(dir.to_path_buf()),
            None if requested => Some(self.logs_dir.clone()),
            None => None,
        }
    }

    pub fn base_dir(&self) -> PathBuf {
        self.config
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Create the base directory if missing
    pub fn ensure_base_dir(&self) -> anyhow::Result<()> {
        let base = self.base_dir();
        if !base.exists() {
            debug!("Creating {}", base.display());
            std::fs::create_dir_all(&base)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rooted_paths() {
        let paths = AppPaths::rooted_at(PathBuf::from("/tmp/padmap-test"));
        assert_eq!(paths.config, PathBuf::from("/tmp/padmap-test/config.yaml"));
        assert_eq!(paths.logs_dir, PathBuf::from("/tmp/padmap-test/logs"));
        assert_eq!(paths.base_dir(), PathBuf::from("/tmp/padmap-test"));
    }

    #[test]
    fn test_log_dir_choice() {
        let paths = AppPaths::rooted_at(PathBuf::from("/tmp/padmap-test"));
        assert_eq!(paths.log_dir(None, false), None);
        assert_eq!(
            paths.log_dir(None, true),
            Some(PathBuf::from("/tmp/padmap-test/logs"))
        );
        let custom = Path::new("/var/log/padmap");
        assert_eq!(paths.log_dir(Some(custom), false), Some(custom.to_path_buf()));
        assert_eq!(paths.log_dir(Some(custom), true), Some(custom.to_path_buf()));
    }

    #[test]
    fn test_ensure_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::rooted_at(dir.path().join("nested"));
        paths.ensure_base_dir().unwrap();
        assert!(dir.path().join("nested").is_dir());
    }
}
