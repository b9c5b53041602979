//! Configuration loading and data root resolution

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Data root resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_data_root(
    cli_arg: Option<&str>,
    env_var_name: &str,
    config_file_key: Option<&str>,
) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Ok(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        return Ok(PathBuf::from(path));
    }

    // Priority 3: TOML config file
    if let Some(key) = config_file_key {
        if let Ok(config_path) = find_config_file() {
            if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
                if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                    if let Some(data_root) = config.get(key).and_then(|v| v.as_str()) {
                        return Ok(PathBuf::from(data_root));
                    }
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    Ok(default_data_root())
}

/// Get default configuration file path for the platform
fn find_config_file() -> Result<PathBuf> {
    let config_path = if cfg!(target_os = "linux") {
        // Try ~/.config/geokey/config.toml first, then /etc/geokey/config.toml
        let user_config = dirs::config_dir().map(|d| d.join("geokey").join("config.toml"));
        let system_config = PathBuf::from("/etc/geokey/config.toml");

        if let Some(path) = user_config {
            if path.exists() {
                return Ok(path);
            }
        }
        if system_config.exists() {
            return Ok(system_config);
        }
        return Err(Error::Config("No config file found".to_string()));
    } else if cfg!(target_os = "macos") || cfg!(target_os = "windows") {
        dirs::config_dir()
            .map(|d| d.join("geokey").join("config.toml"))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?
    } else {
        return Err(Error::Config("Unsupported platform".to_string()));
    };

    if config_path.exists() {
        Ok(config_path)
    } else {
        Err(Error::Config(format!(
            "Config file not found: {:?}",
            config_path
        )))
    }
}

/// Get OS-dependent default data root path
fn default_data_root() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/geokey (or /var/lib/geokey for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("geokey"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/geokey"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/geokey
        dirs::data_dir()
            .map(|d| d.join("geokey"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/geokey"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\geokey
        dirs::data_local_dir()
            .map(|d| d.join("geokey"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\geokey"))
    } else {
        PathBuf::from("./geokey_data")
    }
}

/// Filesystem layout beneath the resolved data root.
///
/// The database file and uploaded media both live under one directory so a
/// deployment can be backed up or moved as a unit.
#[derive(Debug, Clone)]
pub struct DataRoot {
    root: PathBuf,
}

impl DataRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DataRoot { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.root.join("geokey.db")
    }

    /// Directory that stores uploaded media files.
    pub fn media_dir(&self) -> PathBuf {
        self.root.join("media")
    }

    /// Create the root and media directories if they do not exist yet.
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.media_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_argument_wins() {
        let resolved = resolve_data_root(Some("/tmp/geokey-cli"), "GEOKEY_TEST_UNSET", None)
            .expect("resolution should not fail");
        assert_eq!(resolved, PathBuf::from("/tmp/geokey-cli"));
    }

    #[test]
    fn env_var_beats_default() {
        std::env::set_var("GEOKEY_TEST_DATA", "/tmp/geokey-env");
        let resolved = resolve_data_root(None, "GEOKEY_TEST_DATA", None)
            .expect("resolution should not fail");
        std::env::remove_var("GEOKEY_TEST_DATA");
        assert_eq!(resolved, PathBuf::from("/tmp/geokey-env"));
    }

    #[test]
    fn data_root_layout() {
        let data_root = DataRoot::new("/srv/geokey");
        assert_eq!(data_root.database_path(), PathBuf::from("/srv/geokey/geokey.db"));
        assert_eq!(data_root.media_dir(), PathBuf::from("/srv/geokey/media"));
    }

    #[test]
    fn ensure_directories_creates_media_dir() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let data_root = DataRoot::new(tmp.path().join("nested"));
        data_root.ensure_directories().expect("create dirs");
        assert!(data_root.media_dir().is_dir());
    }
}
