//! Configuration loading and root folder resolution

use crate::{Error, Result};
use std::path::PathBuf;

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>, env_var_name: &str) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Ok(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        return Ok(PathBuf::from(path));
    }

    // Priority 3: TOML config file
    if let Ok(config_path) = load_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(root_folder) = config.get("root_folder").and_then(|v| v.as_str()) {
                    return Ok(PathBuf::from(root_folder));
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    Ok(get_default_root_folder())
}

/// Get default configuration file path for the platform
fn load_config_file() -> Result<PathBuf> {
    if cfg!(target_os = "linux") {
        // Try ~/.config/scrobd/config.toml first, then /etc/scrobd/config.toml
        let user_config = dirs::config_dir().map(|d| d.join("scrobd").join("config.toml"));
        let system_config = PathBuf::from("/etc/scrobd/config.toml");

        if let Some(path) = user_config {
            if path.exists() {
                return Ok(path);
            }
        }
        if system_config.exists() {
            return Ok(system_config);
        }
        return Err(Error::Config("No config file found".to_string()));
    }

    let config_path = dirs::config_dir()
        .map(|d| d.join("scrobd").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

    if config_path.exists() {
        Ok(config_path)
    } else {
        Err(Error::Config(format!(
            "Config file not found: {:?}",
            config_path
        )))
    }
}

/// Get OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("scrobd"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/scrobd"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("scrobd"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/scrobd"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("scrobd"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\scrobd"))
    } else {
        PathBuf::from("./scrobd_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_arg_wins() {
        let path = resolve_root_folder(Some("/tmp/explicit"), "SCROBD_TEST_UNSET_VAR").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/explicit"));
    }

    #[test]
    fn falls_back_to_default_without_cli_or_env() {
        let path = resolve_root_folder(None, "SCROBD_TEST_UNSET_VAR").unwrap();
        assert!(!path.as_os_str().is_empty());
    }
}
