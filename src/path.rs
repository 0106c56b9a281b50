use std::path::PathBuf;

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GetConfigHomeDirectoryError {
    #[error("Could not determine config directory")]
    CouldNotDetermineConfigDir,
}

/// Get the path to the config directory for the current platform
///
/// On macOS, this is `~/Library/Application Support/azkeyvault`
/// On Linux, this is `~/.config/azkeyvault`
/// On Windows, this is `%APPDATA%\azkeyvault`
pub fn home_directory() -> Result<PathBuf, GetConfigHomeDirectoryError> {
    let config_dir =
        dirs::config_dir().ok_or(GetConfigHomeDirectoryError::CouldNotDetermineConfigDir)?;

    Ok(config_dir.join("azkeyvault"))
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GetConfigFilePathError {
    #[error("Could not determine config directory")]
    CouldNotDetermineConfigDir {
        #[from]
        source: GetConfigHomeDirectoryError,
    },
}

/// Get the path to the config file for the current platform
///
/// This is `config.toml` inside [`home_directory`].
pub fn config_file() -> Result<PathBuf, GetConfigFilePathError> {
    let config_home = home_directory()?;

    // e.g. ~/.config/azkeyvault/config.toml
    Ok(config_home.join("config.toml"))
}
