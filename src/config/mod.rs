use std::fmt;
use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment};

use serde::Deserialize;
use source::TomlTableSource;

use crate::path::GetConfigFilePathError;

pub mod source;

/// Profile loaded when none is named.
pub const DEFAULT_PROFILE: &str = "default";

/// Refresh margin used when the config doesn't set `token_refresh_margin_secs`.
pub const DEFAULT_TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(thiserror::Error, Debug)]
pub enum LoadConfigError {
    #[error("Failed to get config file path: {0}")]
    FailedToGetConfigFilePath(#[from] GetConfigFilePathError),

    #[error("Failed to build config: {0}")]
    FailedToBuildConfig(#[from] ConfigError),
}

#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
pub struct KeyVaultConfig {
    /// The vault (or Managed HSM) URL, e.g. `https://myvault.vault.azure.net`
    pub keyvault_url: Option<String>,
    /// Tenant used for token requests until a challenge names one
    pub tenant_id: Option<String>,
    /// Application (client) ID of the service principal
    pub client_id: Option<String>,
    /// Client secret of the service principal
    pub client_secret: Option<String>,
    /// Entra ID authority, defaults to `https://login.microsoftonline.com`
    pub authority_host: Option<String>,
    /// Skip checking that the challenge resource belongs to the vault's domain
    pub disable_challenge_resource_verification: Option<bool>,
    /// Seconds before expiry at which a cached token is refreshed
    pub token_refresh_margin_secs: Option<u64>,
}

impl fmt::Debug for KeyVaultConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyVaultConfig")
            .field("keyvault_url", &self.keyvault_url)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("authority_host", &self.authority_host)
            .field(
                "disable_challenge_resource_verification",
                &self.disable_challenge_resource_verification,
            )
            .field("token_refresh_margin_secs", &self.token_refresh_margin_secs)
            .finish()
    }
}

impl KeyVaultConfig {
    pub fn verify_challenge_resource(&self) -> bool {
        !self.disable_challenge_resource_verification.unwrap_or(false)
    }

    pub fn token_refresh_margin(&self) -> Duration {
        self.token_refresh_margin_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_REFRESH_MARGIN)
    }
}

/// Load the config from the default file and environment variables for a given profile
/// If no profile name is provided, the default profile is loaded
pub fn load_config(profile_name: Option<&str>) -> Result<KeyVaultConfig, LoadConfigError> {
    let config_file_path = crate::path::config_file()?;

    load_config_from_file(config_file_path, true, profile_name)
}

/// Load the config for a given file and profile, optionally loading environment variables
pub fn load_config_from_file(
    config_file_path: impl AsRef<Path>,
    load_environment_variables: bool,
    profile_name: Option<&str>,
) -> Result<KeyVaultConfig, LoadConfigError> {
    let config_file_path = config_file_path.as_ref();

    // Layers (from lowest to highest precedence):
    // 1. The global table of the file
    // 2. The profile table of the file
    // 3. AZURE_* environment variables (optionally loaded for testing)
    let mut config_builder = Config::builder()
        .add_source(TomlTableSource::global(config_file_path))
        .add_source(TomlTableSource::profile(
            config_file_path,
            profile_name.unwrap_or(DEFAULT_PROFILE),
        ));

    if load_environment_variables {
        // AZURE_KEYVAULT_URL -> keyvault_url, AZURE_TENANT_ID -> tenant_id, ...
        config_builder =
            config_builder.add_source(Environment::with_prefix("AZURE").try_parsing(true));
    }

    let config = config_builder.build()?;

    Ok(config.try_deserialize::<KeyVaultConfig>()?)
}
