//! `config` sources backed by one table of a TOML file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{ConfigError, Source, Value, ValueKind};

#[derive(thiserror::Error, Debug)]
pub enum ConfigSourceError {
    #[error("Failed to read file {0}: {1}")]
    FailedToReadFile(PathBuf, std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    FailedToParseTOML(#[from] toml::de::Error),

    #[error("Invalid profile {0}, was expecting table")]
    InvalidProfileExpectedTable(String),
}

impl From<ConfigSourceError> for ConfigError {
    fn from(error: ConfigSourceError) -> Self {
        ConfigError::Foreign(Box::new(error))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Table {
    /// Top-level keys, shared by every profile.
    Global,
    /// A `[name]` table, overriding the global keys.
    Profile(String),
}

/// Reads the scalar settings of one table of a TOML config file.
#[derive(Clone, Debug)]
pub struct TomlTableSource {
    path: PathBuf,
    table: Table,
}

impl TomlTableSource {
    pub fn global(path: impl Into<PathBuf>) -> Self {
        TomlTableSource {
            path: path.into(),
            table: Table::Global,
        }
    }

    pub fn profile(path: impl Into<PathBuf>, profile_name: impl Into<String>) -> Self {
        TomlTableSource {
            path: path.into(),
            table: Table::Profile(profile_name.into()),
        }
    }

    fn origin(&self) -> String {
        let table = match &self.table {
            Table::Global => "global",
            Table::Profile(name) => name.as_str(),
        };
        format!("{}#{table}", self.path.display())
    }

    fn read_table(&self) -> Result<toml::Table, ConfigSourceError> {
        let mut root = read_toml(&self.path)?;

        match &self.table {
            Table::Global => Ok(root),
            Table::Profile(name) => match root.remove(name) {
                Some(toml::Value::Table(profile)) => Ok(profile),
                Some(_) => Err(ConfigSourceError::InvalidProfileExpectedTable(name.clone())),
                // An unknown profile contributes nothing
                None => Ok(toml::Table::new()),
            },
        }
    }
}

impl Source for TomlTableSource {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<HashMap<String, Value>, ConfigError> {
        let origin = self.origin();
        let table = self.read_table()?;

        // Nested tables are other profiles; arrays and dates aren't settings
        Ok(table
            .into_iter()
            .filter_map(|(key, value)| {
                let kind = match value {
                    toml::Value::String(s) => ValueKind::String(s),
                    toml::Value::Integer(i) => ValueKind::I64(i),
                    toml::Value::Float(f) => ValueKind::Float(f),
                    toml::Value::Boolean(b) => ValueKind::Boolean(b),
                    toml::Value::Array(_) | toml::Value::Datetime(_) | toml::Value::Table(_) => {
                        return None;
                    }
                };
                Some((key, Value::new(Some(&origin), kind)))
            })
            .collect())
    }
}

fn read_toml(path: &Path) -> Result<toml::Table, ConfigSourceError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigSourceError::FailedToReadFile(path.to_path_buf(), e))?;

    Ok(toml::from_str(&content)?)
}
