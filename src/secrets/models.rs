//! JSON models of the Key Vault secrets API.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The identifier of a secret, e.g.
/// `https://myvault.vault.azure.net/secrets/db-password/4387e9f3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretId(pub String);

impl SecretId {
    fn segments(&self) -> Vec<&str> {
        let rest = self.0.split_once("://").map_or(self.0.as_str(), |(_, r)| r);
        let path = rest.split_once('/').map_or("", |(_, p)| p);
        let path = path.split(['?', '#']).next().unwrap_or_default();

        path.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// The secret's name.
    pub fn name(&self) -> Option<&str> {
        self.segments().get(1).copied()
    }

    /// The secret's version, absent for IDs of deleted secrets and of the
    /// latest version.
    pub fn version(&self) -> Option<&str> {
        self.segments().get(2).copied()
    }
}

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Management attributes of a secret. Timestamps are Unix seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    // Read-only, set by the service.
    #[serde(skip_serializing)]
    pub created: Option<i64>,
    #[serde(skip_serializing)]
    pub updated: Option<i64>,
    #[serde(skip_serializing)]
    pub recovery_level: Option<String>,
    #[serde(skip_serializing)]
    pub recoverable_days: Option<i32>,
}

/// A secret with its value.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    pub value: Option<String>,
    pub id: Option<SecretId>,
    pub content_type: Option<String>,
    pub attributes: Option<SecretAttributes>,
    pub tags: Option<HashMap<String, String>>,
    /// Set when the secret backs a certificate.
    pub kid: Option<String>,
    pub managed: Option<bool>,
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("value", &self.value.as_ref().map(|_| "<redacted>"))
            .field("id", &self.id)
            .field("content_type", &self.content_type)
            .field("attributes", &self.attributes)
            .field("tags", &self.tags)
            .field("kid", &self.kid)
            .field("managed", &self.managed)
            .finish()
    }
}

/// A secret that was deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedSecret {
    #[serde(flatten)]
    pub secret: Secret,
    /// Use this to recover or purge the secret.
    pub recovery_id: Option<SecretId>,
    pub deleted_date: Option<i64>,
    pub scheduled_purge_date: Option<i64>,
}

/// A secret's metadata without its value, as returned by the list operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretProperties {
    pub id: Option<SecretId>,
    pub content_type: Option<String>,
    pub attributes: Option<SecretAttributes>,
    pub tags: Option<HashMap<String, String>>,
    pub managed: Option<bool>,
}

/// One page of the list operation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretPropertiesPage {
    #[serde(default)]
    pub value: Vec<SecretProperties>,
    pub next_link: Option<String>,
}

/// The body of a set-secret request.
#[derive(Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetSecretParameters {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<SecretAttributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashMap<String, String>>,
}

impl SetSecretParameters {
    pub fn new(value: impl Into<String>) -> Self {
        SetSecretParameters {
            value: value.into(),
            ..Default::default()
        }
    }
}

impl fmt::Debug for SetSecretParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetSecretParameters")
            .field("value", &"<redacted>")
            .field("content_type", &self.content_type)
            .field("attributes", &self.attributes)
            .field("tags", &self.tags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn secret_id_exposes_name_and_version() {
        let id = SecretId("https://myvault.vault.azure.net/secrets/db-password/4387e9f3".into());
        assert_eq!(id.name(), Some("db-password"));
        assert_eq!(id.version(), Some("4387e9f3"));

        let latest = SecretId("https://myvault.vault.azure.net/secrets/db-password".into());
        assert_eq!(latest.name(), Some("db-password"));
        assert_eq!(latest.version(), None);

        let deleted = SecretId("https://myvault.vault.azure.net/deletedsecrets/db-password".into());
        assert_eq!(deleted.name(), Some("db-password"));

        let with_port = SecretId("https://localhost:8443/secrets/local/v1?api-version=7.5".into());
        assert_eq!(with_port.name(), Some("local"));
        assert_eq!(with_port.version(), Some("v1"));
    }

    #[test]
    fn secret_id_without_path_has_no_name() {
        let id = SecretId("https://myvault.vault.azure.net".into());
        assert_eq!(id.name(), None);
        assert_eq!(id.version(), None);
    }

    #[test]
    fn debug_output_redacts_values() {
        let secret = Secret {
            value: Some("hunter2".into()),
            ..Default::default()
        };
        let debug = format!("{secret:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));

        let parameters = SetSecretParameters::new("hunter2");
        assert!(!format!("{parameters:?}").contains("hunter2"));
    }

    #[test]
    fn read_only_attributes_are_not_serialized() {
        let attributes = SecretAttributes {
            enabled: Some(false),
            exp: Some(1735689600),
            created: Some(1493938410),
            recovery_level: Some("Purgeable".into()),
            ..Default::default()
        };

        assert_eq!(
            serde_json::to_value(&attributes).unwrap(),
            serde_json::json!({ "enabled": false, "exp": 1735689600 })
        );
    }
}
