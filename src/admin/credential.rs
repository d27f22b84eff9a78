//! Node API credential
//!
//! Resolved once per admin operation, in order: the `DIRECTPV_ACCESS_KEY`
//! and `DIRECTPV_SECRET_KEY` environment variables, a JSON config file,
//! then the credentials Secret in the install namespace.

use crate::consts::{APP_CAPS_NAME, CREDENTIALS_SECRET_NAME, NAMESPACE};
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::Api;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

const ACCESS_KEY: &str = "accessKey";
const SECRET_KEY: &str = "secretKey";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

pub fn access_key_env() -> String {
    format!("{}_ACCESS_KEY", APP_CAPS_NAME)
}

pub fn secret_key_env() -> String {
    format!("{}_SECRET_KEY", APP_CAPS_NAME)
}

impl Credential {
    /// Both variables must be set
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        Some(Self {
            access_key: lookup(&access_key_env())?,
            secret_key: lookup(&secret_key_env())?,
        })
    }

    pub fn from_env() -> Option<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// JSON file `{"accessKey": .., "secretKey": ..}`
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn from_secret_data(data: &BTreeMap<String, ByteString>) -> Result<Self> {
        let field = |key: &str| {
            data.get(key)
                .map(|v| String::from_utf8_lossy(&v.0).into_owned())
                .ok_or_else(|| Error::Auth(format!("{} not found in secrets", key)))
        };
        Ok(Self {
            access_key: field(ACCESS_KEY)?,
            secret_key: field(SECRET_KEY)?,
        })
    }

    pub async fn from_secret(client: kube::Client) -> Result<Self> {
        let secrets: Api<Secret> = Api::namespaced(client, NAMESPACE);
        let secret = secrets.get(CREDENTIALS_SECRET_NAME).await?;
        Self::from_secret_data(&secret.data.unwrap_or_default())
    }

    /// Data for the credentials Secret
    pub fn to_secret_data(&self) -> BTreeMap<String, ByteString> {
        let mut data = BTreeMap::new();
        data.insert(ACCESS_KEY.into(), ByteString(self.access_key.clone().into_bytes()));
        data.insert(SECRET_KEY.into(), ByteString(self.secret_key.clone().into_bytes()));
        data
    }

    /// Resolve from env, then `config_file`, then the cluster Secret
    pub async fn resolve(config_file: Option<&Path>, client: Option<kube::Client>) -> Result<Self> {
        if let Some(cred) = Self::from_env() {
            return Ok(cred);
        }
        if let Some(path) = config_file {
            match Self::from_file(path) {
                Ok(cred) => return Ok(cred),
                Err(e) => debug!("Credential file {} not usable: {}", path.display(), e),
            }
        }
        match client {
            Some(client) => Self::from_secret(client).await,
            None => Err(Error::Auth("credential not found".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_from_env_needs_both() {
        let only_access = |key: &str| (key == "DIRECTPV_ACCESS_KEY").then(|| "a".to_string());
        assert!(Credential::from_env_with(only_access).is_none());

        let both = |key: &str| match key {
            "DIRECTPV_ACCESS_KEY" => Some("a".to_string()),
            "DIRECTPV_SECRET_KEY" => Some("s".to_string()),
            _ => None,
        };
        let cred = Credential::from_env_with(both).unwrap();
        assert_eq!(cred.access_key, "a");
        assert_eq!(cred.secret_key, "s");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"accessKey":"ak","secretKey":"sk"}}"#).unwrap();
        let cred = Credential::from_file(file.path()).unwrap();
        assert_eq!(cred.access_key, "ak");
        assert!(!format!("{:?}", cred).contains("sk"));
    }

    #[test]
    fn test_secret_data_round_trip() {
        let cred = Credential {
            access_key: "ak".into(),
            secret_key: "sk".into(),
        };
        assert_eq!(Credential::from_secret_data(&cred.to_secret_data()).unwrap(), cred);

        let mut data = cred.to_secret_data();
        data.remove(SECRET_KEY);
        assert_matches!(Credential::from_secret_data(&data), Err(Error::Auth(_)));
    }
}
