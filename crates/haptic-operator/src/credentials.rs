//! Dataplane API credentials from a Kubernetes Secret

use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use tracing::debug;

use crate::{OperatorError, Result};

/// Per-instance Data Plane API credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataplaneCredentials {
    pub username: String,
    pub password: String,
}

impl DataplaneCredentials {
    /// Extract credentials from secret data (`username` / `password` keys).
    pub fn from_secret(secret: &Secret) -> Result<Self> {
        let data = secret
            .data
            .as_ref()
            .ok_or_else(|| OperatorError::Credentials("secret has no data".to_string()))?;
        let field = |key: &str| -> Result<String> {
            let bytes = data
                .get(key)
                .ok_or_else(|| OperatorError::Credentials(format!("secret is missing '{key}'")))?;
            String::from_utf8(bytes.0.clone())
                .map_err(|_| OperatorError::Credentials(format!("'{key}' is not UTF-8")))
        };
        Ok(Self {
            username: field("username")?,
            password: field("password")?,
        })
    }

    /// Fetch and parse the named secret.
    pub async fn load(client: Client, name: &str) -> Result<Self> {
        debug!(secret = name, "loading dataplane credentials");
        let api: Api<Secret> = Api::default_namespaced(client);
        let secret = api.get(name).await?;
        Self::from_secret(&secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn secret(entries: &[(&str, &str)]) -> Secret {
        Secret {
            data: Some(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_from_secret() {
        let creds = DataplaneCredentials::from_secret(&secret(&[
            ("username", "admin"),
            ("password", "s3cret"),
        ]))
        .unwrap();
        assert_eq!(creds.username, "admin");
        assert_eq!(creds.password, "s3cret");
    }

    #[test]
    fn test_missing_key_rejected() {
        let err = DataplaneCredentials::from_secret(&secret(&[("username", "admin")]))
            .unwrap_err();
        assert!(err.to_string().contains("password"));
    }
}
