// File: cdk-core/src/auth/mod.rs
//
// Bearer-token lookup against a key file. Tokens are provisioned out of band.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use cdk_common::models::{Caller, Role};
pub use cdk_common::traits::auth_traits::CallerAuthenticator;

use crate::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyEntry {
    pub token: String,
    pub user_id: String,
    #[serde(default)]
    pub roles: Vec<Role>,
}

/// On-disk shape of the key file:
/// `{ "keys": [ { "token": "...", "user_id": "...", "roles": ["issuer"] } ] }`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    #[serde(default)]
    pub keys: Vec<ApiKeyEntry>,
}

impl ApiKeyConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: ApiKeyConfig = serde_json::from_str(&raw)?;
        info!(
            path = %path.as_ref().display(),
            keys = config.keys.len(),
            "Loaded API key file"
        );
        Ok(config)
    }
}

pub struct StaticKeyAuthenticator {
    callers: HashMap<String, Caller>,
}

impl StaticKeyAuthenticator {
    pub fn new(config: ApiKeyConfig) -> Self {
        let callers = config
            .keys
            .into_iter()
            .map(|k| (k.token, Caller::new(k.user_id, k.roles)))
            .collect();
        Self { callers }
    }
}

#[async_trait]
impl CallerAuthenticator for StaticKeyAuthenticator {
    async fn authenticate(&self, credential: Option<&str>) -> Result<Caller, Error> {
        let token = credential
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Auth("missing credential".into()))?;

        match self.callers.get(token) {
            Some(caller) => Ok(caller.clone()),
            None => {
                debug!("Rejected unknown bearer token");
                Err(Error::Auth("invalid credential".into()))
            }
        }
    }
}
