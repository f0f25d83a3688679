//! Dynatrace credential lookup.
//!
//! In the cluster, credentials are Kubernetes secrets in the service's
//! namespace carrying `DT_TENANT` and `DT_API_TOKEN`. Outside the cluster the
//! same two values are read from the process environment.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

pub const TENANT_KEY: &str = "DT_TENANT";
pub const API_TOKEN_KEY: &str = "DT_API_TOKEN";

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

#[derive(thiserror::Error, Debug)]
pub enum SecretError {
    #[error("could not initialize Kubernetes client: {0}")]
    ClientSetup(String),
    #[error("could not retrieve secret {name}: {reason}")]
    Retrieval { name: String, reason: String },
    #[error("secret {0} does not contain non-empty DT_TENANT and DT_API_TOKEN")]
    Invalid(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct DtCredentials {
    pub tenant: String,
    pub api_token: String,
}

impl DtCredentials {
    pub fn new(tenant: impl Into<String>, api_token: impl Into<String>) -> Self {
        DtCredentials {
            tenant: tenant.into(),
            api_token: api_token.into(),
        }
    }
}

// The token must never end up in logs.
impl fmt::Debug for DtCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DtCredentials")
            .field("tenant", &self.tenant)
            .field("api_token", &"***")
            .finish()
    }
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// `Ok(None)` means no secret with that name exists.
    async fn get_credentials(&self, name: &str) -> Result<Option<DtCredentials>, SecretError>;
}

/// Reads credentials from `DT_TENANT` / `DT_API_TOKEN`, whatever the secret name.
pub struct EnvSecretStore {
    vars: HashMap<String, String>,
}

impl EnvSecretStore {
    pub fn from_env() -> Self {
        Self::from_vars(shared::env::utf8_vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        EnvSecretStore {
            vars: vars
                .into_iter()
                .filter(|(key, _)| key == TENANT_KEY || key == API_TOKEN_KEY)
                .collect(),
        }
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_credentials(&self, name: &str) -> Result<Option<DtCredentials>, SecretError> {
        let tenant = self.vars.get(TENANT_KEY).filter(|v| !v.is_empty());
        let api_token = self.vars.get(API_TOKEN_KEY).filter(|v| !v.is_empty());

        match (tenant, api_token) {
            (Some(tenant), Some(api_token)) => {
                tracing::debug!(secret = name, "Using credentials from environment");
                Ok(Some(DtCredentials::new(tenant, api_token)))
            }
            _ => Ok(None),
        }
    }
}

#[derive(Deserialize)]
struct SecretResponse {
    #[serde(default)]
    data: HashMap<String, String>,
}

/// Fetches secrets through the Kubernetes API using the pod's service account.
pub struct KubernetesSecretStore {
    client: reqwest::Client,
    api_url: String,
    token: String,
    namespace: String,
}

impl KubernetesSecretStore {
    pub fn new(api_url: &str, token: &str, namespace: &str, client: reqwest::Client) -> Self {
        KubernetesSecretStore {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            namespace: namespace.to_string(),
        }
    }

    /// Builds a client from the in-cluster environment.
    pub fn in_cluster(namespace: &str) -> Result<Self, SecretError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| SecretError::ClientSetup("KUBERNETES_SERVICE_HOST is not set".into()))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT")
            .map_err(|_| SecretError::ClientSetup("KUBERNETES_SERVICE_PORT is not set".into()))?;

        let read = |file: &str| {
            std::fs::read(format!("{SERVICE_ACCOUNT_DIR}/{file}"))
                .map_err(|e| SecretError::ClientSetup(format!("could not read {file}: {e}")))
        };

        let token = String::from_utf8_lossy(&read("token")?).trim().to_string();
        let ca = reqwest::Certificate::from_pem(&read("ca.crt")?)
            .map_err(|e| SecretError::ClientSetup(e.to_string()))?;

        let client = reqwest::Client::builder()
            .add_root_certificate(ca)
            .build()
            .map_err(|e| SecretError::ClientSetup(e.to_string()))?;

        Ok(Self::new(&api_server_url(&host, &port), &token, namespace, client))
    }
}

fn api_server_url(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("https://[{host}]:{port}")
    } else {
        format!("https://{host}:{port}")
    }
}

#[async_trait]
impl SecretStore for KubernetesSecretStore {
    async fn get_credentials(&self, name: &str) -> Result<Option<DtCredentials>, SecretError> {
        let url = format!(
            "{}/api/v1/namespaces/{}/secrets/{}",
            self.api_url, self.namespace, name
        );
        let retrieval = |reason: String| SecretError::Retrieval {
            name: name.to_string(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| retrieval(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Ok(None),
            status => return Err(retrieval(format!("API server returned {status}"))),
        }

        let secret = response
            .json::<SecretResponse>()
            .await
            .map_err(|e| retrieval(e.to_string()))?;

        let decode = |key: &str| {
            secret
                .data
                .get(key)
                .and_then(|value| BASE64.decode(value).ok())
                .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
                .filter(|value| !value.is_empty())
        };

        match (decode(TENANT_KEY), decode(API_TOKEN_KEY)) {
            (Some(tenant), Some(api_token)) => Ok(Some(DtCredentials { tenant, api_token })),
            _ => Err(SecretError::Invalid(name.to_string())),
        }
    }
}
