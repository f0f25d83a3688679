use keptn::secrets::{DtCredentials, SecretStore};

const PROJECT_SECRET_PREFIX: &str = "dynatrace-credentials-";
const GENERIC_SECRET: &str = "dynatrace-credentials";
const FALLBACK_SECRET: &str = "dynatrace";

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("could not find any Dynatrace specific secrets with the following names: {}", .names.join(","))]
pub struct CredentialsError {
    /// Every name that was tried, in order
    pub names: Vec<String>,
}

/// Secret names in lookup order: the configured one, the per-project one,
/// then the generic defaults. Empty names are dropped.
pub fn candidate_secret_names(configured: &str, project: &str) -> Vec<String> {
    [
        configured.to_string(),
        format!("{PROJECT_SECRET_PREFIX}{project}"),
        GENERIC_SECRET.to_string(),
        FALLBACK_SECRET.to_string(),
    ]
    .into_iter()
    .filter(|name| !name.is_empty())
    .collect()
}

/// Returns the credentials of the first candidate secret that exists, with
/// the name of that secret. Lookup errors move on to the next candidate.
pub async fn resolve_credentials(
    store: &dyn SecretStore,
    configured: &str,
    project: &str,
) -> Result<(String, DtCredentials), CredentialsError> {
    let names = candidate_secret_names(configured, project);

    for name in &names {
        match store.get_credentials(name).await {
            Ok(Some(credentials)) => {
                tracing::info!(
                    secret = %name,
                    tenant = %credentials.tenant,
                    "Found Dynatrace credentials"
                );
                let credentials = DtCredentials {
                    tenant: normalize_tenant_url(&credentials.tenant),
                    ..credentials
                };
                return Ok((name.clone(), credentials));
            }
            Ok(None) => tracing::debug!(secret = %name, "Secret not found"),
            Err(e) => tracing::debug!(secret = %name, error = %e, "Could not read secret"),
        }
    }

    Err(CredentialsError { names })
}

/// Prefixes `https://` unless the tenant already carries an http(s) scheme.
pub fn normalize_tenant_url(tenant: &str) -> String {
    if tenant.starts_with("https://") || tenant.starts_with("http://") {
        tenant.to_string()
    } else {
        format!("https://{tenant}")
    }
}
