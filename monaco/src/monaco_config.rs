use crate::resolver::TieredResolver;
use keptn::events::KeptnEvent;
use keptn::resources::ResourceRef;
use serde::{Deserialize, Serialize};

pub const CONFIG_URI: &str = "dynatrace/monaco.conf.yaml";
pub const LOCAL_CONFIG_URI: &str = "dynatrace/_monaco.conf.yaml";

/// Secret name used when no monaco config names one.
pub const DEFAULT_CREDENTIALS_LABEL: &str = "dynatrace";

#[derive(thiserror::Error, Debug)]
#[error("could not parse {uri} for service {service} in stage {stage} in project {project}: {source}")]
pub struct MonacoConfigError {
    pub uri: String,
    pub project: String,
    pub stage: String,
    pub service: String,
    #[source]
    pub source: serde_yaml::Error,
}

/// Contents of `monaco.conf.yaml`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct MonacoConfigFile {
    #[serde(default)]
    pub spec_version: String,
    /// Secret holding the Dynatrace credentials; may contain placeholders
    #[serde(rename = "dtCreds", default, skip_serializing_if = "String::is_empty")]
    pub dt_creds: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<String>,
}

impl MonacoConfigFile {
    pub fn parse(content: &[u8]) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_slice(content)
    }

    /// Value for monaco's `-p` flag: the configured projects, or the Keptn
    /// project when none are configured.
    pub fn project_string(&self, keptn_project: &str) -> String {
        if self.projects.is_empty() {
            keptn_project.to_string()
        } else {
            self.projects.join(", ")
        }
    }
}

/// Loads the monaco config for the event's service. `Ok(None)` when no
/// level has a non-empty file.
pub async fn load_monaco_config(
    resolver: &TieredResolver,
    event: &KeptnEvent,
    uri: &str,
) -> Result<Option<MonacoConfigFile>, MonacoConfigError> {
    let resource = ResourceRef::new(&event.project, &event.stage, &event.service, uri);
    let Some(found) = resolver.resolve(&resource).await else {
        tracing::info!(uri, "No monaco config found, using defaults");
        return Ok(None);
    };

    if found.content.iter().all(u8::is_ascii_whitespace) {
        tracing::debug!(uri, "Monaco config is empty");
        return Ok(None);
    }

    let config = MonacoConfigFile::parse(&found.content).map_err(|source| MonacoConfigError {
        uri: uri.to_string(),
        project: event.project.clone(),
        stage: event.stage.clone(),
        service: event.service.clone(),
        source,
    })?;

    tracing::debug!(?config, "Loaded monaco config");
    Ok(Some(config))
}
