//! Access to the Keptn configuration repository.
//!
//! Resources live in a hierarchy: project, stage, service. The
//! [`ConfigurationService`] talks to the configuration-service REST API, the
//! [`LocalResourceStore`] serves the same operations from a directory on disk
//! for running outside the cluster.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use shared::paths::{PathError, contained_join};
use std::path::{Path, PathBuf};

const LIST_PAGE_SIZE: &str = "50";

#[derive(thiserror::Error, Debug)]
pub enum ResourceError {
    #[error("configuration service request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("configuration service returned {status} for {url}")]
    Status { status: StatusCode, url: String },
    #[error("invalid configuration service URL: {0}")]
    InvalidUrl(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid resource path: {0}")]
    Path(#[from] PathError),
}

/// One level of the project/stage/service hierarchy.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceScope {
    Service {
        project: String,
        stage: String,
        service: String,
    },
    Stage {
        project: String,
        stage: String,
    },
    Project {
        project: String,
    },
}

impl ResourceScope {
    pub const fn level(&self) -> &'static str {
        match self {
            ResourceScope::Service { .. } => "service",
            ResourceScope::Stage { .. } => "stage",
            ResourceScope::Project { .. } => "project",
        }
    }

    fn path(&self) -> String {
        match self {
            ResourceScope::Service {
                project,
                stage,
                service,
            } => format!(
                "v1/project/{}/stage/{}/service/{}/resource",
                escape(project),
                escape(stage),
                escape(service)
            ),
            ResourceScope::Stage { project, stage } => format!(
                "v1/project/{}/stage/{}/resource",
                escape(project),
                escape(stage)
            ),
            ResourceScope::Project { project } => {
                format!("v1/project/{}/resource", escape(project))
            }
        }
    }
}

/// Identifies a resource for one service of one stage of a project.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRef {
    pub project: String,
    pub stage: String,
    pub service: String,
    pub uri: String,
}

impl ResourceRef {
    pub fn new(project: &str, stage: &str, service: &str, uri: &str) -> Self {
        ResourceRef {
            project: project.to_string(),
            stage: stage.to_string(),
            service: service.to_string(),
            uri: uri.to_string(),
        }
    }

    /// Same coordinates, different resource.
    pub fn with_uri(&self, uri: &str) -> Self {
        ResourceRef {
            uri: uri.to_string(),
            ..self.clone()
        }
    }

    /// Scopes in lookup order: service, stage, project.
    pub fn scopes(&self) -> [ResourceScope; 3] {
        [
            ResourceScope::Service {
                project: self.project.clone(),
                stage: self.stage.clone(),
                service: self.service.clone(),
            },
            self.stage_scope(),
            self.project_scope(),
        ]
    }

    pub fn stage_scope(&self) -> ResourceScope {
        ResourceScope::Stage {
            project: self.project.clone(),
            stage: self.stage.clone(),
        }
    }

    pub fn project_scope(&self) -> ResourceScope {
        ResourceScope::Project {
            project: self.project.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceContent {
    pub uri: String,
    pub content: Vec<u8>,
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetches a resource at exactly one scope. `Ok(None)` means the resource
    /// does not exist there.
    async fn get_resource(
        &self,
        scope: &ResourceScope,
        uri: &str,
    ) -> Result<Option<ResourceContent>, ResourceError>;

    /// Lists the URIs of all resources stored at a scope.
    async fn list_resources(&self, scope: &ResourceScope) -> Result<Vec<String>, ResourceError>;

    async fn create_resources(
        &self,
        scope: &ResourceScope,
        resources: &[ResourceContent],
    ) -> Result<(), ResourceError>;

    /// Whether the store distinguishes between scopes. Unscoped stores are
    /// queried once per lookup instead of once per scope.
    fn is_scoped(&self) -> bool {
        true
    }
}

fn escape(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceResponse {
    #[serde(rename = "resourceURI", default)]
    resource_uri: String,
    #[serde(default)]
    resource_content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceListResponse {
    #[serde(default)]
    resources: Vec<ResourceResponse>,
    #[serde(default)]
    next_page_key: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceUpload<'a> {
    #[serde(rename = "resourceURI")]
    resource_uri: &'a str,
    resource_content: String,
}

#[derive(Serialize)]
struct ResourceUploadRequest<'a> {
    resources: Vec<ResourceUpload<'a>>,
}

/// Client for the Keptn configuration-service.
pub struct ConfigurationService {
    client: reqwest::Client,
    base_url: String,
}

impl ConfigurationService {
    /// `base_url` may omit the scheme (`configuration-service:8080`), in which
    /// case plain http is assumed.
    pub fn new(base_url: &str) -> Result<Self, ResourceError> {
        let with_scheme = if base_url.starts_with("http://") || base_url.starts_with("https://") {
            base_url.to_string()
        } else {
            format!("http://{base_url}")
        };

        let parsed = url::Url::parse(&with_scheme)
            .map_err(|e| ResourceError::InvalidUrl(format!("{base_url}: {e}")))?;

        Ok(ConfigurationService {
            client: reqwest::Client::new(),
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn resource_url(&self, scope: &ResourceScope, uri: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            scope.path(),
            escape(uri.trim_start_matches('/'))
        )
    }
}

#[async_trait]
impl ResourceStore for ConfigurationService {
    async fn get_resource(
        &self,
        scope: &ResourceScope,
        uri: &str,
    ) -> Result<Option<ResourceContent>, ResourceError> {
        let url = self.resource_url(scope, uri);
        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Ok(None),
            status => return Err(ResourceError::Status { status, url }),
        }

        let resource = response.json::<ResourceResponse>().await?;
        let content = decode_content(&resource.resource_content);

        Ok(Some(ResourceContent {
            uri: uri.to_string(),
            content,
        }))
    }

    async fn list_resources(&self, scope: &ResourceScope) -> Result<Vec<String>, ResourceError> {
        let url = format!("{}/{}", self.base_url, scope.path());
        let mut uris = Vec::new();
        let mut next_page_key: Option<String> = None;

        loop {
            let mut request = self.client.get(&url).query(&[("pageSize", LIST_PAGE_SIZE)]);
            if let Some(ref key) = next_page_key {
                request = request.query(&[("nextPageKey", key)]);
            }

            let response = request.send().await?;
            match response.status() {
                StatusCode::OK => {}
                StatusCode::NOT_FOUND => break,
                status => return Err(ResourceError::Status { status, url }),
            }

            let page = response.json::<ResourceListResponse>().await?;
            uris.extend(page.resources.into_iter().map(|r| r.resource_uri));

            match page.next_page_key {
                Some(key) if !key.is_empty() && key != "0" => next_page_key = Some(key),
                _ => break,
            }
        }

        tracing::debug!(scope = scope.level(), count = uris.len(), "Listed resources");
        Ok(uris)
    }

    async fn create_resources(
        &self,
        scope: &ResourceScope,
        resources: &[ResourceContent],
    ) -> Result<(), ResourceError> {
        let url = format!("{}/{}", self.base_url, scope.path());
        let body = ResourceUploadRequest {
            resources: resources
                .iter()
                .map(|r| ResourceUpload {
                    resource_uri: &r.uri,
                    resource_content: BASE64.encode(&r.content),
                })
                .collect(),
        };

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(ResourceError::Status {
                status: response.status(),
                url,
            });
        }

        for resource in resources {
            tracing::info!(uri = %resource.uri, scope = scope.level(), "Uploaded resource");
        }
        Ok(())
    }
}

/// Resource content travels base64 encoded; anything that does not decode is
/// taken verbatim.
fn decode_content(raw: &str) -> Vec<u8> {
    BASE64
        .decode(raw.trim())
        .unwrap_or_else(|_| raw.as_bytes().to_vec())
}

/// Serves resources from a local directory. Scopes are ignored: a resource
/// URI maps directly to a file below the base directory.
pub struct LocalResourceStore {
    base_dir: PathBuf,
}

impl LocalResourceStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        LocalResourceStore {
            base_dir: base_dir.into(),
        }
    }

    fn file_path(&self, uri: &str) -> Result<PathBuf, PathError> {
        contained_join(&self.base_dir, uri.trim_start_matches('/'))
    }
}

#[async_trait]
impl ResourceStore for LocalResourceStore {
    async fn get_resource(
        &self,
        _scope: &ResourceScope,
        uri: &str,
    ) -> Result<Option<ResourceContent>, ResourceError> {
        let path = self.file_path(uri)?;

        match tokio::fs::read(&path).await {
            Ok(content) => {
                tracing::info!(path = %path.display(), "Loaded local file");
                Ok(Some(ResourceContent {
                    uri: uri.to_string(),
                    content,
                }))
            }
            Err(e) => {
                tracing::info!(path = %path.display(), error = %e, "No local file found");
                Ok(None)
            }
        }
    }

    async fn list_resources(&self, _scope: &ResourceScope) -> Result<Vec<String>, ResourceError> {
        let base_dir = self.base_dir.clone();
        tokio::task::spawn_blocking(move || list_local_files(&base_dir))
            .await
            .map_err(std::io::Error::other)?
    }

    async fn create_resources(
        &self,
        _scope: &ResourceScope,
        resources: &[ResourceContent],
    ) -> Result<(), ResourceError> {
        for resource in resources {
            let path = self.file_path(&resource.uri)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &resource.content).await?;
            tracing::info!(path = %path.display(), "Local file written");
        }
        Ok(())
    }

    fn is_scoped(&self) -> bool {
        false
    }
}

fn list_local_files(base_dir: &Path) -> Result<Vec<String>, ResourceError> {
    if !base_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut uris = Vec::new();
    for entry in walkdir::WalkDir::new(base_dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(base_dir) else {
            continue;
        };
        let uri = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        uris.push(format!("/{uri}"));
    }

    Ok(uris)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::TestKeptnServer;

    fn carts_ref(uri: &str) -> ResourceRef {
        ResourceRef::new("sockshop", "staging", "carts", uri)
    }

    #[test]
    fn test_scope_paths() {
        let [service, stage, project] = carts_ref("dynatrace/monaco.zip").scopes();
        assert_eq!(
            service.path(),
            "v1/project/sockshop/stage/staging/service/carts/resource"
        );
        assert_eq!(stage.path(), "v1/project/sockshop/stage/staging/resource");
        assert_eq!(project.path(), "v1/project/sockshop/resource");
    }

    #[test]
    fn test_resource_url_escapes_uri() {
        let store = ConfigurationService::new("configuration-service:8080").unwrap();
        let scope = carts_ref("").stage_scope();

        assert_eq!(
            store.resource_url(&scope, "/dynatrace/monaco.conf.yaml"),
            "http://configuration-service:8080/v1/project/sockshop/stage/staging/resource/dynatrace%2Fmonaco.conf.yaml"
        );
    }

    #[test]
    fn test_decode_content() {
        assert_eq!(decode_content("aGVsbG8="), b"hello");
        assert_eq!(decode_content("not base64!"), b"not base64!");
    }

    #[tokio::test]
    async fn test_configuration_service_get_and_list() {
        let server = TestKeptnServer::start(vec![
            (
                "/v1/project/sockshop/stage/staging/resource/dynatrace%2Fmonaco.zip".to_string(),
                r#"{"resourceURI": "/dynatrace/monaco.zip", "resourceContent": "emlwIGJ5dGVz"}"#
                    .to_string(),
            ),
            (
                "/v1/project/sockshop/stage/staging/resource".to_string(),
                r#"{"resources": [{"resourceURI": "/dynatrace/projects/a.yaml"}, {"resourceURI": "/helm/carts.tgz"}], "nextPageKey": "0"}"#
                    .to_string(),
            ),
        ])
        .await;

        let store = ConfigurationService::new(&server.url()).unwrap();
        let resource = carts_ref("dynatrace/monaco.zip");

        let [service, stage, _] = resource.scopes();
        assert_eq!(store.get_resource(&service, &resource.uri).await.unwrap(), None);

        let found = store.get_resource(&stage, &resource.uri).await.unwrap().unwrap();
        assert_eq!(found.content, b"zip bytes");

        let uris = store.list_resources(&stage).await.unwrap();
        assert_eq!(uris, vec!["/dynatrace/projects/a.yaml", "/helm/carts.tgz"]);
    }

    #[tokio::test]
    async fn test_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalResourceStore::new(dir.path());
        let scope = carts_ref("").project_scope();

        assert!(!store.is_scoped());
        assert_eq!(
            store.get_resource(&scope, "dynatrace/monaco.conf.yaml").await.unwrap(),
            None
        );

        store
            .create_resources(
                &scope,
                &[
                    ResourceContent {
                        uri: "/dynatrace/projects/infra/alerting.yaml".into(),
                        content: b"config: []".to_vec(),
                    },
                    ResourceContent {
                        uri: "dynatrace/monaco.conf.yaml".into(),
                        content: b"spec_version: '0.1'".to_vec(),
                    },
                ],
            )
            .await
            .unwrap();

        let loaded = store
            .get_resource(&scope, "dynatrace/monaco.conf.yaml")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.content, b"spec_version: '0.1'");

        let uris = store.list_resources(&scope).await.unwrap();
        assert_eq!(
            uris,
            vec![
                "/dynatrace/monaco.conf.yaml",
                "/dynatrace/projects/infra/alerting.yaml"
            ]
        );

        assert!(matches!(
            store.get_resource(&scope, "../outside").await,
            Err(ResourceError::Path(_))
        ));
    }
}
