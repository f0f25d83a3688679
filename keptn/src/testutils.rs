//! In-memory stand-ins for the Keptn collaborators.

use crate::events::CloudEvent;
use crate::resources::{ResourceContent, ResourceError, ResourceScope, ResourceStore};
use crate::secrets::{DtCredentials, SecretError, SecretStore};
use crate::sender::{EventSender, SendError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// A scoped resource store backed by a map. Scopes can be made to fail and
/// every lookup is recorded.
#[derive(Default)]
pub struct InMemoryResourceStore {
    resources: Mutex<HashMap<(ResourceScope, String), Vec<u8>>>,
    failing_levels: Mutex<HashSet<&'static str>>,
    lookups: Mutex<Vec<(&'static str, String)>>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, scope: ResourceScope, uri: &str, content: impl Into<Vec<u8>>) {
        self.resources
            .lock()
            .unwrap()
            .insert((scope, normalize(uri)), content.into());
    }

    /// Every request against the given level ("service", "stage", "project") errors.
    pub fn fail_level(&self, level: &'static str) {
        self.failing_levels.lock().unwrap().insert(level);
    }

    /// `(level, uri)` of every `get_resource` call, in order.
    pub fn lookups(&self) -> Vec<(&'static str, String)> {
        self.lookups.lock().unwrap().clone()
    }

    fn check_level(&self, scope: &ResourceScope) -> Result<(), ResourceError> {
        if self.failing_levels.lock().unwrap().contains(scope.level()) {
            return Err(ResourceError::InvalidUrl(format!(
                "{} level unavailable",
                scope.level()
            )));
        }
        Ok(())
    }
}

fn normalize(uri: &str) -> String {
    uri.trim_start_matches('/').to_string()
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn get_resource(
        &self,
        scope: &ResourceScope,
        uri: &str,
    ) -> Result<Option<ResourceContent>, ResourceError> {
        self.lookups
            .lock()
            .unwrap()
            .push((scope.level(), normalize(uri)));
        self.check_level(scope)?;

        let resources = self.resources.lock().unwrap();
        Ok(resources
            .get(&(scope.clone(), normalize(uri)))
            .map(|content| ResourceContent {
                uri: uri.to_string(),
                content: content.clone(),
            }))
    }

    async fn list_resources(&self, scope: &ResourceScope) -> Result<Vec<String>, ResourceError> {
        self.check_level(scope)?;

        let resources = self.resources.lock().unwrap();
        let mut uris: Vec<String> = resources
            .keys()
            .filter(|(s, _)| s == scope)
            .map(|(_, uri)| format!("/{uri}"))
            .collect();
        uris.sort();
        Ok(uris)
    }

    async fn create_resources(
        &self,
        scope: &ResourceScope,
        resources: &[ResourceContent],
    ) -> Result<(), ResourceError> {
        self.check_level(scope)?;

        for resource in resources {
            self.insert(scope.clone(), &resource.uri, resource.content.clone());
        }
        Ok(())
    }
}

/// Secret store with a fixed set of secrets. Names listed as failing return
/// a retrieval error; every requested name is recorded.
#[derive(Default)]
pub struct StaticSecretStore {
    secrets: HashMap<String, DtCredentials>,
    failing: HashSet<String>,
    requested: Mutex<Vec<String>>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: &str, credentials: DtCredentials) -> Self {
        self.secrets.insert(name.to_string(), credentials);
        self
    }

    pub fn with_failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get_credentials(&self, name: &str) -> Result<Option<DtCredentials>, SecretError> {
        self.requested.lock().unwrap().push(name.to_string());

        if self.failing.contains(name) {
            return Err(SecretError::Retrieval {
                name: name.to_string(),
                reason: "forbidden".to_string(),
            });
        }
        Ok(self.secrets.get(name).cloned())
    }
}

/// Collects sent events for later inspection.
#[derive(Default)]
pub struct RecordingEventSender {
    events: Mutex<Vec<CloudEvent>>,
}

impl RecordingEventSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CloudEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSender for RecordingEventSender {
    async fn send(&self, event: CloudEvent) -> Result<(), SendError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

#[cfg(test)]
pub use server::TestKeptnServer;
