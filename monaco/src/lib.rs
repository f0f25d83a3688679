//! Keptn service that applies Dynatrace configuration with monaco.
//!
//! Events arrive on the ingest listener and are handled one at a time by a
//! single worker: resolve the monaco config and credentials, materialize the
//! monaco projects into a workspace, run monaco, report back to Keptn.

pub mod archive;
pub mod command;
pub mod config;
pub mod credentials;
pub mod downloader;
pub mod errors;
pub mod handler;
pub mod metrics_defs;
pub mod monaco_config;
pub mod placeholders;
pub mod resolver;
pub mod service;
pub mod workspace;

use crate::config::{Config, ExecutionMode};
use crate::errors::ServiceError;
use crate::handler::MonacoHandler;
use crate::service::{EVENT_QUEUE_SIZE, EventIngestService, run_worker};
use keptn::events::CloudEvent;
use keptn::resources::{
    ConfigurationService, LocalResourceStore, ResourceContent, ResourceScope, ResourceStore,
};
use keptn::secrets::{EnvSecretStore, KubernetesSecretStore, SecretStore};
use keptn::sender::{EventSender, HttpEventSender, LogEventSender};
use shared::http::run_http_service;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

pub async fn run(config: Config) -> Result<(), ServiceError> {
    config.validate()?;
    tracing::info!(
        mode = ?config.execution_mode,
        configuration_service = %config.configuration_service,
        "Starting monaco service"
    );

    let handler = Arc::new(build_handler(&config)?);
    let (queue, events) = mpsc::channel(EVENT_QUEUE_SIZE);

    let worker = tokio::spawn(run_worker(handler, events));

    let ingest = EventIngestService::new(queue);
    let result = run_http_service(&config.listener.host, config.listener.port, ingest).await;

    worker.abort();
    result
}

/// Handles a single event read from a JSON file, without starting a listener.
pub async fn process_event_file(config: Config, path: &Path) -> Result<(), ServiceError> {
    config.validate()?;

    let body = tokio::fs::read(path).await?;
    let event = CloudEvent::from_json(&body).map_err(errors::MonacoError::from)?;

    build_handler(&config)?.handle(&event).await?;
    Ok(())
}

/// Stores a local file as a Keptn resource at the narrowest scope given.
pub async fn upload_resource(
    config: &Config,
    scope: ResourceScope,
    uri: &str,
    file: &Path,
) -> Result<(), ServiceError> {
    let content = tokio::fs::read(file).await?;
    let store = resource_store(config)?;

    store
        .create_resources(
            &scope,
            &[ResourceContent {
                uri: uri.to_string(),
                content,
            }],
        )
        .await?;
    Ok(())
}

pub fn build_handler(config: &Config) -> Result<MonacoHandler, ServiceError> {
    let secrets: Arc<dyn SecretStore> = if config.execution_mode.uses_environment_secrets() {
        Arc::new(EnvSecretStore::from_env())
    } else {
        Arc::new(KubernetesSecretStore::in_cluster(&config.pod_namespace)?)
    };

    let sender: Arc<dyn EventSender> = if config.execution_mode.sends_events() {
        Arc::new(HttpEventSender::new(&config.event_broker))
    } else {
        Arc::new(LogEventSender)
    };

    Ok(MonacoHandler::new(config, resource_store(config)?, secrets, sender))
}

fn resource_store(config: &Config) -> Result<Arc<dyn ResourceStore>, ServiceError> {
    Ok(match config.execution_mode {
        ExecutionMode::Local => Arc::new(LocalResourceStore::new(&config.local_resource_dir)),
        ExecutionMode::Cluster | ExecutionMode::LocalTest => {
            Arc::new(ConfigurationService::new(&config.configuration_service)?)
        }
    })
}
