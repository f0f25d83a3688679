use crate::command::run_monaco;
use crate::config::{Config, MonacoSettings};
use crate::credentials::resolve_credentials;
use crate::errors::MonacoError;
use crate::metrics_defs::{EVENTS_FINISHED, FILES_MATERIALIZED, MONACO_DURATION};
use crate::monaco_config::{DEFAULT_CREDENTIALS_LABEL, load_monaco_config};
use crate::placeholders::replace_placeholders;
use crate::resolver::TieredResolver;
use crate::workspace::{PreparedFiles, Workspace};
use keptn::events::{
    CloudEvent, EventData, KeptnEvent, ResultType, StatusType, TaskPhase, task_event_type,
};
use keptn::resources::ResourceStore;
use keptn::secrets::{DtCredentials, SecretStore};
use keptn::sender::EventSender;
use shared::{counter, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

pub const SERVICE_NAME: &str = "monaco-service";
pub const TASK_NAME: &str = "monaco";

const STARTED_MESSAGE: &str = "Starting to query for Monaco Projects";
const SUCCESS_MESSAGE: &str = "Successfully ran monaco!";
const CREDENTIALS_LABEL: &str = "DtCreds";

/// Runs the monaco task for `sh.keptn.event.monaco.triggered` events and
/// reports progress back to Keptn.
pub struct MonacoHandler {
    resolver: TieredResolver,
    secrets: Arc<dyn SecretStore>,
    sender: Arc<dyn EventSender>,
    workspace: Workspace,
    settings: MonacoSettings,
    config_uri: &'static str,
}

impl MonacoHandler {
    pub fn new(
        config: &Config,
        resources: Arc<dyn ResourceStore>,
        secrets: Arc<dyn SecretStore>,
        sender: Arc<dyn EventSender>,
    ) -> Self {
        MonacoHandler {
            resolver: TieredResolver::new(resources),
            secrets,
            sender,
            workspace: Workspace::new(&config.monaco.base_folder),
            settings: config.monaco.clone(),
            config_uri: config.monaco_config_uri(),
        }
    }

    /// Handles one inbound event. Task failures are reported through the
    /// finished event; an `Err` means the event could not be processed or
    /// answered at all.
    pub async fn handle(&self, event: &CloudEvent) -> Result<(), MonacoError> {
        if event.r#type != task_event_type(TASK_NAME, TaskPhase::Triggered) {
            tracing::info!(event_type = %event.r#type, id = %event.id, "Ignoring event");
            return Ok(());
        }

        let keptn_event = KeptnEvent::from_cloud_event(event)?;
        tracing::info!(
            context = %keptn_event.context,
            project = %keptn_event.project,
            stage = %keptn_event.stage,
            service = %keptn_event.service,
            "Handling monaco task"
        );

        let mut data = EventData {
            project: keptn_event.project.clone(),
            stage: keptn_event.stage.clone(),
            service: keptn_event.service.clone(),
            labels: keptn_event.labels.clone(),
            status: Some(StatusType::Succeeded),
            message: STARTED_MESSAGE.to_string(),
            ..Default::default()
        };
        self.send(event, TaskPhase::Started, &data).await?;

        let (result, message) = match self.run_task(&keptn_event, &mut data.labels).await {
            Ok(()) => {
                data.status = Some(StatusType::Succeeded);
                (ResultType::Pass, SUCCESS_MESSAGE.to_string())
            }
            Err(e) => {
                tracing::error!(context = %keptn_event.context, error = %e, "Monaco task failed");
                data.status = Some(StatusType::Errored);
                (ResultType::Fail, e.to_string())
            }
        };
        data.result = Some(result);
        data.message = message;

        counter!(EVENTS_FINISHED, "result" => result_tag(result)).increment(1);
        self.send(event, TaskPhase::Finished, &data).await
    }

    async fn run_task(
        &self,
        event: &KeptnEvent,
        labels: &mut HashMap<String, String>,
    ) -> Result<(), MonacoError> {
        let config_file = load_monaco_config(&self.resolver, event, self.config_uri)
            .await?
            .unwrap_or_default();

        let configured_secret = replace_placeholders(&config_file.dt_creds, event);
        let label = if configured_secret.is_empty() {
            DEFAULT_CREDENTIALS_LABEL.to_string()
        } else {
            configured_secret.clone()
        };
        labels.insert(CREDENTIALS_LABEL.to_string(), label);

        let (_, credentials) =
            resolve_credentials(self.secrets.as_ref(), &configured_secret, &event.project).await?;

        let projects = config_file.project_string(&event.project);
        let result = self.prepare_and_run(event, &credentials, &projects).await;

        if self.settings.keep_temp_dir {
            tracing::info!(context = %event.context, "Keeping monaco workspace");
        } else if let Err(e) = self.workspace.remove(&event.context).await {
            tracing::warn!(
                context = %event.context,
                error = %e,
                "Could not delete monaco workspace"
            );
        }

        result
    }

    async fn prepare_and_run(
        &self,
        event: &KeptnEvent,
        credentials: &DtCredentials,
        projects: &str,
    ) -> Result<(), MonacoError> {
        let prepared = self.workspace.prepare(&self.resolver, event).await?;
        let source = match prepared {
            PreparedFiles::Archive { .. } => "archive",
            PreparedFiles::Tree { .. } => "tree",
        };
        histogram!(FILES_MATERIALIZED, "source" => source).record(prepared.files().len() as f64);

        let projects_dir = self.workspace.projects_dir(&event.context)?;
        let started = Instant::now();
        let result = run_monaco(&self.settings, credentials, event, projects, &projects_dir).await;

        let tag = if result.is_ok() { "pass" } else { "fail" };
        histogram!(MONACO_DURATION, "result" => tag).record(started.elapsed().as_secs_f64());

        result?;
        Ok(())
    }

    async fn send(
        &self,
        triggered: &CloudEvent,
        phase: TaskPhase,
        data: &EventData,
    ) -> Result<(), MonacoError> {
        let event = CloudEvent::reply_to(
            triggered,
            task_event_type(TASK_NAME, phase),
            SERVICE_NAME,
            data,
        )?;
        self.sender.send(event).await?;
        Ok(())
    }
}

fn result_tag(result: ResultType) -> &'static str {
    match result {
        ResultType::Pass => "pass",
        ResultType::Warning => "warning",
        ResultType::Fail => "fail",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keptn::resources::ResourceRef;
    use keptn::testutils::{InMemoryResourceStore, RecordingEventSender, StaticSecretStore};
    use std::path::Path;

    const TRIGGERED: &str = r#"{
        "specversion": "1.0",
        "id": "triggered-1",
        "source": "shipyard-controller",
        "type": "sh.keptn.event.monaco.triggered",
        "shkeptncontext": "ctx-1",
        "data": {"project": "sockshop", "stage": "staging", "service": "carts", "labels": {"team": "a"}}
    }"#;

    struct Fixture {
        resources: Arc<InMemoryResourceStore>,
        sender: Arc<RecordingEventSender>,
        base: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                resources: Arc::new(InMemoryResourceStore::new()),
                sender: Arc::new(RecordingEventSender::new()),
                base: tempfile::tempdir().unwrap(),
            }
        }

        fn handler(&self, secrets: StaticSecretStore, settings: MonacoSettings) -> MonacoHandler {
            let mut config = Config::default();
            config.monaco = MonacoSettings {
                base_folder: self.base.path().join("monaco"),
                ..settings
            };
            MonacoHandler::new(
                &config,
                self.resources.clone(),
                Arc::new(secrets),
                self.sender.clone(),
            )
        }

        fn insert(&self, uri: &str, content: &str) {
            let scope = ResourceRef::new("sockshop", "staging", "carts", "").stage_scope();
            self.resources.insert(scope, uri, content);
        }

        fn finished(&self) -> EventData {
            let events = self.sender.events();
            assert_eq!(events.len(), 2);
            assert_eq!(events[0].r#type, "sh.keptn.event.monaco.started");
            assert_eq!(events[1].r#type, "sh.keptn.event.monaco.finished");
            assert_eq!(events[1].triggeredid.as_deref(), Some("triggered-1"));
            events[1].event_data().unwrap()
        }
    }

    fn triggered() -> CloudEvent {
        CloudEvent::from_json(TRIGGERED.as_bytes()).unwrap()
    }

    fn secrets() -> StaticSecretStore {
        StaticSecretStore::new().with_secret(
            "dynatrace",
            DtCredentials::new("abc.live.dynatrace.com", "dt0c01.token"),
        )
    }

    #[tokio::test]
    async fn test_ignores_other_events() {
        let fixture = Fixture::new();
        let handler = fixture.handler(secrets(), MonacoSettings::default());

        let mut event = triggered();
        event.r#type = "sh.keptn.event.deployment.finished".to_string();
        handler.handle(&event).await.unwrap();

        assert!(fixture.sender.events().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_event_data() {
        let fixture = Fixture::new();
        let handler = fixture.handler(secrets(), MonacoSettings::default());

        let mut event = triggered();
        event.data = serde_json::json!({"project": "sockshop"});
        assert!(matches!(
            handler.handle(&event).await,
            Err(MonacoError::Event(_))
        ));
        assert!(fixture.sender.events().is_empty());
    }

    #[tokio::test]
    async fn test_started_event() {
        let fixture = Fixture::new();
        let handler = fixture.handler(StaticSecretStore::new(), MonacoSettings::default());
        handler.handle(&triggered()).await.unwrap();

        let started = fixture.sender.events()[0].event_data().unwrap();
        assert_eq!(started.status, Some(StatusType::Succeeded));
        assert_eq!(started.message, "Starting to query for Monaco Projects");
        assert_eq!(started.project, "sockshop");
        assert_eq!(started.labels.get("team").unwrap(), "a");
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let fixture = Fixture::new();
        let handler = fixture.handler(StaticSecretStore::new(), MonacoSettings::default());
        handler.handle(&triggered()).await.unwrap();

        let finished = fixture.finished();
        assert_eq!(finished.status, Some(StatusType::Errored));
        assert_eq!(finished.result, Some(ResultType::Fail));
        assert!(finished.message.starts_with("Failed to fetch Dynatrace credentials"));
        assert!(finished.message.contains("dynatrace-credentials-sockshop"));
        assert_eq!(finished.labels.get("DtCreds").unwrap(), "dynatrace");
        assert_eq!(finished.labels.get("team").unwrap(), "a");
    }

    #[tokio::test]
    async fn test_malformed_monaco_config() {
        let fixture = Fixture::new();
        fixture.insert("dynatrace/monaco.conf.yaml", "projects: [unclosed\n");
        let handler = fixture.handler(secrets(), MonacoSettings::default());
        handler.handle(&triggered()).await.unwrap();

        let finished = fixture.finished();
        assert_eq!(finished.result, Some(ResultType::Fail));
        assert!(finished.message.contains("dynatrace/monaco.conf.yaml"));
    }

    #[tokio::test]
    async fn test_no_monaco_projects() {
        let fixture = Fixture::new();
        fixture.insert("dynatrace/monaco.conf.yaml", "dtCreds: dynatrace");
        let handler = fixture.handler(secrets(), MonacoSettings::default());
        handler.handle(&triggered()).await.unwrap();

        let finished = fixture.finished();
        assert_eq!(finished.result, Some(ResultType::Fail));
        assert!(finished.message.starts_with("Error preparing monaco files"));
    }

    #[cfg(unix)]
    fn fake_monaco(dir: &Path, exit_code: i32) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-monaco");
        let script = format!(
            "#!/bin/sh\necho \"$DT_ENVIRONMENT_URL $*\" >> \"{}\"\nexit {exit_code}\n",
            dir.join("calls.log").display()
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_run() {
        let fixture = Fixture::new();
        fixture.insert(
            "dynatrace/monaco.conf.yaml",
            "dtCreds: dynatrace-$PROJECT\nprojects: [infra, apps]",
        );
        fixture.insert("dynatrace/projects/infra/alerting.yaml", "config: []");

        let tools = tempfile::tempdir().unwrap();
        let settings = MonacoSettings {
            executable: fake_monaco(tools.path(), 0),
            verbose: false,
            keep_temp_dir: false,
            ..Default::default()
        };
        let secrets = StaticSecretStore::new().with_secret(
            "dynatrace-sockshop",
            DtCredentials::new("abc.live.dynatrace.com", "dt0c01.token"),
        );
        let handler = fixture.handler(secrets, settings);
        handler.handle(&triggered()).await.unwrap();

        let finished = fixture.finished();
        assert_eq!(finished.status, Some(StatusType::Succeeded));
        assert_eq!(finished.result, Some(ResultType::Pass));
        assert_eq!(finished.message, "Successfully ran monaco!");
        assert_eq!(finished.labels.get("DtCreds").unwrap(), "dynatrace-sockshop");

        let projects_dir = fixture.base.path().join("monaco/ctx-1/projects");
        let calls = std::fs::read_to_string(tools.path().join("calls.log")).unwrap();
        assert_eq!(
            calls,
            format!(
                "https://abc.live.dynatrace.com -d -e=/environments.yaml -p=infra, apps {dir}\nhttps://abc.live.dynatrace.com -e=/environments.yaml -p=infra, apps {dir}\n",
                dir = projects_dir.display()
            )
        );

        // Workspace is removed once monaco ran
        assert!(!fixture.base.path().join("monaco/ctx-1").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_monaco_failure_is_reported() {
        let fixture = Fixture::new();
        fixture.insert("dynatrace/projects/infra/alerting.yaml", "config: []");

        let tools = tempfile::tempdir().unwrap();
        let settings = MonacoSettings {
            executable: fake_monaco(tools.path(), 1),
            ..Default::default()
        };
        let handler = fixture.handler(secrets(), settings);
        handler.handle(&triggered()).await.unwrap();

        let finished = fixture.finished();
        assert_eq!(finished.status, Some(StatusType::Errored));
        assert_eq!(finished.result, Some(ResultType::Fail));
        assert!(finished.message.starts_with("Error running monaco"));

        // Only the dry run was attempted, and the workspace is kept by default
        let calls = std::fs::read_to_string(tools.path().join("calls.log")).unwrap();
        assert_eq!(calls.lines().count(), 1);
        assert!(fixture.base.path().join("monaco/ctx-1/projects/infra/alerting.yaml").exists());
    }
}
