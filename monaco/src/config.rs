use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_CONFIGURATION_SERVICE: &str = "configuration-service:8080";
pub const DEFAULT_EVENT_BROKER: &str = "http://localhost:8081/event";
pub const DEFAULT_NAMESPACE: &str = "keptn";
pub const DEFAULT_EXECUTABLE: &str = "./monaco";
pub const DEFAULT_ENVIRONMENTS_FILE: &str = "/environments.yaml";
pub const DEFAULT_BASE_FOLDER: &str = "/tmp/monaco";

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Monaco executable path is empty")]
    EmptyExecutable,

    #[error("Monaco base folder is empty")]
    EmptyBaseFolder,
}

/// Where resources, secrets and outbound events go.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Configuration service, Kubernetes secrets, event broker.
    #[default]
    Cluster,
    /// Local directory for resources, environment credentials, events are only logged.
    Local,
    /// Configuration service with environment credentials.
    LocalTest,
}

impl ExecutionMode {
    fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some("local") => ExecutionMode::Local,
            Some("localtest") => ExecutionMode::LocalTest,
            _ => ExecutionMode::Cluster,
        }
    }

    pub fn uses_local_resources(&self) -> bool {
        *self == ExecutionMode::Local
    }

    pub fn uses_environment_secrets(&self) -> bool {
        *self != ExecutionMode::Cluster
    }

    pub fn sends_events(&self) -> bool {
        *self != ExecutionMode::Local
    }
}

/// Service configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Listener for CloudEvents and health probes
    pub listener: Listener,
    pub execution_mode: ExecutionMode,
    /// Configuration service address, with or without scheme
    pub configuration_service: String,
    /// Where outbound events are posted
    pub event_broker: String,
    /// Namespace holding the Dynatrace secrets
    pub pod_namespace: String,
    /// Directory serving resources in local mode
    pub local_resource_dir: PathBuf,
    pub monaco: MonacoSettings,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: Listener::default(),
            execution_mode: ExecutionMode::default(),
            configuration_service: DEFAULT_CONFIGURATION_SERVICE.to_string(),
            event_broker: DEFAULT_EVENT_BROKER.to_string(),
            pod_namespace: DEFAULT_NAMESPACE.to_string(),
            local_resource_dir: PathBuf::from("."),
            monaco: MonacoSettings::default(),
        }
    }
}

impl Config {
    /// Builds the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup. Unset
    /// variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Config {
            execution_mode: ExecutionMode::from_env_value(lookup("ENV").as_deref()),
            ..Default::default()
        };

        if let Some(value) = lookup("CONFIGURATION_SERVICE").filter(|v| !v.is_empty()) {
            config.configuration_service = value;
        }
        if let Some(value) = lookup("EVENTBROKER").filter(|v| !v.is_empty()) {
            config.event_broker = value;
        }
        if let Some(value) = lookup("POD_NAMESPACE").filter(|v| !v.is_empty()) {
            config.pod_namespace = value;
        }
        if let Some(value) = lookup("PORT") {
            match value.parse() {
                Ok(port) => config.listener.port = port,
                Err(_) => tracing::warn!(value = %value, "PORT is not a valid port, using default"),
            }
        }

        let monaco = &mut config.monaco;
        monaco.verbose = env_bool(&lookup, "MONACO_VERBOSE_MODE", monaco.verbose);
        monaco.dry_run = env_bool(&lookup, "MONACO_DRYRUN", monaco.dry_run);
        monaco.keep_temp_dir = env_bool(&lookup, "MONACO_KEEP_TEMP_DIR", monaco.keep_temp_dir);
        if let Some(value) = lookup("MONACO_EXECUTABLE").filter(|v| !v.is_empty()) {
            monaco.executable = PathBuf::from(value);
        }
        if let Some(value) = lookup("MONACO_ENVIRONMENTS_FILE").filter(|v| !v.is_empty()) {
            monaco.environments_file = value;
        }
        if let Some(value) = lookup("MONACO_BASE_FOLDER").filter(|v| !v.is_empty()) {
            monaco.base_folder = PathBuf::from(value);
        }

        config
    }

    /// URI of the monaco config file for the current execution mode.
    pub fn monaco_config_uri(&self) -> &'static str {
        if self.execution_mode.uses_local_resources() {
            crate::monaco_config::LOCAL_CONFIG_URI
        } else {
            crate::monaco_config::CONFIG_URI
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.monaco.validate()
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// How the monaco executable is invoked.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonacoSettings {
    pub executable: PathBuf,
    pub environments_file: String,
    /// Workspaces are created below this folder, one per Keptn context
    pub base_folder: PathBuf,
    pub verbose: bool,
    /// Run a dry run before applying
    pub dry_run: bool,
    /// Leave the workspace on disk after monaco ran
    pub keep_temp_dir: bool,
}

impl Default for MonacoSettings {
    fn default() -> Self {
        MonacoSettings {
            executable: PathBuf::from(DEFAULT_EXECUTABLE),
            environments_file: DEFAULT_ENVIRONMENTS_FILE.to_string(),
            base_folder: PathBuf::from(DEFAULT_BASE_FOLDER),
            verbose: true,
            dry_run: true,
            keep_temp_dir: true,
        }
    }
}

impl MonacoSettings {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.executable.as_os_str().is_empty() {
            return Err(ValidationError::EmptyExecutable);
        }
        if self.base_folder.as_os_str().is_empty() {
            return Err(ValidationError::EmptyBaseFolder);
        }
        Ok(())
    }
}

fn env_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    let Some(value) = lookup(key).filter(|v| !v.is_empty()) else {
        return default;
    };

    match parse_bool(&value) {
        Some(parsed) => parsed,
        None => {
            tracing::warn!(key, value = %value, default, "Not a boolean, using default");
            default
        }
    }
}

/// Accepts the spellings `1 t T TRUE true True 0 f F FALSE false False`.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}
