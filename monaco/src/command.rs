//! Invocation of the external `monaco` executable.

use crate::config::MonacoSettings;
use keptn::events::KeptnEvent;
use keptn::secrets::DtCredentials;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("could not start {executable}: {source}")]
    Spawn {
        executable: PathBuf,
        source: std::io::Error,
    },
    #[error("monaco {mode} failed ({status}): {output}")]
    Failed {
        mode: &'static str,
        status: ExitStatus,
        output: String,
    },
}

/// A fully assembled monaco command line. Environment entries are added on
/// top of the inherited process environment.
#[derive(Clone)]
pub struct MonacoCommand {
    executable: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    dry_run: bool,
}

impl fmt::Debug for MonacoCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env: Vec<(&str, &str)> = self
            .env
            .iter()
            .map(|(key, value)| match key.as_str() {
                "DT_API_TOKEN" => (key.as_str(), "***"),
                _ => (key.as_str(), value.as_str()),
            })
            .collect();

        f.debug_struct("MonacoCommand")
            .field("executable", &self.executable)
            .field("args", &self.args)
            .field("env", &env)
            .finish()
    }
}

impl MonacoCommand {
    pub fn builder(executable: impl Into<PathBuf>) -> MonacoCommandBuilder {
        MonacoCommandBuilder::new(executable.into())
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, value)| value.as_str())
    }

    fn mode(&self) -> &'static str {
        if self.dry_run { "dry run" } else { "deployment" }
    }

    /// Runs the command to completion and returns stdout followed by stderr.
    pub async fn run(&self) -> Result<String, CommandError> {
        tracing::info!(
            executable = %self.executable.display(),
            args = %self.args.join(" "),
            mode = self.mode(),
            "Running monaco"
        );

        let output = Command::new(&self.executable)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| CommandError::Spawn {
                executable: self.executable.clone(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            tracing::error!(
                status = %output.status,
                output = %combined,
                mode = self.mode(),
                "Monaco failed"
            );
            return Err(CommandError::Failed {
                mode: self.mode(),
                status: output.status,
                output: combined,
            });
        }

        tracing::info!(output = %combined, mode = self.mode(), "Monaco finished");
        Ok(combined)
    }
}

/// Builds `monaco [-v] [-d] -e=<environments> [-p=<projects>] <projects dir>`.
#[derive(Clone)]
pub struct MonacoCommandBuilder {
    executable: PathBuf,
    verbose: bool,
    dry_run: bool,
    environments_file: String,
    projects: Option<String>,
    projects_dir: PathBuf,
    env: Vec<(String, String)>,
}

impl MonacoCommandBuilder {
    fn new(executable: PathBuf) -> Self {
        MonacoCommandBuilder {
            executable,
            verbose: false,
            dry_run: false,
            environments_file: crate::config::DEFAULT_ENVIRONMENTS_FILE.to_string(),
            projects: None,
            projects_dir: PathBuf::from(crate::workspace::PROJECTS_DIR),
            env: Vec::new(),
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn environments_file(mut self, path: &str) -> Self {
        self.environments_file = path.to_string();
        self
    }

    /// Comma separated monaco projects. An empty string deploys everything.
    pub fn projects(mut self, projects: &str) -> Self {
        self.projects = Some(projects.to_string()).filter(|p| !p.is_empty());
        self
    }

    pub fn projects_dir(mut self, dir: &Path) -> Self {
        self.projects_dir = dir.to_path_buf();
        self
    }

    pub fn credentials(self, credentials: &DtCredentials) -> Self {
        self.env("DT_ENVIRONMENT_URL", &credentials.tenant)
            .env("DT_API_TOKEN", &credentials.api_token)
    }

    pub fn keptn_event(self, event: &KeptnEvent) -> Self {
        self.env("KEPTN_PROJECT", &event.project)
            .env("KEPTN_SERVICE", &event.service)
            .env("KEPTN_STAGE", &event.stage)
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn build(self) -> MonacoCommand {
        let mut args = Vec::new();
        if self.verbose {
            args.push("-v".to_string());
        }
        if self.dry_run {
            args.push("-d".to_string());
        }
        args.push(format!("-e={}", self.environments_file));
        if let Some(projects) = self.projects {
            args.push(format!("-p={projects}"));
        }
        args.push(self.projects_dir.display().to_string());

        MonacoCommand {
            executable: self.executable,
            args,
            env: self.env,
            dry_run: self.dry_run,
        }
    }
}

/// Validates with a dry run when enabled, then applies. A failed dry run
/// stops before anything is applied.
pub async fn run_monaco(
    settings: &MonacoSettings,
    credentials: &DtCredentials,
    event: &KeptnEvent,
    projects: &str,
    projects_dir: &Path,
) -> Result<(), CommandError> {
    let builder = MonacoCommand::builder(&settings.executable)
        .verbose(settings.verbose)
        .environments_file(&settings.environments_file)
        .projects(projects)
        .projects_dir(projects_dir)
        .credentials(credentials)
        .keptn_event(event);

    if settings.dry_run {
        builder.clone().dry_run(true).build().run().await?;
    }
    builder.dry_run(false).build().run().await?;

    Ok(())
}
