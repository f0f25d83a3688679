mod config;

use clap::{Parser, Subcommand};
use config::{CommonConfig, Config};
use keptn::resources::ResourceScope;
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const METRICS_PREFIX: &str = "monaco_service";

#[derive(Parser)]
#[command(name = "monaco-service", version, about)]
struct Cli {
    /// YAML configuration file. Without one, settings come from the environment.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Listen for Keptn CloudEvents (default)
    Serve,
    /// Handle one CloudEvent read from a JSON file
    Process { event_file: PathBuf },
    /// Store a file as a Keptn resource
    Upload {
        #[arg(long)]
        project: String,
        #[arg(long)]
        stage: Option<String>,
        #[arg(long, requires = "stage")]
        service: Option<String>,
        /// Resource URI, e.g. dynatrace/monaco.conf.yaml
        #[arg(long)]
        uri: String,
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Installed first so warnings raised while reading the config are logged
    init_tracing();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Could not load configuration");
            return ExitCode::FAILURE;
        }
    };

    let _sentry = init_sentry(&config.common);
    init_metrics(&config.common);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Could not start runtime");
            return ExitCode::FAILURE;
        }
    };

    let service_config = config.monaco();
    let result = runtime.block_on(async move {
        match cli.command.unwrap_or(CliCommand::Serve) {
            CliCommand::Serve => monaco::run(service_config).await,
            CliCommand::Process { event_file } => {
                monaco::process_event_file(service_config, &event_file).await
            }
            CliCommand::Upload {
                project,
                stage,
                service,
                uri,
                file,
            } => {
                let scope = upload_scope(project, stage, service);
                monaco::upload_resource(&service_config, scope, &uri, &file).await
            }
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "monaco-service failed");
            ExitCode::FAILURE
        }
    }
}

fn upload_scope(project: String, stage: Option<String>, service: Option<String>) -> ResourceScope {
    match (stage, service) {
        (Some(stage), Some(service)) => ResourceScope::Service {
            project,
            stage,
            service,
        },
        (Some(stage), None) => ResourceScope::Stage { project, stage },
        (None, _) => ResourceScope::Project { project },
    }
}

fn init_sentry(common: &CommonConfig) -> Option<sentry::ClientInitGuard> {
    let logging = common.logging.as_ref()?;
    Some(sentry::init((
        logging.sentry_dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry::integrations::tracing::layer())
        .init();
}

fn init_metrics(common: &CommonConfig) {
    let Some(metrics) = common.metrics.as_ref() else {
        return;
    };

    let recorder = match StatsdBuilder::from(metrics.statsd_host.as_str(), metrics.statsd_port)
        .build(Some(METRICS_PREFIX))
    {
        Ok(recorder) => recorder,
        Err(e) => {
            tracing::warn!(error = %e, "Could not build statsd recorder, metrics disabled");
            return;
        }
    };

    if let Err(e) = metrics::set_global_recorder(recorder) {
        tracing::warn!(error = %e, "Could not install statsd recorder");
        return;
    }
    shared::metrics_defs::describe_all(monaco::metrics_defs::ALL_METRICS);
    tracing::info!(
        host = %metrics.statsd_host,
        port = metrics.statsd_port,
        "Reporting metrics to statsd"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_scope_is_narrowest_given() {
        assert_eq!(
            upload_scope("p".into(), Some("dev".into()), Some("carts".into())),
            ResourceScope::Service {
                project: "p".into(),
                stage: "dev".into(),
                service: "carts".into()
            }
        );
        assert_eq!(
            upload_scope("p".into(), Some("dev".into()), None),
            ResourceScope::Stage {
                project: "p".into(),
                stage: "dev".into()
            }
        );
        assert_eq!(
            upload_scope("p".into(), None, None),
            ResourceScope::Project { project: "p".into() }
        );
    }

    #[test]
    fn service_requires_stage() {
        let parsed = Cli::try_parse_from([
            "monaco-service",
            "upload",
            "--project",
            "p",
            "--service",
            "carts",
            "--uri",
            "dynatrace/monaco.conf.yaml",
            "monaco.conf.yaml",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn serve_is_default() {
        let cli = Cli::try_parse_from(["monaco-service", "--config", "monaco.yaml"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, Some(PathBuf::from("monaco.yaml")));
    }
}
