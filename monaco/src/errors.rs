use crate::command::CommandError;
use crate::config::ValidationError;
use crate::credentials::CredentialsError;
use crate::monaco_config::MonacoConfigError;
use crate::workspace::PrepareError;
use keptn::events::EventError;
use keptn::resources::ResourceError;
use keptn::secrets::SecretError;
use keptn::sender::SendError;
use thiserror::Error;

/// Failures while handling one monaco event. The display text ends up in
/// the message of the finished event.
#[derive(Error, Debug)]
pub enum MonacoError {
    #[error("invalid event: {0}")]
    Event(#[from] EventError),

    #[error("{0}")]
    MalformedConfig(#[from] MonacoConfigError),

    #[error("Failed to fetch Dynatrace credentials: {0}")]
    Credentials(#[from] CredentialsError),

    #[error("Error preparing monaco files: {0}")]
    Prepare(#[from] PrepareError),

    #[error("Error running monaco: {0}")]
    Command(#[from] CommandError),

    #[error("Could not send event: {0}")]
    Send(#[from] SendError),
}

/// Errors that stop the service or one of its commands.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("resource store error: {0}")]
    Resources(#[from] ResourceError),

    #[error("could not set up secret store: {0}")]
    Secrets(#[from] SecretError),

    #[error("Failed to read request body: {0}")]
    RequestBody(#[from] hyper::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Monaco(#[from] MonacoError),
}
