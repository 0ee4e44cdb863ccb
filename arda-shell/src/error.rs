//! Error types for the shell.

use arda_core::{ContextError, NavigationError, PersistenceError};
use arda_query::QueryError;

use crate::api_client::ApiClientError;
use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiClientError),
    #[error("Storage medium could not be opened: {0}")]
    Storage(#[from] PersistenceError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Navigation(#[from] NavigationError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("Failed to install log subscriber: {0}")]
    Logging(String),
    #[error("Background task {task} failed: {reason}")]
    Task { task: &'static str, reason: String },
}

pub type ShellResult<T> = Result<T, ShellError>;
