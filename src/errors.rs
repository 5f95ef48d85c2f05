use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Cli(String),

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("log stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("{0}")]
    Other(String),
}

/// Errors surfaced across the cluster adapter seam.
#[derive(Clone, Debug, Error)]
pub enum StreamError {
    /// The container exists but cannot serve logs yet (still being created,
    /// image pulling, ...). Expected during rollouts; callers silence it.
    #[error("container not ready")]
    NotReady,

    #[error("api error: {0}")]
    Api(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("stream idle for {0}s")]
    IdleTimeout(u64),
}

impl StreamError {
    pub fn is_not_ready(&self) -> bool {
        matches!(self, StreamError::NotReady)
    }
}
