use barrage::core::ConfigError;
use barrage::http::HttpError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Unable to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Unsupported config format for {0}; expected a .json or .toml file")]
    UnsupportedFormat(PathBuf),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Unable to build HTTP client for exec \"{exec}\": {source}")]
    Client {
        exec: String,
        #[source]
        source: HttpError,
    },

    #[error("Unable to install Prometheus exporter: {0}")]
    Prometheus(String),

    #[error("Unable to write summary to {path}: {reason}")]
    Export { path: PathBuf, reason: String },
}

impl RuntimeError {
    /// Process exit code for a run that could not complete.
    pub fn exit_code(&self) -> u8 {
        match self {
            RuntimeError::Export { .. } => crate::EXIT_FAILED,
            _ => crate::EXIT_CONFIG,
        }
    }
}
