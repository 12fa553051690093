pub use anyhow::*;
use thiserror::*;

#[derive(Error, Debug)]
pub enum LivelyError {
    #[error("I/O Error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("UTF-8 Error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    #[error("Notify Error: {0}")]
    NotifyError(#[from] notify::Error),

    #[error("Artifact map error: {0}")]
    MapError(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid glob: {0}")]
    Glob(#[from] globset::Error),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Watcher error: {0}")]
    Watcher(String),

    #[error("Command `{cmd}` failed with {code}: {stderr}")]
    Command {
        cmd: String,
        code: String,
        stderr: String,
    },

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Pipeline is closed")]
    PipelineClosed,

    #[error("Service communication error: {0}")]
    ServiceCommunication(String),
}

pub type LivelyResult<T = ()> = Result<T, LivelyError>;

impl LivelyError {
    /// Message shown to the browser when this error is reported against a resource.
    pub fn browser_message(&self) -> String {
        match self {
            LivelyError::IoError(e) => e.to_string(),
            LivelyError::Transform(msg) => msg.clone(),
            LivelyError::Command { stderr, .. } if !stderr.is_empty() => stderr.clone(),
            _ => self.to_string(),
        }
    }

    /// Whether this error means the whole pipeline can no longer make progress.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LivelyError::MapError(_)
                | LivelyError::ConfigParse(_)
                | LivelyError::Config(_)
                | LivelyError::PipelineClosed
        )
    }
}
