use crate::pipeline::Stage;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Prerequisite missing: {0}")]
    PrerequisiteMissing(String),

    #[error("`{command}` failed with {status}:\n{output}")]
    ToolFailed {
        command: String,
        status: String,
        output: String,
    },

    #[error("Failed to parse {artifact}: {message}")]
    DataFormat { artifact: String, message: String },

    #[error("Missing label: {0}")]
    MissingLabel(String),

    #[error("Invalid build configuration: {0}")]
    InvalidConfig(String),

    #[error("Filesystem export failed: {0}")]
    Export(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(PathBuf),

    #[error("Docker connection error: {0}")]
    DockerConnection(#[from] bollard::errors::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<BuildError>,
    },
}

impl BuildError {
    pub fn data_format(artifact: impl Into<String>, message: impl ToString) -> Self {
        BuildError::DataFormat {
            artifact: artifact.into(),
            message: message.to_string(),
        }
    }

    /// Stage the error was raised in, when it came out of the pipeline
    pub fn stage(&self) -> Option<Stage> {
        match self {
            BuildError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Innermost error, unwrapping the stage context
    pub fn root(&self) -> &BuildError {
        match self {
            BuildError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// User facing message with a hint on how to fix the problem
    pub fn user_message(&self) -> String {
        match self {
            BuildError::Stage { stage, source } => {
                format!("{} stage failed\n\n{}", stage, source.user_message())
            }
            BuildError::PrerequisiteMissing(msg) => {
                format!(
                    "{}\n\
                     \n\
                     The Dockerfile generation stage must record the Flatpak source\n\
                     in the workflow state before this stage runs.",
                    msg
                )
            }
            BuildError::ToolFailed {
                command,
                status,
                output,
            } => {
                format!(
                    "External command failed ({}):\n  {}\n\nOutput:\n{}",
                    status, command, output
                )
            }
            BuildError::MissingLabel(label) => {
                format!(
                    "Required label '{}' is not set.\n\
                     \n\
                     Add it to the Dockerfile, for example:\n\
                        LABEL {}=\"...\"",
                    label, label
                )
            }
            _ => format!("{}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
