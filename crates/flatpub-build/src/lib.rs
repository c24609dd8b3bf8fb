//! Flatpak OCI image creation and publishing
//!
//! This crate turns the filesystem image of a Flatpak build into an OCI
//! image, resolves its image ID, publishes it into the internal container
//! storage and records export metadata for later workflow stages.

pub mod builder;
pub mod components;
pub mod error;
pub mod export;
pub mod labels;
pub mod metadata;
pub mod pipeline;
pub mod process;
pub mod skopeo;
pub mod stream;
pub mod workflow;

pub use builder::{BuiltContainer, CommandBuilderFactory, CommandFlatpakBuilder, FlatpakBuilder};
pub use components::{ImageComponent, parse_rpm_manifest};
pub use error::{BuildError, Result};
pub use export::{DockerExporter, ExportedFilesystem, PreExtractedExporter, TarExportWriter};
pub use metadata::{ExportedImage, ImageType};
pub use pipeline::{PLUGIN_KEY, PipelineOutcome, PipelineSettings, PublishPipeline, PublishSummary, Stage};
pub use process::{CommandRunner, RetryConfig, RetryingRunner, TokioCommandRunner};
pub use skopeo::Skopeo;
pub use stream::StreamAdapter;
pub use workflow::{FlatpakSourceInfo, WorkflowData};
