//! Flatpak OCI create-and-publish pipeline
//!
//! Turns the filesystem image produced by the Dockerfile build into a
//! Flatpak OCI image, resolves its image ID, copies it into the internal
//! container storage and records export metadata for later stages.
//!
//! The pipeline is an explicit state machine. [`PublishPipeline::step`]
//! performs exactly one transition; [`PublishPipeline::run`] drives it to a
//! terminal [`Stage`]. Any error moves the pipeline to [`Stage::Failed`] and
//! is returned wrapped in [`BuildError::Stage`].

use crate::builder::{BuilderFactory, BuilderSettings, BuiltContainer, FlatpakBuilder};
use crate::error::{BuildError, Result};
use crate::export::{ExportedFilesystem, FilesystemExporter};
use crate::labels::{LabelType, Labels};
use crate::metadata::{ExportedImage, ImageType, describe_exported_image};
use crate::skopeo::Skopeo;
use crate::workflow::{FlatpakSourceInfo, WorkflowData};
use flatpub_config::{FlatpakMetadata, FlatpubConfig};
use std::fmt;
use std::path::PathBuf;

/// Key this stage is registered under; also prefixes storage names
pub const PLUGIN_KEY: &str = "flatpak_create_oci";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PreconditionCheck,
    SourceResolution,
    BuilderInit,
    Export,
    ComponentExtraction,
    ImageAssembly,
    OldImageRetirement,
    IdentityResolution,
    Naming,
    StoragePublish,
    MetadataRecording,
    Completed,
    Skipped,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Skipped | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::PreconditionCheck => "precondition-check",
            Stage::SourceResolution => "source-resolution",
            Stage::BuilderInit => "builder-init",
            Stage::Export => "export",
            Stage::ComponentExtraction => "component-extraction",
            Stage::ImageAssembly => "image-assembly",
            Stage::OldImageRetirement => "old-image-retirement",
            Stage::IdentityResolution => "identity-resolution",
            Stage::Naming => "naming",
            Stage::StoragePublish => "storage-publish",
            Stage::MetadataRecording => "metadata-recording",
            Stage::Completed => "completed",
            Stage::Skipped => "skipped",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// containers/image transport of the internal storage
    pub storage_transport: String,
    pub extraction_path: String,
    pub flatpak_metadata: FlatpakMetadata,
}

impl From<&FlatpubConfig> for PipelineSettings {
    fn from(config: &FlatpubConfig) -> Self {
        Self {
            storage_transport: config.storage_transport.clone(),
            extraction_path: config.extraction_path.clone(),
            flatpak_metadata: config.flatpak_metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSummary {
    pub ref_name: String,
    pub image_id: String,
    /// Full destination reference, `<transport>:<name>:<tag>`
    pub storage_ref: String,
    pub oci_path: PathBuf,
    pub tarred_oci_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Skipped,
    Completed(PublishSummary),
}

/// Values carried between stages of a single run
#[derive(Default)]
struct RunState {
    source: Option<FlatpakSourceInfo>,
    builder: Option<Box<dyn FlatpakBuilder>>,
    exported: Option<ExportedFilesystem>,
    built: Option<BuiltContainer>,
    image_id: Option<String>,
    storage: Option<(String, String)>,
    storage_ref: Option<String>,
    records: Vec<ExportedImage>,
    summary: Option<PublishSummary>,
}

fn missing(what: &str) -> BuildError {
    BuildError::InvalidConfig(format!("{} is not available at this stage", what))
}

pub struct PublishPipeline {
    settings: PipelineSettings,
    exporter: Box<dyn FilesystemExporter>,
    builders: Box<dyn BuilderFactory>,
    skopeo: Skopeo,
    stage: Stage,
    state: RunState,
}

impl PublishPipeline {
    pub fn new(
        settings: PipelineSettings,
        exporter: Box<dyn FilesystemExporter>,
        builders: Box<dyn BuilderFactory>,
        skopeo: Skopeo,
    ) -> Self {
        Self {
            settings,
            exporter,
            builders,
            skopeo,
            stage: Stage::PreconditionCheck,
            state: RunState::default(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn summary(&self) -> Option<&PublishSummary> {
        self.state.summary.as_ref()
    }

    /// Drive the pipeline to a terminal stage
    pub async fn run(&mut self, workflow: &mut WorkflowData) -> Result<PipelineOutcome> {
        loop {
            match self.step(workflow).await? {
                Stage::Skipped => return Ok(PipelineOutcome::Skipped),
                Stage::Completed => {
                    let summary = self
                        .state
                        .summary
                        .clone()
                        .ok_or_else(|| missing("publish summary"))?;
                    return Ok(PipelineOutcome::Completed(summary));
                }
                Stage::Failed => {
                    return Err(BuildError::InvalidConfig(
                        "pipeline has already failed; start a new run".to_string(),
                    ));
                }
                _ => {}
            }
        }
    }

    /// Perform one transition and return the new stage
    pub async fn step(&mut self, workflow: &mut WorkflowData) -> Result<Stage> {
        let current = self.stage;
        if current.is_terminal() {
            return Ok(current);
        }

        match self.advance(current, workflow).await {
            Ok(next) => {
                tracing::debug!("{} -> {}", current, next);
                self.stage = next;
                Ok(next)
            }
            Err(e) => {
                tracing::error!("{} stage failed: {}", current, e);
                self.stage = Stage::Failed;
                self.state = RunState::default();
                Err(BuildError::Stage {
                    stage: current,
                    source: Box::new(e),
                })
            }
        }
    }

    async fn advance(&mut self, stage: Stage, workflow: &mut WorkflowData) -> Result<Stage> {
        match stage {
            Stage::PreconditionCheck => {
                if !workflow.is_flatpak_build() {
                    tracing::info!("not flatpak build, skipping plugin");
                    return Ok(Stage::Skipped);
                }
                Ok(Stage::SourceResolution)
            }

            Stage::SourceResolution => {
                let source = workflow.flatpak_source().cloned().ok_or_else(|| {
                    BuildError::PrerequisiteMissing(format!(
                        "flatpak_create_dockerfile must be run before {}",
                        PLUGIN_KEY
                    ))
                })?;
                self.state.source = Some(source);
                Ok(Stage::BuilderInit)
            }

            Stage::BuilderInit => {
                let source = self.state.source.as_ref().ok_or_else(|| missing("source"))?;
                let settings = BuilderSettings {
                    workdir: workflow.workdir.clone(),
                    extraction_path: self.settings.extraction_path.clone(),
                    flatpak_metadata: self.settings.flatpak_metadata,
                };
                let mut builder = self.builders.create(source, &settings);
                builder.add_labels(&workflow.labels);
                self.state.builder = Some(builder);
                Ok(Stage::Export)
            }

            Stage::Export => {
                let exported = self
                    .exporter
                    .export(workflow.image_id.as_deref(), &workflow.workdir)
                    .await?;
                tracing::info!("filesystem tarfile written to {}", exported.tarball.display());
                tracing::info!("manifest written to {}", exported.manifest.display());
                self.state.exported = Some(exported);
                Ok(Stage::ComponentExtraction)
            }

            Stage::ComponentExtraction => {
                let builder = self.state.builder.as_ref().ok_or_else(|| missing("builder"))?;
                let exported = self.state.exported.as_ref().ok_or_else(|| missing("export"))?;
                let components = builder.get_components(&exported.manifest).await?;
                tracing::info!("{} image components recorded", components.len());
                workflow.image_components = Some(components);
                Ok(Stage::ImageAssembly)
            }

            Stage::ImageAssembly => {
                let builder = self.state.builder.as_ref().ok_or_else(|| missing("builder"))?;
                let exported = self.state.exported.as_ref().ok_or_else(|| missing("export"))?;
                let built = builder.build_container(&exported.tarball).await?;
                tracing::info!("Built Flatpak {}", built.ref_name);
                self.state.built = Some(built);
                Ok(Stage::OldImageRetirement)
            }

            Stage::OldImageRetirement => {
                match workflow.image_id.clone() {
                    Some(old) => {
                        tracing::info!("Marking filesystem image \"{}\" for removal", old);
                        workflow.defer_removal(&old);
                    }
                    None => tracing::debug!("No filesystem image to mark for removal"),
                }
                Ok(Stage::IdentityResolution)
            }

            Stage::IdentityResolution => {
                let built = self.state.built.as_ref().ok_or_else(|| missing("built image"))?;
                let image_id = self.skopeo.image_id(&built.oci_path).await?;
                tracing::info!("New OCI image ID is {}", image_id);
                workflow.image_id = Some(image_id.clone());
                self.state.image_id = Some(image_id);
                Ok(Stage::Naming)
            }

            Stage::Naming => {
                let labels = Labels::new(&workflow.labels);
                let name = labels.value(LabelType::Name)?;
                let version = labels.value(LabelType::Version)?;
                let release = labels.value(LabelType::Release)?;

                self.state.storage = Some((
                    format!("{}-{}", PLUGIN_KEY, name),
                    format!("{}-{}", version, release),
                ));
                Ok(Stage::StoragePublish)
            }

            Stage::StoragePublish => {
                let built = self.state.built.as_ref().ok_or_else(|| missing("built image"))?;
                let (name, tag) = self.state.storage.as_ref().ok_or_else(|| missing("storage name"))?;

                // Describe both artifacts before anything durable happens
                let records = vec![
                    describe_exported_image(built.oci_path.clone(), ImageType::Oci)
                        .await?
                        .with_ref_name(&built.ref_name),
                    describe_exported_image(built.tarred_oci_path.clone(), ImageType::OciTar)
                        .await?
                        .with_ref_name(&built.ref_name),
                ];

                // The OCI image ID is tracked by the workflow and removed at exit,
                // so the storage copy needs no removal marker of its own.
                let storage_ref = self
                    .skopeo
                    .copy_to_storage(&built.oci_path, &self.settings.storage_transport, name, tag)
                    .await?;

                self.state.records = records;
                self.state.storage_ref = Some(storage_ref);
                Ok(Stage::MetadataRecording)
            }

            Stage::MetadataRecording => {
                let built = self.state.built.as_ref().ok_or_else(|| missing("built image"))?;
                let image_id = self.state.image_id.clone().ok_or_else(|| missing("image ID"))?;
                let storage_ref = self
                    .state
                    .storage_ref
                    .clone()
                    .ok_or_else(|| missing("storage reference"))?;

                workflow
                    .exported_image_sequence
                    .extend(std::mem::take(&mut self.state.records));
                tracing::info!("OCI image is available as {}", built.oci_path.display());
                tracing::info!("OCI tarfile is available as {}", built.tarred_oci_path.display());

                self.state.summary = Some(PublishSummary {
                    ref_name: built.ref_name.clone(),
                    image_id,
                    storage_ref,
                    oci_path: built.oci_path.clone(),
                    tarred_oci_path: built.tarred_oci_path.clone(),
                });
                Ok(Stage::Completed)
            }

            Stage::Completed | Stage::Skipped | Stage::Failed => Ok(stage),
        }
    }
}
