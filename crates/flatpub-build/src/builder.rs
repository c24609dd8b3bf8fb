//! Flatpak OCI image builder interface
//!
//! The actual Flatpak assembly is done by an external builder. The pipeline
//! talks to it through [`FlatpakBuilder`]; [`CommandFlatpakBuilder`] drives a
//! builder program over its command line contract.

use crate::components::{ImageComponent, read_rpm_manifest};
use crate::error::{BuildError, Result};
use crate::process::CommandRunner;
use crate::workflow::FlatpakSourceInfo;
use async_trait::async_trait;
use flatpub_config::{BuilderCommand, FlatpakMetadata};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Output of a container build
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BuiltContainer {
    /// Flatpak ref, e.g. `app/org.example.MyApp/x86_64/stable`
    pub ref_name: String,
    pub oci_path: PathBuf,
    pub tarred_oci_path: PathBuf,
}

/// Settings a builder is bound to at construction
#[derive(Debug, Clone)]
pub struct BuilderSettings {
    pub workdir: PathBuf,
    /// Flatpak build tree inside the exported filesystem
    pub extraction_path: String,
    pub flatpak_metadata: FlatpakMetadata,
}

#[async_trait]
pub trait FlatpakBuilder: Send + Sync {
    fn add_labels(&mut self, labels: &BTreeMap<String, String>);

    /// Installed components listed in the export manifest
    async fn get_components(&self, manifest: &Path) -> Result<Vec<ImageComponent>> {
        read_rpm_manifest(manifest).await
    }

    async fn build_container(&self, tarred_filesystem: &Path) -> Result<BuiltContainer>;
}

pub trait BuilderFactory: Send + Sync {
    fn create(
        &self,
        source: &FlatpakSourceInfo,
        settings: &BuilderSettings,
    ) -> Box<dyn FlatpakBuilder>;
}

/// Drives an external builder program
///
/// The program is invoked as
/// `<program> <args..> build-container --source <json> --workdir <dir>
/// --extraction-path <path> --metadata <mode> [--label k=v].. <tarball>`
/// and must print `{"ref_name", "oci_path", "tarred_oci_path"}` as JSON.
pub struct CommandFlatpakBuilder {
    command: BuilderCommand,
    runner: Arc<dyn CommandRunner>,
    source: FlatpakSourceInfo,
    settings: BuilderSettings,
    labels: BTreeMap<String, String>,
}

impl CommandFlatpakBuilder {
    pub fn new(
        command: BuilderCommand,
        runner: Arc<dyn CommandRunner>,
        source: FlatpakSourceInfo,
        settings: BuilderSettings,
    ) -> Self {
        Self {
            command,
            runner,
            source,
            settings,
            labels: BTreeMap::new(),
        }
    }

    fn build_args(&self, tarred_filesystem: &Path) -> Result<Vec<String>> {
        let mut args = self.command.args.clone();
        args.extend([
            "build-container".to_string(),
            "--source".to_string(),
            serde_json::to_string(&self.source)?,
            "--workdir".to_string(),
            self.settings.workdir.display().to_string(),
            "--extraction-path".to_string(),
            self.settings.extraction_path.clone(),
            "--metadata".to_string(),
            self.settings.flatpak_metadata.to_string(),
        ]);
        for (key, value) in &self.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(tarred_filesystem.display().to_string());
        Ok(args)
    }
}

#[async_trait]
impl FlatpakBuilder for CommandFlatpakBuilder {
    fn add_labels(&mut self, labels: &BTreeMap<String, String>) {
        self.labels
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    async fn build_container(&self, tarred_filesystem: &Path) -> Result<BuiltContainer> {
        let args = self.build_args(tarred_filesystem)?;
        let stdout = self
            .runner
            .run(&self.command.program, &args)
            .await?
            .into_stdout(&self.command.program, &args)?;

        serde_json::from_str(stdout.trim())
            .map_err(|e| BuildError::data_format(format!("{} output", self.command.program), e))
    }
}

/// Creates [`CommandFlatpakBuilder`]s sharing one command runner
pub struct CommandBuilderFactory {
    command: BuilderCommand,
    runner: Arc<dyn CommandRunner>,
}

impl CommandBuilderFactory {
    pub fn new(command: BuilderCommand, runner: Arc<dyn CommandRunner>) -> Self {
        Self { command, runner }
    }
}

impl BuilderFactory for CommandBuilderFactory {
    fn create(
        &self,
        source: &FlatpakSourceInfo,
        settings: &BuilderSettings,
    ) -> Box<dyn FlatpakBuilder> {
        Box::new(CommandFlatpakBuilder::new(
            self.command.clone(),
            self.runner.clone(),
            source.clone(),
            settings.clone(),
        ))
    }
}
