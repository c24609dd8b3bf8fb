use anyhow::Context;
use bollard::Docker;
use clap::ValueEnum;
use colored::Colorize;
use flatpub_build::export::{FILESYSTEM_TARBALL, FilesystemExporter, MANIFEST_FILE};
use flatpub_build::{
    CommandBuilderFactory, DockerExporter, PipelineOutcome, PipelineSettings,
    PreExtractedExporter, PublishPipeline, TarExportWriter, TokioCommandRunner, WorkflowData,
};
use flatpub_config::FlatpubConfig;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExporterKind {
    /// Use a tarball and manifest written by an earlier extraction step
    PreExtracted,
    /// Export a temporary container of the working image through Docker
    Docker,
}

pub struct RunArgs {
    pub state: PathBuf,
    pub config: Option<PathBuf>,
    pub exporter: ExporterKind,
    pub tarball: Option<PathBuf>,
    pub manifest: Option<PathBuf>,
}

fn exporter(
    args: &RunArgs,
    config: &FlatpubConfig,
    workflow: &WorkflowData,
) -> anyhow::Result<Box<dyn FilesystemExporter>> {
    match args.exporter {
        ExporterKind::PreExtracted => {
            let tarball = args
                .tarball
                .clone()
                .unwrap_or_else(|| workflow.workdir.join(FILESYSTEM_TARBALL));
            let manifest = args
                .manifest
                .clone()
                .unwrap_or_else(|| workflow.workdir.join(MANIFEST_FILE));
            Ok(Box::new(PreExtractedExporter::new(tarball, manifest)))
        }
        ExporterKind::Docker => {
            let docker =
                Docker::connect_with_local_defaults().context("Failed to connect to Docker")?;
            Ok(Box::new(DockerExporter::new(
                docker,
                TarExportWriter::new(&config.extraction_path),
            )))
        }
    }
}

pub async fn handle(args: RunArgs) -> anyhow::Result<()> {
    let config = super::load_config(args.config.as_deref())?;
    let mut workflow = WorkflowData::load(&args.state)
        .await
        .with_context(|| format!("Failed to load workflow state {}", args.state.display()))?;

    let builders = CommandBuilderFactory::new(config.builder.clone(), Arc::new(TokioCommandRunner));
    let mut pipeline = PublishPipeline::new(
        PipelineSettings::from(&config),
        exporter(&args, &config, &workflow)?,
        Box::new(builders),
        super::skopeo(&config),
    );

    println!("{}", "Creating Flatpak OCI image...".blue());
    let initial = workflow.clone();
    let outcome = match pipeline.run(&mut workflow).await {
        Ok(outcome) => outcome,
        Err(e) => {
            // Removals scheduled before the failure still run at teardown;
            // nothing else from the failed run is persisted.
            let mut retained = initial;
            if retained.retain_removals_from(&workflow) {
                retained
                    .save(&args.state)
                    .await
                    .with_context(|| format!("Failed to save workflow state {}", args.state.display()))?;
            }
            return Err(super::user_error(e));
        }
    };

    workflow
        .save(&args.state)
        .await
        .with_context(|| format!("Failed to save workflow state {}", args.state.display()))?;

    match outcome {
        PipelineOutcome::Skipped => {
            println!("{}", "Not a Flatpak build, nothing to do".yellow());
        }
        PipelineOutcome::Completed(summary) => {
            println!("{}", "✓ Flatpak OCI image published".green().bold());
            println!("  ref:      {}", summary.ref_name.cyan());
            println!("  image ID: {}", summary.image_id);
            println!("  storage:  {}", summary.storage_ref.cyan());
            println!("  OCI:      {}", summary.oci_path.display());
            println!("  tarball:  {}", summary.tarred_oci_path.display());
        }
    }

    Ok(())
}
