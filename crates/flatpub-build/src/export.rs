//! Filesystem export
//!
//! Produces the tarball of the Flatpak build tree plus its package manifest.
//! Two variants exist: the tree was already extracted by an earlier step,
//! or a throw-away container is exported live through Docker and streamed
//! into [`TarExportWriter`].

use crate::error::{BuildError, Result};
use crate::stream::StreamAdapter;
use async_trait::async_trait;
use bollard::Docker;
use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use futures_util::{Stream, StreamExt};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder, EntryType};
use tokio::sync::mpsc;

pub const FILESYSTEM_TARBALL: &str = "filesystem.tar.gz";
pub const MANIFEST_FILE: &str = "flatpak-build.rpm_qf";

/// Chunks buffered between the Docker export and the archive writer
const EXPORT_CHANNEL_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFilesystem {
    pub tarball: PathBuf,
    pub manifest: PathBuf,
}

#[async_trait]
pub trait FilesystemExporter: Send + Sync {
    /// Export the filesystem of `image` into `workdir`
    async fn export(&self, image: Option<&str>, workdir: &Path) -> Result<ExportedFilesystem>;
}

/// Filesystem already extracted by an earlier step
pub struct PreExtractedExporter {
    exported: ExportedFilesystem,
}

impl PreExtractedExporter {
    pub fn new(tarball: impl Into<PathBuf>, manifest: impl Into<PathBuf>) -> Self {
        Self {
            exported: ExportedFilesystem {
                tarball: tarball.into(),
                manifest: manifest.into(),
            },
        }
    }
}

#[async_trait]
impl FilesystemExporter for PreExtractedExporter {
    async fn export(&self, _image: Option<&str>, _workdir: &Path) -> Result<ExportedFilesystem> {
        for path in [&self.exported.tarball, &self.exported.manifest] {
            if !path.exists() {
                return Err(BuildError::ArtifactNotFound(path.clone()));
            }
        }
        Ok(self.exported.clone())
    }
}

/// Rewrites a full filesystem export into the Flatpak build tree tarball
#[derive(Debug, Clone)]
pub struct TarExportWriter {
    extraction_path: PathBuf,
}

impl TarExportWriter {
    pub fn new(extraction_path: impl AsRef<Path>) -> Self {
        Self {
            extraction_path: normalize(extraction_path.as_ref()),
        }
    }

    /// Read a tar stream, keeping only entries below the extraction path
    /// (re-rooted at the archive root) and pulling out the `<extraction_path>.rpm_qf`
    /// manifest.
    ///
    /// On failure no partial tarball or manifest is left in `workdir`.
    pub fn write_from<R: Read>(&self, reader: R, workdir: &Path) -> Result<ExportedFilesystem> {
        let exported = ExportedFilesystem {
            tarball: workdir.join(FILESYSTEM_TARBALL),
            manifest: workdir.join(MANIFEST_FILE),
        };

        if let Err(e) = self.write_archive(reader, &exported) {
            remove_outputs(&exported);
            return Err(e);
        }

        Self::check_tarball_size(&exported.tarball);
        Ok(exported)
    }

    fn write_archive<R: Read>(&self, reader: R, exported: &ExportedFilesystem) -> Result<()> {
        let ExportedFilesystem { tarball, manifest } = exported;
        let manifest_entry = {
            let mut name = self.extraction_path.clone().into_os_string();
            name.push(".rpm_qf");
            PathBuf::from(name)
        };

        let encoder = GzEncoder::new(File::create(&tarball)?, Compression::default());
        let mut out = Builder::new(encoder);
        let mut archive = Archive::new(reader);
        let mut found_manifest = false;
        let mut kept = 0usize;

        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = normalize(&entry.path()?);

            if path == manifest_entry {
                let mut file = File::create(&manifest)?;
                io::copy(&mut entry, &mut file)?;
                found_manifest = true;
                continue;
            }

            let Some(dest) = self.reroot(&path) else {
                continue;
            };

            let mut header = entry.header().clone();
            match entry.header().entry_type() {
                EntryType::Link => {
                    let target = entry.link_name()?.map(|t| normalize(&t)).ok_or_else(|| {
                        BuildError::Export(format!("hard link without target: {}", path.display()))
                    })?;
                    let target = self.reroot(&target).ok_or_else(|| {
                        BuildError::Export(format!(
                            "hard link {} points outside {}",
                            path.display(),
                            self.extraction_path.display()
                        ))
                    })?;
                    out.append_link(&mut header, &dest, &target)?;
                }
                EntryType::Symlink => {
                    let target = entry.link_name()?.map(|t| t.into_owned()).unwrap_or_default();
                    let target = self.relative_symlink(&dest, &target).unwrap_or(target);
                    out.append_link(&mut header, &dest, &target)?;
                }
                _ => out.append_data(&mut header, &dest, &mut entry)?,
            }
            kept += 1;
        }

        out.into_inner()?.finish()?;

        if !found_manifest {
            return Err(BuildError::Export(format!(
                "manifest {} not found in export",
                manifest_entry.display()
            )));
        }

        tracing::debug!("Kept {} entries from export", kept);
        Ok(())
    }

    /// Absolute symlinks into the extraction path, rewritten relative to
    /// the link so they resolve inside the re-rooted tree
    fn relative_symlink(&self, link: &Path, target: &Path) -> Option<PathBuf> {
        if !target.has_root() {
            return None;
        }
        let target = self.reroot(&normalize(target))?;

        let parts = |path: &Path| -> Vec<PathBuf> {
            path.components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .map(|c| PathBuf::from(c.as_os_str()))
                .collect()
        };
        let target_parts = parts(&target);
        let base_parts = parts(link.parent().unwrap_or(Path::new("")));
        let common = target_parts
            .iter()
            .zip(&base_parts)
            .take_while(|(a, b)| a == b)
            .count();

        let mut relative = PathBuf::new();
        for _ in common..base_parts.len() {
            relative.push("..");
        }
        for part in &target_parts[common..] {
            relative.push(part);
        }
        if relative.as_os_str().is_empty() {
            relative.push(".");
        }
        Some(relative)
    }

    fn reroot(&self, path: &Path) -> Option<PathBuf> {
        let rel = path.strip_prefix(&self.extraction_path).ok()?;
        if rel.as_os_str().is_empty() {
            Some(PathBuf::from("."))
        } else {
            Some(rel.to_path_buf())
        }
    }

    fn check_tarball_size(tarball: &Path) {
        const LARGE_EXPORT: u64 = 4 * 1024 * 1024 * 1024; // 4GB

        if let Ok(meta) = std::fs::metadata(tarball) {
            if meta.len() > LARGE_EXPORT {
                tracing::warn!(
                    "Filesystem tarball is very large ({}MB): {}",
                    meta.len() / 1024 / 1024,
                    tarball.display()
                );
            }
        }
    }
}

/// Drop `.` and `/` components so export paths compare uniformly
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir | Component::RootDir))
        .collect()
}

/// Exports a throw-away container created from the working image
pub struct DockerExporter {
    docker: Docker,
    writer: TarExportWriter,
}

impl DockerExporter {
    pub fn new(docker: Docker, writer: TarExportWriter) -> Self {
        Self { docker, writer }
    }

    async fn export_container(&self, container_id: &str, workdir: &Path) -> Result<ExportedFilesystem> {
        let export = self.docker.export_container(container_id);
        write_export_stream(export, self.writer.clone(), workdir).await
    }
}

/// Feed a chunked export stream into a [`TarExportWriter`]
///
/// Chunks pass through a bounded channel to a blocking task that reads them
/// via [`StreamAdapter`]. A failed chunk ends the export with an error even
/// when the writer already saw a complete archive.
pub async fn write_export_stream<S, E>(
    stream: S,
    writer: TarExportWriter,
    workdir: &Path,
) -> Result<ExportedFilesystem>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    let (tx, mut rx) = mpsc::channel::<io::Result<Bytes>>(EXPORT_CHANNEL_DEPTH);

    let workdir = workdir.to_path_buf();
    let task = tokio::task::spawn_blocking(move || {
        let chunks = std::iter::from_fn(move || rx.blocking_recv());
        let mut stream = StreamAdapter::new(chunks);
        let result = writer.write_from(&mut stream, &workdir);
        stream.close();
        result
    });

    let mut stream = std::pin::pin!(stream);
    let mut stream_failure = None;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            stream_failure = Some(e.to_string());
            io::Error::other(e)
        });
        if tx.send(chunk).await.is_err() {
            // writer stopped reading, its result carries the reason
            break;
        }
        if stream_failure.is_some() {
            break;
        }
    }
    drop(tx);

    let exported = task.await??;
    if let Some(message) = stream_failure {
        remove_outputs(&exported);
        return Err(BuildError::Export(format!("export stream failed: {}", message)));
    }
    Ok(exported)
}

fn remove_outputs(exported: &ExportedFilesystem) {
    for path in [&exported.tarball, &exported.manifest] {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

#[async_trait]
impl FilesystemExporter for DockerExporter {
    async fn export(&self, image: Option<&str>, workdir: &Path) -> Result<ExportedFilesystem> {
        let image = image.ok_or_else(|| {
            BuildError::PrerequisiteMissing("no working image to export".to_string())
        })?;

        tracing::info!("Creating temporary docker container");
        // The command is never run, but the daemon refuses containers without one
        let config = bollard::models::ContainerCreateBody {
            image: Some(image.to_string()),
            cmd: Some(vec!["/bin/bash".to_string()]),
            ..Default::default()
        };
        let container = self
            .docker
            .create_container(
                None::<bollard::query_parameters::CreateContainerOptions>,
                config,
            )
            .await?;

        let result = self.export_container(&container.id, workdir).await;

        tracing::info!("Cleaning up docker container");
        if let Err(e) = self
            .docker
            .remove_container(
                &container.id,
                Some(bollard::query_parameters::RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            tracing::warn!("Failed to remove container {}: {}", container.id, e);
        }

        result
    }
}
