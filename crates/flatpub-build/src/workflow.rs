//! Shared workflow state
//!
//! The state produced by earlier build stages and consumed by later ones.
//! The CLI persists it as JSON between stages.

use crate::components::ImageComponent;
use crate::error::Result;
use crate::metadata::ExportedImage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Flatpak source description recorded by the Dockerfile generation stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatpakSourceInfo {
    /// Parsed container.yaml `flatpak` section
    pub flatpak_yaml: serde_json::Value,
    /// Module stream the image is built from, e.g. `flatpak-runtime:f29`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_image: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowData {
    /// Whether this build produces a Flatpak
    pub flatpak: bool,
    /// Working directory for build artifacts
    pub workdir: PathBuf,
    pub source: Option<FlatpakSourceInfo>,
    /// Labels of the Dockerfile being built
    pub labels: BTreeMap<String, String>,
    /// Working image reference
    pub image_id: Option<String>,
    pub image_components: Option<Vec<ImageComponent>>,
    pub exported_image_sequence: Vec<ExportedImage>,
    /// Images to remove when the workflow exits
    pub images_to_remove: BTreeSet<String>,
}

impl WorkflowData {
    pub fn is_flatpak_build(&self) -> bool {
        self.flatpak
    }

    pub fn flatpak_source(&self) -> Option<&FlatpakSourceInfo> {
        self.source.as_ref()
    }

    /// Schedule an image for removal at workflow exit
    pub fn defer_removal(&mut self, image_id: &str) {
        if self.images_to_remove.insert(image_id.to_string()) {
            tracing::debug!("Deferred removal of image {}", image_id);
        }
    }

    /// Take over removals `other` scheduled that this state lacks.
    /// Returns whether anything was added.
    pub fn retain_removals_from(&mut self, other: &WorkflowData) -> bool {
        let before = self.images_to_remove.len();
        self.images_to_remove
            .extend(other.images_to_remove.iter().cloned());
        self.images_to_remove.len() != before
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let data: WorkflowData = serde_json::from_str(&content)?;
        tracing::debug!("Loaded workflow state from {}", path.display());
        Ok(data)
    }

    /// Write the state, replacing the previous file atomically
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, path).await?;
        tracing::debug!("Saved workflow state to {}", path.display());
        Ok(())
    }
}
