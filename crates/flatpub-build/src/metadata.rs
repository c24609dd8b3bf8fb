//! Export metadata records handed to later publish stages

use crate::error::{BuildError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageType {
    /// OCI image layout directory
    #[serde(rename = "oci")]
    Oci,
    /// Tarball of an OCI image layout
    #[serde(rename = "oci-tar")]
    OciTar,
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageType::Oci => write!(f, "oci"),
            ImageType::OciTar => write!(f, "oci-tar"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedImage {
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub image_type: ImageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256sum: Option<String>,
}

impl ExportedImage {
    pub fn with_ref_name(mut self, ref_name: impl Into<String>) -> Self {
        self.ref_name = Some(ref_name.into());
        self
    }
}

/// Describe an exported image. File forms get a size and checksum.
pub fn exported_image_metadata(path: &Path, image_type: ImageType) -> Result<ExportedImage> {
    if !path.exists() {
        return Err(BuildError::ArtifactNotFound(path.to_path_buf()));
    }

    let mut metadata = ExportedImage {
        path: path.to_path_buf(),
        image_type,
        ref_name: None,
        size: None,
        sha256sum: None,
    };

    if image_type != ImageType::Oci {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        let size = io::copy(&mut file, &mut hasher)?;
        metadata.size = Some(size);
        metadata.sha256sum = Some(hex::encode(hasher.finalize()));
    }

    Ok(metadata)
}

/// [`exported_image_metadata`] on the blocking pool, so checksumming a
/// large tarball does not stall the runtime
pub async fn describe_exported_image(path: PathBuf, image_type: ImageType) -> Result<ExportedImage> {
    tokio::task::spawn_blocking(move || exported_image_metadata(&path, image_type)).await?
}
