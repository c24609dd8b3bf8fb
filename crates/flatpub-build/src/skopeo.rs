//! skopeo CLI wrapper
//!
//! Resolves OCI image IDs and copies built images into the internal
//! container storage.

use crate::error::{BuildError, Result};
use crate::process::CommandRunner;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct OciManifest {
    config: Descriptor,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: String,
}

/// skopeo CLI wrapper
#[derive(Clone)]
pub struct Skopeo {
    program: String,
    runner: Arc<dyn CommandRunner>,
}

impl Skopeo {
    pub fn new(program: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    /// Run a skopeo command and return stdout
    async fn run_command(&self, args: Vec<String>) -> Result<String> {
        let output = self.runner.run(&self.program, &args).await?;
        output.into_stdout(&self.program, &args)
    }

    /// Content digest of the image config, used as the image ID
    pub async fn image_id(&self, oci_path: &Path) -> Result<String> {
        let args = vec![
            "inspect".to_string(),
            "--raw".to_string(),
            format!("oci:{}", oci_path.display()),
        ];
        let raw_manifest = self.run_command(args).await?;
        parse_config_digest(&raw_manifest, oci_path)
    }

    /// Copy an OCI directory into `<transport>:<name>:<tag>`
    pub async fn copy_to_storage(
        &self,
        oci_path: &Path,
        transport: &str,
        name: &str,
        tag: &str,
    ) -> Result<String> {
        let destination = format!("{}:{}:{}", transport, name, tag);
        let args = vec![
            "copy".to_string(),
            format!("oci:{}", oci_path.display()),
            destination.clone(),
        ];

        tracing::info!(
            "Copying built image to internal container image storage as {}:{}",
            name,
            tag
        );

        match self.run_command(args).await {
            Ok(_) => Ok(destination),
            Err(BuildError::ToolFailed {
                command,
                status,
                output,
            }) => {
                tracing::error!("image copy failed with output:\n{}", output);
                Err(BuildError::ToolFailed {
                    command,
                    status,
                    output,
                })
            }
            Err(e) => Err(e),
        }
    }
}

fn parse_config_digest(raw_manifest: &str, oci_path: &Path) -> Result<String> {
    let artifact = format!("OCI manifest of {}", oci_path.display());
    let manifest: OciManifest =
        serde_json::from_str(raw_manifest).map_err(|e| BuildError::data_format(&artifact, e))?;

    if manifest.config.digest.is_empty() {
        return Err(BuildError::data_format(artifact, "config.digest is empty"));
    }
    Ok(manifest.config.digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Canned {
        output: CommandOutput,
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl CommandRunner for Canned {
        async fn run(&self, _program: &str, args: &[String]) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(args.to_vec());
            Ok(self.output.clone())
        }
    }

    fn skopeo(output: CommandOutput) -> (Skopeo, Arc<Canned>) {
        let runner = Arc::new(Canned {
            output,
            calls: Mutex::new(Vec::new()),
        });
        (Skopeo::new("skopeo", runner.clone()), runner)
    }

    const MANIFEST: &str = r#"{
        "schemaVersion": 2,
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "digest": "sha256:abc123",
            "size": 1234
        },
        "layers": []
    }"#;

    #[tokio::test]
    async fn test_image_id() {
        let (skopeo, runner) = skopeo(CommandOutput::success(MANIFEST));
        let id = skopeo.image_id(Path::new("/tmp/x/oci")).await.unwrap();

        assert_eq!(id, "sha256:abc123");
        assert_eq!(
            runner.calls.lock().unwrap()[0],
            vec!["inspect", "--raw", "oci:/tmp/x/oci"]
        );
    }

    #[tokio::test]
    async fn test_image_id_malformed_output() {
        let (skopeo, _) = skopeo(CommandOutput::success(r#"{"layers": []}"#));
        let err = skopeo.image_id(Path::new("/tmp/x/oci")).await.unwrap_err();

        match err {
            BuildError::DataFormat { artifact, .. } => {
                assert!(artifact.contains("/tmp/x/oci"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_image_id_tool_failure() {
        let (skopeo, _) = skopeo(CommandOutput::failure(1, "no such directory"));
        let err = skopeo.image_id(Path::new("/tmp/x/oci")).await.unwrap_err();
        assert!(matches!(err, BuildError::ToolFailed { .. }));
    }

    #[tokio::test]
    async fn test_copy_to_storage() {
        let (skopeo, runner) = skopeo(CommandOutput::success(""));
        let dest = skopeo
            .copy_to_storage(
                Path::new("/tmp/x/oci"),
                "containers-storage",
                "flatpak_create_oci-myapp",
                "1.0-3",
            )
            .await
            .unwrap();

        assert_eq!(dest, "containers-storage:flatpak_create_oci-myapp:1.0-3");
        assert_eq!(
            runner.calls.lock().unwrap()[0],
            vec![
                "copy",
                "oci:/tmp/x/oci",
                "containers-storage:flatpak_create_oci-myapp:1.0-3"
            ]
        );
    }

    #[tokio::test]
    async fn test_copy_to_storage_failure_keeps_output() {
        let (skopeo, _) = skopeo(CommandOutput::failure(1, "storage is read-only"));
        let err = skopeo
            .copy_to_storage(Path::new("/tmp/x/oci"), "containers-storage", "n", "t")
            .await
            .unwrap_err();

        match err {
            BuildError::ToolFailed { output, .. } => assert_eq!(output, "storage is read-only"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
