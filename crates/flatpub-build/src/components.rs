//! Installed package manifest parsing
//!
//! The export carries an `rpm -qa --qf` listing of everything installed in
//! the Flatpak build tree, one package per line with `;`-separated fields:
//!
//! ```text
//! NAME;VERSION;RELEASE;ARCH;EPOCH;SIZE;SIGMD5;BUILDTIME;SIGPGP;SIGGPG
//! ```

use crate::error::{BuildError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

const FIELD_COUNT: usize = 10;
const SIGNATURE_MARKER: &str = "Key ID ";

/// A package installed in the image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageComponent {
    #[serde(rename = "type")]
    pub component_type: String,
    pub name: String,
    pub version: Option<String>,
    pub release: Option<String>,
    pub arch: Option<String>,
    pub epoch: Option<u64>,
    pub sigmd5: Option<String>,
    pub signature: Option<String>,
}

fn field(value: &str) -> Option<String> {
    match value {
        "(none)" | "" => None,
        v => Some(v.to_string()),
    }
}

/// Parse an rpm manifest listing
///
/// Lines with too few fields and `gpg-pubkey` pseudo packages are skipped.
pub fn parse_rpm_manifest(content: &str, source: &str) -> Result<Vec<ImageComponent>> {
    let mut components = Vec::new();

    for (lineno, line) in content.lines().enumerate() {
        let fields: Vec<&str> = line.split(';').collect();
        if fields.len() < FIELD_COUNT {
            continue;
        }

        let Some(name) = field(fields[0]) else {
            continue;
        };
        if name == "gpg-pubkey" {
            continue;
        }

        let epoch = match field(fields[4]) {
            Some(epoch) => Some(epoch.parse::<u64>().map_err(|_| {
                BuildError::data_format(
                    source,
                    format!("line {}: invalid epoch '{}' for {}", lineno + 1, epoch, name),
                )
            })?),
            None => None,
        };

        let signature = field(fields[8]).or_else(|| field(fields[9])).map(|sig| {
            match sig.split_once(SIGNATURE_MARKER) {
                Some((_, key_id)) => key_id.to_string(),
                None => sig,
            }
        });

        components.push(ImageComponent {
            component_type: "rpm".to_string(),
            name,
            version: field(fields[1]),
            release: field(fields[2]),
            arch: field(fields[3]),
            epoch,
            sigmd5: field(fields[6]),
            signature,
        });
    }

    Ok(components)
}

/// Read and parse a manifest file
pub async fn read_rpm_manifest(path: &Path) -> Result<Vec<ImageComponent>> {
    let content = tokio::fs::read_to_string(path).await?;
    let components = parse_rpm_manifest(&content, &path.display().to_string())?;
    tracing::debug!(
        "Parsed {} components from {}",
        components.len(),
        path.display()
    );
    Ok(components)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = "\
flatpak-runtime-config;29;2;x86_64;(none);1024;f0b2e5cd;1530000000;RSA/SHA256, Mon 02 Jul 2018, Key ID a20aa56b429476b4;(none)
glibc;2.28;9.fc29;x86_64;1;14000;0a1b2c3d;1530000001;(none);RSA/SHA256, Tue 03 Jul 2018, Key ID 429476b4
gpg-pubkey;429476b4;5a6a7a7b;(none);(none);0;(none);1530000002;(none);(none)
truncated;line
zlib;1.2.11;10.fc29;x86_64;(none);200;99ff;1530000003;(none);(none)
";

    #[test]
    fn test_parse_rpm_manifest() {
        let components = parse_rpm_manifest(MANIFEST, "manifest").unwrap();
        assert_eq!(components.len(), 3);

        let runtime = &components[0];
        assert_eq!(runtime.component_type, "rpm");
        assert_eq!(runtime.name, "flatpak-runtime-config");
        assert_eq!(runtime.version.as_deref(), Some("29"));
        assert_eq!(runtime.epoch, None);
        assert_eq!(runtime.signature.as_deref(), Some("a20aa56b429476b4"));

        let glibc = &components[1];
        assert_eq!(glibc.epoch, Some(1));
        assert_eq!(glibc.signature.as_deref(), Some("429476b4"));

        let zlib = &components[2];
        assert_eq!(zlib.signature, None);
        assert_eq!(zlib.sigmd5.as_deref(), Some("99ff"));
    }

    #[test]
    fn test_parse_rpm_manifest_invalid_epoch() {
        let err = parse_rpm_manifest(
            "bash;5.0;1;x86_64;one;10;abcd;1;(none);(none)\n",
            "flatpak-build.rpm_qf",
        )
        .unwrap_err();

        match err {
            BuildError::DataFormat { artifact, message } => {
                assert_eq!(artifact, "flatpak-build.rpm_qf");
                assert!(message.contains("line 1"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_empty_manifest() {
        assert!(parse_rpm_manifest("", "m").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_rpm_manifest() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("flatpak-build.rpm_qf");
        std::fs::write(&path, MANIFEST).unwrap();

        let components = read_rpm_manifest(&path).await.unwrap();
        assert_eq!(components.len(), 3);

        let err = read_rpm_manifest(&temp_dir.path().join("missing.rpm_qf"))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Io(_)));
    }
}
