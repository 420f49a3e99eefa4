//! Digest gathering for downloaded distribution artifacts.

use crate::domain::model::ArtifactHash;
use crate::utils::error::Result;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::PathBuf;

/// A downloaded distribution artifact (wheel or sdist) stored on disk.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub package_name: String,
    pub package_version: String,
    pub path: PathBuf,
}

impl Artifact {
    pub fn new(package_name: &str, package_version: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            package_name: package_name.to_string(),
            package_version: package_version.to_string(),
            path: path.into(),
        }
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&self.package_name)
            .to_string()
    }

    fn is_zip_based(&self) -> bool {
        matches!(
            self.path.extension().and_then(|ext| ext.to_str()),
            Some("whl") | Some("zip") | Some("egg")
        )
    }

    /// sha256 digest of the artifact file.
    pub fn sha256(&self) -> Result<String> {
        let content = std::fs::read(&self.path)?;
        Ok(hex::encode(Sha256::digest(&content)))
    }

    /// Digest of the artifact itself plus, for zip-based artifacts, a digest
    /// per archive member.
    pub fn gather_hashes(&self) -> Result<Vec<ArtifactHash>> {
        tracing::debug!("Gathering digests for artifact {:?}", self.path);
        let mut hashes = vec![ArtifactHash {
            name: self.file_name(),
            sha256: self.sha256()?,
        }];

        if self.is_zip_based() {
            let file = std::fs::File::open(&self.path)?;
            let mut archive = zip::ZipArchive::new(file)?;
            for index in 0..archive.len() {
                let mut member = archive.by_index(index)?;
                if member.is_dir() {
                    continue;
                }
                let name = member.name().to_string();
                let mut content = Vec::new();
                member.read_to_end(&mut content)?;
                hashes.push(ArtifactHash {
                    name,
                    sha256: hex::encode(Sha256::digest(&content)),
                });
            }
        }

        Ok(hashes)
    }
}
