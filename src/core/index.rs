//! Querying package source indexes: the PEP 503 simple API and the
//! warehouse JSON API.

use crate::domain::model::{ArtifactHash, Source};
use crate::utils::error::{PipstackError, Result};
use crate::utils::version::{normalize_package_name, parse_semantic_version};
use regex::Regex;
use reqwest::StatusCode;
use semver::Version;
use serde_json::Value;
use std::collections::BTreeSet;

/// HTTP client for a single configured package source index.
pub struct IndexClient {
    source: Source,
    client: reqwest::Client,
}

struct SimpleArtifact {
    name: String,
    sha256: Option<String>,
}

impl IndexClient {
    pub fn new(source: Source) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!source.verify_ssl)
            .build()?;
        Ok(Self { source, client })
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// All package names listed on the simple-index root page.
    pub async fn get_packages(&self) -> Result<BTreeSet<String>> {
        tracing::debug!("Listing packages on index {}", self.source.url);
        let response = self.client.get(&self.source.url).send().await?;
        let page = response.error_for_status()?.text().await?;

        let re = Regex::new(r"<a[^>]*>([^<]+)</a>").unwrap();
        Ok(re
            .captures_iter(&page)
            .map(|caps| normalize_package_name(caps[1].trim()))
            .collect())
    }

    /// All versions of a package available on this index.
    pub async fn get_package_versions(&self, package_name: &str) -> Result<Vec<String>> {
        if self.source.warehouse {
            let record = self.warehouse_record(package_name).await?;
            let releases = warehouse_releases(&record)?;
            return Ok(releases.keys().cloned().collect());
        }

        let page = self.get_simple_page(package_name).await?;
        let versions: BTreeSet<String> = parse_artifact_anchors(&page)
            .into_iter()
            .filter_map(|artifact| version_from_filename(package_name, &artifact.name))
            .collect();
        Ok(versions.into_iter().collect())
    }

    /// Artifact digests for one version of a package. The warehouse API
    /// carries digests in release records; simple pages carry them as
    /// `#sha256=` fragments on artifact anchors.
    pub async fn get_package_hashes(
        &self,
        package_name: &str,
        package_version: &str,
    ) -> Result<Vec<ArtifactHash>> {
        if self.source.warehouse {
            return self
                .warehouse_package_hashes(package_name, package_version)
                .await;
        }

        let page = self.get_simple_page(package_name).await?;
        let mut hashes = Vec::new();
        for artifact in parse_artifact_anchors(&page) {
            if version_from_filename(package_name, &artifact.name).as_deref()
                != Some(package_version)
            {
                continue;
            }
            match artifact.sha256 {
                Some(sha256) => hashes.push(ArtifactHash {
                    name: artifact.name,
                    sha256,
                }),
                None => tracing::warn!(
                    "Artifact {} on index {} carries no sha256 fragment",
                    artifact.name,
                    self.source.url
                ),
            }
        }

        if hashes.is_empty() {
            return Err(PipstackError::NotFound {
                message: format!(
                    "No artifacts for package {package_name} in version {package_version} \
                     found on index {}",
                    self.source.url
                ),
            });
        }
        Ok(hashes)
    }

    /// The newest version of a package available on this index.
    pub async fn get_latest_package_version(&self, package_name: &str) -> Result<Version> {
        let versions = self.get_package_versions(package_name).await?;
        versions
            .iter()
            .filter_map(|version| parse_semantic_version(version).ok())
            .max()
            .ok_or_else(|| PipstackError::NotFound {
                message: format!(
                    "No versions of package {package_name} found on index {}",
                    self.source.url
                ),
            })
    }

    pub async fn provides_package(&self, package_name: &str) -> Result<bool> {
        Ok(self
            .get_packages()
            .await?
            .contains(&normalize_package_name(package_name)))
    }

    pub async fn provides_package_version(
        &self,
        package_name: &str,
        package_version: &str,
    ) -> Result<bool> {
        match self.get_package_versions(package_name).await {
            Ok(versions) => Ok(versions.iter().any(|version| version == package_version)),
            Err(PipstackError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_simple_page(&self, package_name: &str) -> Result<String> {
        let url = format!(
            "{}/{}",
            self.source.url.trim_end_matches('/'),
            normalize_package_name(package_name)
        );
        tracing::debug!("Fetching simple-index page {}", url);

        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(PipstackError::NotFound {
                message: format!(
                    "Package {package_name} not found on index {}",
                    self.source.url
                ),
            });
        }
        Ok(response.error_for_status()?.text().await?)
    }

    async fn warehouse_record(&self, package_name: &str) -> Result<Value> {
        let url = format!(
            "{}/{}/json",
            self.source.api_url(),
            normalize_package_name(package_name)
        );
        tracing::debug!("Fetching warehouse record {}", url);

        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(PipstackError::NotFound {
                message: format!(
                    "Package {package_name} not found on index {}",
                    self.source.url
                ),
            });
        }
        Ok(response.error_for_status()?.json().await?)
    }

    async fn warehouse_package_hashes(
        &self,
        package_name: &str,
        package_version: &str,
    ) -> Result<Vec<ArtifactHash>> {
        let record = self.warehouse_record(package_name).await?;
        let releases = warehouse_releases(&record)?;
        let release = releases
            .get(package_version)
            .and_then(Value::as_array)
            .ok_or_else(|| PipstackError::NotFound {
                message: format!(
                    "Version {package_version} of package {package_name} not found \
                     on index {}",
                    self.source.url
                ),
            })?;

        let mut hashes = Vec::new();
        for artifact in release {
            let name = artifact.get("filename").and_then(Value::as_str);
            let sha256 = artifact
                .get("digests")
                .and_then(|digests| digests.get("sha256"))
                .and_then(Value::as_str);
            match (name, sha256) {
                (Some(name), Some(sha256)) => hashes.push(ArtifactHash {
                    name: name.to_string(),
                    sha256: sha256.to_string(),
                }),
                _ => tracing::warn!(
                    "Skipping warehouse artifact entry without filename or sha256 \
                     digest for package {package_name}"
                ),
            }
        }
        Ok(hashes)
    }
}

fn warehouse_releases(record: &Value) -> Result<&serde_json::Map<String, Value>> {
    record
        .get("releases")
        .and_then(Value::as_object)
        .ok_or_else(|| PipstackError::ParseError {
            file_kind: "warehouse API response",
            message: "missing releases section".to_string(),
        })
}

fn parse_artifact_anchors(page: &str) -> Vec<SimpleArtifact> {
    let re = Regex::new(r#"<a[^>]*href="([^"]*)"[^>]*>([^<]+)</a>"#).unwrap();
    re.captures_iter(page)
        .map(|caps| {
            let sha256 = caps[1]
                .split("#sha256=")
                .nth(1)
                .map(|fragment| fragment.split('&').next().unwrap_or("").to_string())
                .filter(|digest| !digest.is_empty());
            SimpleArtifact {
                name: caps[2].trim().to_string(),
                sha256,
            }
        })
        .collect()
}

/// Extract the version from a wheel or sdist filename of the given package.
fn version_from_filename(package_name: &str, filename: &str) -> Option<String> {
    const EXTENSIONS: &[&str] = &[".tar.gz", ".tar.bz2", ".tar.xz", ".zip", ".whl", ".egg"];
    let stem = EXTENSIONS
        .iter()
        .find_map(|extension| filename.strip_suffix(extension))?;

    let normalized = normalize_package_name(package_name);
    let candidate = stem.get(..normalized.len())?;
    if normalize_package_name(candidate) != normalized {
        return None;
    }

    let rest = stem.get(normalized.len()..)?;
    let rest = rest.strip_prefix('-').or_else(|| rest.strip_prefix('_'))?;

    // Wheels carry compatibility tags after the version.
    let version = rest.split('-').next()?;
    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}
