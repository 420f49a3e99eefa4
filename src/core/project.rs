//! Project abstraction and operations on project dependencies.

use crate::core::digests::PackageDigestsFetcher;
use crate::core::index::IndexClient;
use crate::core::pipfile::{Pipfile, PipfileLock, PipfileMeta};
use crate::domain::model::{
    ArtifactHash, PackageVersion, ProvenanceFinding, Severity, Source,
};
use crate::domain::ports::DigestsFetcher;
use crate::utils::error::{PipstackError, Result};
use crate::utils::validation::validate_index_url;
use semver::Version;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// A representation of a Python project - its direct dependencies and,
/// optionally, the locked application stack.
#[derive(Debug, Clone)]
pub struct Project {
    pub pipfile: Pipfile,
    pub pipfile_lock: Option<PipfileLock>,
}

impl Project {
    pub fn new(pipfile: Pipfile, pipfile_lock: Option<PipfileLock>) -> Self {
        Self {
            pipfile,
            pipfile_lock,
        }
    }

    /// Create a project from Pipfile and, optionally, Pipfile.lock files.
    pub fn from_files(
        pipfile_path: impl AsRef<Path>,
        pipfile_lock_path: Option<&Path>,
    ) -> Result<Self> {
        let pipfile = Pipfile::from_file(pipfile_path)?;
        let pipfile_lock = match pipfile_lock_path {
            Some(path) => Some(PipfileLock::from_file(path, Some(pipfile.clone()))?),
            None => None,
        };
        Ok(Self::new(pipfile, pipfile_lock))
    }

    /// Create a project from Pipfile and Pipfile.lock content loaded into
    /// strings.
    pub fn from_strings(pipfile_content: &str, pipfile_lock_content: Option<&str>) -> Result<Self> {
        let pipfile = Pipfile::from_string(pipfile_content)?;
        let pipfile_lock = match pipfile_lock_content {
            Some(content) => Some(PipfileLock::from_string(content, Some(pipfile.clone()))?),
            None => None,
        };
        Ok(Self::new(pipfile, pipfile_lock))
    }

    /// Create a project from `PackageVersion` instances. Without locked
    /// packages the in-memory Pipfile.lock representation is omitted.
    pub fn from_package_versions(
        packages: Vec<PackageVersion>,
        packages_locked: Option<Vec<PackageVersion>>,
        meta: Option<PipfileMeta>,
    ) -> Result<Self> {
        let pipfile = Pipfile::from_package_versions(packages, meta);
        let pipfile_lock = packages_locked.map(|locked| {
            PipfileLock::from_package_versions(pipfile.clone(), locked, Some(pipfile.meta.clone()))
        });

        let mut project = Self::new(pipfile, pipfile_lock);
        project.sanitize_source_indexes()?;
        Ok(project)
    }

    /// Write the current state of the project into Pipfile and Pipfile.lock
    /// files.
    pub fn to_files(
        &mut self,
        pipfile_path: impl AsRef<Path>,
        pipfile_lock_path: Option<&Path>,
    ) -> Result<()> {
        self.pipfile.to_file(pipfile_path)?;
        if let Some(path) = pipfile_lock_path {
            let pipfile = self.pipfile.clone();
            match &mut self.pipfile_lock {
                Some(lock) => lock.to_file(path, Some(&pipfile))?,
                None => {
                    return Err(PipstackError::Internal {
                        message: "Cannot write Pipfile.lock for a project without a locked stack"
                            .to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    pub fn set_allow_prereleases(&mut self, allow_prereleases: bool) {
        self.pipfile
            .meta
            .pipenv
            .get_or_insert_with(serde_json::Map::new)
            .insert(
                "allow_prereleases".to_string(),
                Value::Bool(allow_prereleases),
            );
    }

    pub fn prereleases_allowed(&self) -> bool {
        self.pipfile
            .meta
            .pipenv
            .as_ref()
            .and_then(|pipenv| pipenv.get("allow_prereleases"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Set or unset the version of Python used in the project.
    pub fn set_python_version(&mut self, python_version: Option<&str>) {
        match python_version {
            Some(version) => {
                self.pipfile.meta.requires.insert(
                    "python_version".to_string(),
                    Value::String(version.to_string()),
                );
            }
            None => {
                self.pipfile.meta.requires.remove("python_version");
            }
        }
    }

    pub fn python_version(&self) -> Option<&str> {
        self.pipfile
            .meta
            .requires
            .get("python_version")
            .and_then(Value::as_str)
    }

    /// Iterate through direct dependencies of this project.
    pub fn iter_dependencies(&self, with_devel: bool) -> impl Iterator<Item = &PackageVersion> {
        let dev = with_devel.then(|| self.pipfile.dev_packages.iter());
        self.pipfile.packages.iter().chain(dev.into_iter().flatten())
    }

    /// Iterate through locked dependencies of this project.
    pub fn iter_dependencies_locked(
        &self,
        with_devel: bool,
    ) -> Result<impl Iterator<Item = &PackageVersion>> {
        let lock = self
            .pipfile_lock
            .as_ref()
            .ok_or_else(|| PipstackError::Internal {
                message: "Unable to iterate locked dependencies - no Pipfile.lock provided"
                    .to_string(),
            })?;
        let dev = with_devel.then(|| lock.dev_packages.iter());
        Ok(lock.packages.iter().chain(dev.into_iter().flatten()))
    }

    pub fn is_direct_dependency(&self, package_version: &PackageVersion) -> bool {
        self.pipfile.packages.contains(&package_version.name)
    }

    /// Get the direct requirement for a package, preferring dev packages.
    pub fn get_package_version(&self, package_name: &str) -> Option<&PackageVersion> {
        self.pipfile
            .dev_packages
            .get(package_name)
            .or_else(|| self.pipfile.packages.get(package_name))
    }

    /// Get the locked version of a package, preferring dev packages.
    pub fn get_locked_package_version(&self, package_name: &str) -> Option<&PackageVersion> {
        let lock = self.pipfile_lock.as_ref()?;
        lock.dev_packages
            .get(package_name)
            .or_else(|| lock.packages.get(package_name))
    }

    /// Add a package source index to the project.
    pub fn add_source(
        &mut self,
        url: &str,
        verify_ssl: bool,
        name: Option<&str>,
        warehouse: Option<bool>,
        warehouse_api_url: Option<&str>,
    ) -> Result<Source> {
        validate_index_url("source.url", url)?;

        let mut source = Source::new(url);
        source.verify_ssl = verify_ssl;
        if let Some(name) = name {
            source.name = name.to_string();
        }
        if let Some(warehouse) = warehouse {
            source.warehouse = warehouse;
        }
        if let Some(api_url) = warehouse_api_url {
            source.warehouse_api_url = Some(api_url.to_string());
        }

        self.pipfile.meta.add_source(source.clone());
        if let Some(lock) = &mut self.pipfile_lock {
            lock.meta.add_source(source.clone());
        }
        Ok(source)
    }

    /// Add a package requirement to the Pipfile; locking has to be performed
    /// explicitly once the package is added.
    pub fn add_package(
        &mut self,
        package_name: &str,
        package_version: Option<&str>,
        source: Option<&Source>,
        develop: bool,
    ) -> Result<()> {
        if let Some(source) = source {
            if self.pipfile.meta.source(&source.name).is_none() {
                return Err(PipstackError::Internal {
                    message: format!(
                        "Adding package {package_name} to project without having source \
                         index {} registered in the project",
                        source.name
                    ),
                });
            }
        }

        let mut package_version =
            PackageVersion::new(package_name, package_version.unwrap_or("*"), develop);
        package_version.index = source.cloned();
        self.pipfile.add_package_version(package_version);
        Ok(())
    }

    /// Exclude a locked package version from the application stack by
    /// negating it in the Pipfile. Re-locking is left to the caller.
    pub fn exclude_package(&mut self, mut package_version: PackageVersion) -> Result<()> {
        if !package_version.is_locked() {
            return Err(PipstackError::Internal {
                message: format!(
                    "Cannot exclude package {} not pinned down to a specific version: {}",
                    package_version.name, package_version.version
                ),
            });
        }

        let section = if package_version.develop {
            &mut self.pipfile.dev_packages
        } else {
            &mut self.pipfile.packages
        };

        if let Some(existing) = section.get(&package_version.name).cloned() {
            package_version.negate_version()?;

            if package_version.index != existing.index {
                tracing::warn!(
                    "Excluding package {} but the existing requirement has a different \
                     index configured",
                    package_version.name
                );
            }
            if package_version.markers != existing.markers {
                tracing::warn!(
                    "Excluding package {} but the existing requirement has different \
                     markers configured",
                    package_version.name
                );
            }

            if existing.version != "*" {
                package_version.version =
                    format!("{},{}", package_version.version, existing.version);
            }
            tracing::debug!(
                "Package {} with excluded version {}",
                package_version.name,
                package_version.version
            );
            section.insert(package_version);
        } else {
            // A new requirement constraining the resolution.
            package_version.negate_version()?;
            tracing::debug!(
                "Adding excluded package {} to Pipfile configuration",
                package_version.name
            );
            section.insert(package_version);
        }

        Ok(())
    }

    /// Make sure all indexes are correctly propagated to Pipfile and
    /// Pipfile.lock metadata.
    pub fn sanitize_source_indexes(&mut self) -> Result<()> {
        self.pipfile.sanitize_source_indexes()?;
        if let Some(lock) = &mut self.pipfile_lock {
            lock.sanitize_source_indexes()?;
        }
        Ok(())
    }

    /// Outdated packages in the lock file: each locked package is compared
    /// against the newest version available on its index, or on any
    /// configured index when no index is assigned.
    pub async fn get_outdated_package_versions(
        &self,
        with_devel: bool,
    ) -> Result<BTreeMap<String, (PackageVersion, Version)>> {
        let lock = self
            .pipfile_lock
            .as_ref()
            .ok_or_else(|| PipstackError::Internal {
                message: "Cannot check outdated packages on a not-locked application stack"
                    .to_string(),
            })?;

        let mut result = BTreeMap::new();
        for package_version in self.iter_dependencies_locked(with_devel)? {
            if let Some(index) = &package_version.index {
                let client = IndexClient::new(index.clone())?;
                let latest = client.get_latest_package_version(&package_version.name).await?;
                if package_version.semantic_version()? != latest {
                    result.insert(
                        package_version.name.clone(),
                        (package_version.clone(), latest),
                    );
                }
                continue;
            }

            let mut found = false;
            for source in &lock.meta.sources {
                let client = IndexClient::new(source.clone())?;
                let latest = match client.get_latest_package_version(&package_version.name).await
                {
                    Ok(latest) => latest,
                    Err(PipstackError::NotFound { .. }) => continue,
                    Err(e) => return Err(e),
                };
                found = true;

                if package_version.semantic_version()? != latest {
                    result.insert(
                        package_version.name.clone(),
                        (package_version.clone(), latest),
                    );
                }
            }

            if !found {
                return Err(PipstackError::NotFound {
                    message: format!(
                        "Package {} was not found on any package index configured",
                        package_version.name
                    ),
                });
            }
        }

        Ok(result)
    }

    /// Report configuration issues of the project itself.
    pub fn check_configuration(&self) -> Vec<ProvenanceFinding> {
        let mut findings = Vec::new();
        if self.python_version().is_none() {
            findings.push(ProvenanceFinding::new(
                Severity::Warning,
                "NO-PYTHON-VERSION",
                "No Python version configured in Pipfile, pin one down to get a \
                 reproducible deployment"
                    .to_string(),
            ));
        }
        findings
    }

    /// Check provenance/origin of packages stated in the project.
    pub async fn check_provenance(
        &self,
        whitelisted_sources: &[String],
        digests_fetcher: Option<&dyn DigestsFetcher>,
    ) -> Result<Vec<ProvenanceFinding>> {
        let default_fetcher;
        let fetcher: &dyn DigestsFetcher = match digests_fetcher {
            Some(fetcher) => fetcher,
            None => {
                default_fetcher = PackageDigestsFetcher::new(self.pipfile.meta.sources.clone())?;
                &default_fetcher
            }
        };

        let mut findings = self.index_scan(fetcher).await?;
        findings.extend(self.check_sources(whitelisted_sources));
        Ok(findings)
    }

    /// Check the source configuration in the Pipfile and report back issues.
    fn check_sources(&self, whitelisted_sources: &[String]) -> Vec<ProvenanceFinding> {
        let mut findings = Vec::new();
        for source in &self.pipfile.meta.sources {
            if !whitelisted_sources.is_empty() && !whitelisted_sources.contains(&source.url) {
                findings.push(
                    ProvenanceFinding::new(
                        Severity::Error,
                        "SOURCE-NOT-WHITELISTED",
                        format!(
                            "Configured index {} is not stated in the whitelisted package \
                             sources listing",
                            source.name
                        ),
                    )
                    .with_source(source),
                );
            } else if !source.verify_ssl {
                findings.push(
                    ProvenanceFinding::new(
                        Severity::Warning,
                        "INSECURE-SOURCE",
                        format!("Source {} does not use SSL/TLS verification", source.name),
                    )
                    .with_source(source),
                );
            }
        }
        findings
    }

    /// Generate a full report for locked packages given the sources
    /// configured.
    async fn index_scan(&self, digests_fetcher: &dyn DigestsFetcher) -> Result<Vec<ProvenanceFinding>> {
        let mut findings = Vec::new();
        let mut scanned: HashSet<String> = HashSet::new();

        for package_version in self.iter_dependencies_locked(true)? {
            if !scanned.insert(package_version.name.clone()) {
                tracing::warn!(
                    "Package {} already present in the scan report",
                    package_version.name
                );
                continue;
            }

            let locked_version = package_version.locked_version()?.to_string();
            let index_report = digests_fetcher
                .fetch_digests(&package_version.name, &locked_version)
                .await?;
            findings.extend(check_scan(package_version, &index_report));
        }

        Ok(findings)
    }
}

/// Find and report provenance issues of one locked package given the
/// artifact digests each configured index serves.
fn check_scan(
    package_version: &PackageVersion,
    index_report: &HashMap<String, Vec<ArtifactHash>>,
) -> Vec<ProvenanceFinding> {
    let mut findings = Vec::new();

    let per_index_hashes: Vec<HashSet<&str>> = index_report
        .values()
        .map(|entries| entries.iter().map(|entry| entry.sha256.as_str()).collect())
        .collect();

    if package_version.index.is_none() && index_report.len() > 1 {
        // Indexes serving different artifacts for an unassigned package -
        // suggest to assign the index explicitly.
        let union: HashSet<&str> = per_index_hashes.iter().flatten().copied().collect();
        if per_index_hashes.iter().any(|hashes| *hashes != union) {
            let mut indexes: Vec<String> = index_report.keys().cloned().collect();
            indexes.sort();
            findings.push(
                ProvenanceFinding::new(
                    Severity::Warning,
                    "DIFFERENT-ARTIFACTS-ON-SOURCES",
                    format!(
                        "Configured sources ({}) have different artifacts available, \
                         assign an explicit source to the package",
                        indexes.join(", ")
                    ),
                )
                .for_package(package_version)
                .with_indexes(indexes),
            );
        }
    }

    if let Some(index) = &package_version.index {
        if let Some(configured_entries) = index_report.get(&index.url) {
            if index_report.len() > 1 {
                let used_hashes: Vec<&str> = package_version
                    .hashes
                    .iter()
                    .map(|digest| digest.strip_prefix("sha256:").unwrap_or(digest))
                    .collect();
                let configured_hashes: HashSet<&str> = configured_entries
                    .iter()
                    .map(|entry| entry.sha256.as_str())
                    .collect();

                // Other indexes serving artifacts the lock file refers to.
                let mut other_sources: BTreeMap<String, Vec<ArtifactHash>> = BTreeMap::new();
                for digest in &used_hashes {
                    for (index_url, entries) in index_report {
                        if index_url == &index.url {
                            continue;
                        }
                        for entry in entries.iter().filter(|entry| entry.sha256 == *digest) {
                            other_sources
                                .entry(index_url.clone())
                                .or_default()
                                .push(entry.clone());
                        }
                    }
                }

                if !used_hashes
                    .iter()
                    .all(|digest| configured_hashes.contains(digest))
                {
                    let indexes: Vec<String> = other_sources.keys().cloned().collect();
                    findings.push(
                        ProvenanceFinding::new(
                            Severity::Error,
                            "ARTIFACT-DIFFERENT-SOURCE",
                            format!(
                                "Artifacts are installed from different sources ({}) not \
                                 respecting the configured index {}",
                                indexes.join(", "),
                                index.name
                            ),
                        )
                        .for_package(package_version)
                        .with_indexes(indexes),
                    );
                } else if !other_sources.is_empty() {
                    let indexes: Vec<String> = other_sources.keys().cloned().collect();
                    findings.push(
                        ProvenanceFinding::new(
                            Severity::Info,
                            "ARTIFACT-POSSIBLE-DIFFERENT-SOURCE",
                            format!(
                                "Artifacts can be installed from different sources ({}) not \
                                 respecting the configured index {}",
                                indexes.join(", "),
                                index.name
                            ),
                        )
                        .for_package(package_version)
                        .with_indexes(indexes),
                    );
                }
            }
        } else {
            findings.push(
                ProvenanceFinding::new(
                    Severity::Error,
                    "MISSING-PACKAGE",
                    format!(
                        "Source index {} is explicitly assigned to package {} but it has \
                         no record for the given package",
                        index.name, package_version.name
                    ),
                )
                .for_package(package_version),
            );
        }
    }

    for digest in &package_version.hashes {
        let digest = digest.strip_prefix("sha256:").unwrap_or(digest);
        let known = index_report
            .values()
            .flatten()
            .any(|entry| entry.sha256 == digest);
        if !known {
            findings.push(
                ProvenanceFinding::new(
                    Severity::Error,
                    "INVALID-ARTIFACT-HASH",
                    format!("Hash {digest} was not found on any configured index"),
                )
                .for_package(package_version),
            );
        }
    }

    findings
}
