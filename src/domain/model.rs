use crate::utils::error::{PipstackError, Result};
use crate::utils::version::{normalize_package_name, parse_semantic_version};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::btree_map;
use std::collections::BTreeMap;
use url::Url;

/// Simple-index URLs known to be backed by the warehouse (PyPI) API.
const KNOWN_WAREHOUSE_URLS: &[&str] = &["https://pypi.org/simple", "https://pypi.python.org/simple"];

/// A package source index as configured in a Pipfile `[[source]]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub name: String,
    pub url: String,
    pub verify_ssl: bool,
    pub warehouse: bool,
    pub warehouse_api_url: Option<String>,
}

impl Source {
    pub fn new(url: &str) -> Self {
        Self {
            name: Self::default_name_for(url),
            warehouse: Self::is_known_warehouse(url),
            url: url.to_string(),
            verify_ssl: true,
            warehouse_api_url: None,
        }
    }

    fn default_name_for(url: &str) -> String {
        Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(|host| host.replace('.', "-")))
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn is_known_warehouse(url: &str) -> bool {
        KNOWN_WAREHOUSE_URLS.contains(&url.trim_end_matches('/'))
    }

    /// The warehouse JSON API base for this index, derived from the simple
    /// URL when not configured explicitly.
    pub fn api_url(&self) -> String {
        if let Some(api_url) = &self.warehouse_api_url {
            return api_url.trim_end_matches('/').to_string();
        }

        let base = self.url.trim_end_matches('/');
        let base = base.strip_suffix("/simple").unwrap_or(base);
        format!("{base}/pypi")
    }

    /// Parse a source entry as stated in Pipfile or Pipfile.lock metadata.
    pub fn from_value(value: &Value) -> Result<Self> {
        let entry = value.as_object().ok_or_else(|| PipstackError::ParseError {
            file_kind: "Pipfile",
            message: "source entry is not a table".to_string(),
        })?;

        let url = entry
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| PipstackError::ParseError {
                file_kind: "Pipfile",
                message: "source entry without a url".to_string(),
            })?;

        let mut source = Source::new(url);
        if let Some(name) = entry.get("name").and_then(Value::as_str) {
            source.name = name.to_string();
        }
        if let Some(verify_ssl) = entry.get("verify_ssl").and_then(Value::as_bool) {
            source.verify_ssl = verify_ssl;
        }
        if let Some(warehouse) = entry.get("warehouse").and_then(Value::as_bool) {
            source.warehouse = warehouse;
        }
        if let Some(api_url) = entry.get("warehouse_api_url").and_then(Value::as_str) {
            source.warehouse_api_url = Some(api_url.to_string());
        }

        Ok(source)
    }

    /// Source entry as written back to Pipfile/Pipfile.lock metadata. The
    /// warehouse flag is an extension and is omitted from manifests.
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "url": self.url,
            "verify_ssl": self.verify_ssl,
        })
    }

    pub fn to_value_with_warehouse(&self) -> Value {
        let mut value = self.to_value();
        if let Value::Object(entry) = &mut value {
            entry.insert("warehouse".to_string(), Value::Bool(self.warehouse));
            if let Some(api_url) = &self.warehouse_api_url {
                entry.insert(
                    "warehouse_api_url".to_string(),
                    Value::String(api_url.clone()),
                );
            }
        }
        value
    }
}

/// An artifact name together with its sha256 digest as served by an index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactHash {
    pub name: String,
    pub sha256: String,
}

/// A single package requirement or locked package as stated in a Pipfile or
/// Pipfile.lock entry.
#[derive(Debug, Clone)]
pub struct PackageVersion {
    /// PEP 503 normalized package name.
    pub name: String,
    /// Version specifier, e.g. `*`, `==2.6.0` or `>=1.0,<2.0`.
    pub version: String,
    pub develop: bool,
    pub index: Option<Source>,
    /// Locked artifact hashes in pipenv notation (`sha256:<digest>`).
    pub hashes: Vec<String>,
    pub markers: Option<String>,
    pub extras: Vec<String>,
}

impl PackageVersion {
    pub fn new(name: &str, version: &str, develop: bool) -> Self {
        Self {
            name: normalize_package_name(name),
            version: version.trim().to_string(),
            develop,
            index: None,
            hashes: Vec::new(),
            markers: None,
            extras: Vec::new(),
        }
    }

    /// Whether this package is pinned down to an exact version.
    pub fn is_locked(&self) -> bool {
        self.version.starts_with("==")
    }

    pub fn locked_version(&self) -> Result<&str> {
        self.version
            .strip_prefix("==")
            .ok_or_else(|| PipstackError::Internal {
                message: format!(
                    "Package {} is not locked to an exact version: {}",
                    self.name, self.version
                ),
            })
    }

    /// Semantic version of a locked package, coerced when the Python version
    /// identifier is not valid semver.
    pub fn semantic_version(&self) -> Result<Version> {
        parse_semantic_version(self.locked_version()?)
    }

    /// Turn a locked `==v` specifier into its `!=v` negation.
    pub fn negate_version(&mut self) -> Result<()> {
        let locked = self.locked_version()?.to_string();
        self.version = format!("!={locked}");
        Ok(())
    }

    /// Compare two locked versions of the same package.
    pub fn compare_version(&self, other: &PackageVersion) -> Result<Ordering> {
        if self.name != other.name {
            return Err(PipstackError::Internal {
                message: format!(
                    "Comparing versions of different packages: {} and {}",
                    self.name, other.name
                ),
            });
        }

        Ok(self.semantic_version()?.cmp(&other.semantic_version()?))
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        let index_url = |pv: &Self| pv.index.as_ref().map(|source| source.url.clone());
        self.name == other.name && self.version == other.version && index_url(self) == index_url(other)
    }
}

/// One section of packages (default or develop) with deterministic ordering.
#[derive(Debug, Clone, Default)]
pub struct Packages {
    inner: BTreeMap<String, PackageVersion>,
}

impl Packages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_package_versions(package_versions: Vec<PackageVersion>) -> Self {
        let mut packages = Self::new();
        for package_version in package_versions {
            packages.insert(package_version);
        }
        packages
    }

    pub fn insert(&mut self, package_version: PackageVersion) {
        self.inner
            .insert(package_version.name.clone(), package_version);
    }

    pub fn get(&self, package_name: &str) -> Option<&PackageVersion> {
        self.inner.get(&normalize_package_name(package_name))
    }

    pub fn contains(&self, package_name: &str) -> bool {
        self.get(package_name).is_some()
    }

    pub fn iter(&self) -> btree_map::Values<'_, String, PackageVersion> {
        self.inner.values()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Severity of a provenance or configuration finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A single structured finding produced by provenance checking.
#[derive(Debug, Clone, Serialize)]
pub struct ProvenanceFinding {
    #[serde(rename = "type")]
    pub severity: Severity,
    pub id: String,
    pub justification: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<String>,
}

impl ProvenanceFinding {
    pub fn new(severity: Severity, id: &str, justification: String) -> Self {
        Self {
            severity,
            id: id.to_string(),
            justification,
            package_name: None,
            package_version: None,
            source: None,
            indexes: Vec::new(),
        }
    }

    pub fn for_package(mut self, package_version: &PackageVersion) -> Self {
        self.package_name = Some(package_version.name.clone());
        self.package_version = Some(package_version.version.clone());
        self.source = package_version.index.clone();
        self
    }

    pub fn with_source(mut self, source: &Source) -> Self {
        self.source = Some(source.clone());
        self
    }

    pub fn with_indexes(mut self, indexes: Vec<String>) -> Self {
        self.indexes = indexes;
        self
    }
}
