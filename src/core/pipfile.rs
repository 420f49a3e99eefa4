//! Parse string representations of a Pipfile or Pipfile.lock and operate on
//! them as objects.

use crate::domain::model::{PackageVersion, Packages, Source};
use crate::utils::error::{PipstackError, Result};
use serde::Serialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::path::Path;

/// The default Pipfile spec number (version) stated in the Pipfile.lock.
const DEFAULT_PIPFILE_SPEC: u64 = 6;

const VCS_KEYS: &[&str] = &["git", "hg", "bzr", "svn"];

/// Meta information stored in a Pipfile or Pipfile.lock.
#[derive(Debug, Clone, Default)]
pub struct PipfileMeta {
    /// Package sources in file order; pipenv hashes the source array as
    /// stated in the Pipfile, so ordering matters.
    pub sources: Vec<Source>,
    pub requires: Map<String, Value>,
    pub pipenv: Option<Map<String, Value>>,
    /// sha256 digest of the Pipfile as recorded in the lock file.
    pub hash: Option<String>,
    pub pipfile_spec: Option<u64>,
}

impl PipfileMeta {
    /// Parse the metadata section as stated in Pipfile or Pipfile.lock.
    pub fn from_value(value: &Value) -> Result<Self> {
        tracing::debug!("Parsing Pipfile/Pipfile.lock metadata section");
        let entry = value.as_object().ok_or_else(|| PipstackError::ParseError {
            file_kind: "Pipfile",
            message: "metadata section is not a table".to_string(),
        })?;
        let mut entry = entry.clone();

        // Naming is confusing here - Pipfile uses source, Pipfile.lock sources.
        let raw_sources = entry
            .remove("sources")
            .or_else(|| entry.remove("source"))
            .unwrap_or_else(|| Value::Array(Vec::new()));
        let raw_sources = raw_sources
            .as_array()
            .cloned()
            .ok_or_else(|| PipstackError::ParseError {
                file_kind: "Pipfile",
                message: "source configuration is not an array".to_string(),
            })?;

        let mut sources: Vec<Source> = Vec::new();
        for raw_source in &raw_sources {
            let source = Source::from_value(raw_source)?;
            match sources.iter_mut().find(|registered| registered.name == source.name) {
                Some(registered) => *registered = source,
                None => sources.push(source),
            }
        }

        let requires = entry
            .remove("requires")
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        let pipenv = entry.remove("pipenv").and_then(|v| v.as_object().cloned());
        let pipfile_spec = entry.remove("pipfile-spec").and_then(|v| v.as_u64());
        let hash = entry
            .remove("hash")
            .and_then(|v| v.get("sha256").and_then(Value::as_str).map(str::to_string));

        if !entry.is_empty() {
            let ignored: Vec<&String> = entry.keys().collect();
            tracing::warn!("Metadata ignored in Pipfile or Pipfile.lock: {:?}", ignored);
        }

        Ok(Self {
            sources,
            requires,
            pipenv,
            hash,
            pipfile_spec,
        })
    }

    /// Metadata as written to a Pipfile (`is_lock` false) or Pipfile.lock.
    pub fn to_value(&self, is_lock: bool) -> Value {
        let sources: Vec<Value> = self.sources.iter().map(Source::to_value).collect();

        let mut result = Map::new();
        if is_lock {
            // Pipenv settings are omitted from the lock file.
            result.insert("sources".to_string(), Value::Array(sources));
            result.insert("requires".to_string(), Value::Object(self.requires.clone()));
            if let Some(hash) = &self.hash {
                result.insert("hash".to_string(), json!({ "sha256": hash }));
            }
            result.insert(
                "pipfile-spec".to_string(),
                Value::from(self.pipfile_spec.unwrap_or(DEFAULT_PIPFILE_SPEC)),
            );
        } else {
            result.insert("source".to_string(), Value::Array(sources));
            if let Some(pipenv) = &self.pipenv {
                result.insert("pipenv".to_string(), Value::Object(pipenv.clone()));
            }
            if !self.requires.is_empty() {
                result.insert("requires".to_string(), Value::Object(self.requires.clone()));
            }
        }

        Value::Object(result)
    }

    pub fn source(&self, name: &str) -> Option<&Source> {
        self.sources.iter().find(|source| source.name == name)
    }

    /// Register a source, replacing an already registered source of the same
    /// name in place.
    pub fn add_source(&mut self, source: Source) {
        match self
            .sources
            .iter_mut()
            .find(|registered| registered.name == source.name)
        {
            Some(registered) => *registered = source,
            None => self.sources.push(source),
        }
    }

    /// Index configuration as stated at the top of a requirements.txt file.
    pub fn to_requirements_index_conf(&self) -> String {
        let mut result = String::new();
        for (position, source) in self.sources.iter().enumerate() {
            if position == 0 {
                result.push_str(&format!("-i {}\n", source.url));
            } else {
                result.push_str(&format!("--extra-index-url {}\n", source.url));
            }
        }
        result
    }
}

/// A Pipfile representation - direct dependencies of an application.
#[derive(Debug, Clone)]
pub struct Pipfile {
    pub packages: Packages,
    pub dev_packages: Packages,
    pub meta: PipfileMeta,
}

impl Pipfile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        tracing::debug!("Loading Pipfile from {:?}", path.as_ref());
        let content = std::fs::read_to_string(path)?;
        Self::from_string(&content)
    }

    /// Parse a Pipfile from its string representation. Pipfiles are TOML,
    /// but a JSON rendition is accepted as a fallback.
    pub fn from_string(content: &str) -> Result<Self> {
        tracing::debug!("Parsing Pipfile representation from string");
        match toml::from_str::<toml::Value>(content) {
            Ok(parsed) => Self::from_value(&serde_json::to_value(parsed)?),
            Err(toml_error) => {
                let parsed: Value = serde_json::from_str(content).map_err(|json_error| {
                    PipstackError::ParseError {
                        file_kind: "Pipfile",
                        message: format!(
                            "not valid TOML ({toml_error}) nor JSON ({json_error})"
                        ),
                    }
                })?;
                Self::from_value(&parsed)
            }
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let entry = value.as_object().ok_or_else(|| PipstackError::ParseError {
            file_kind: "Pipfile",
            message: "Pipfile is not a table".to_string(),
        })?;
        let mut entry = entry.clone();

        let packages_section = entry.remove("packages").unwrap_or_else(|| json!({}));
        let dev_packages_section = entry.remove("dev-packages").unwrap_or_else(|| json!({}));

        // The remaining parts carry requires, pipenv configuration and other flags.
        let meta = PipfileMeta::from_value(&Value::Object(entry))?;

        Ok(Self {
            packages: packages_from_pipfile_section(&packages_section, false, &meta)?,
            dev_packages: packages_from_pipfile_section(&dev_packages_section, true, &meta)?,
            meta,
        })
    }

    pub fn from_package_versions(
        package_versions: Vec<PackageVersion>,
        meta: Option<PipfileMeta>,
    ) -> Self {
        let (dev, default): (Vec<PackageVersion>, Vec<PackageVersion>) =
            package_versions.into_iter().partition(|pv| pv.develop);

        Self {
            packages: Packages::from_package_versions(default),
            dev_packages: Packages::from_package_versions(dev),
            meta: meta.unwrap_or_default(),
        }
    }

    pub fn to_value(&self) -> Value {
        tracing::debug!("Generating Pipfile");
        let mut result = Map::new();
        result.insert(
            "packages".to_string(),
            packages_to_pipfile_section(&self.packages),
        );
        result.insert(
            "dev-packages".to_string(),
            packages_to_pipfile_section(&self.dev_packages),
        );
        if let Value::Object(meta) = self.meta.to_value(false) {
            result.extend(meta);
        }
        Value::Object(result)
    }

    /// Pipfile file content.
    pub fn to_toml(&self) -> Result<String> {
        tracing::debug!("Converting Pipfile to TOML");
        Ok(toml::to_string(&self.to_value())?)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn add_package_version(&mut self, package_version: PackageVersion) {
        if package_version.develop {
            self.dev_packages.insert(package_version);
        } else {
            self.packages.insert(package_version);
        }
    }

    /// Make sure all indexes used by packages are registered in metadata.
    pub fn sanitize_source_indexes(&mut self) -> Result<()> {
        sanitize_sources(&self.packages, &self.dev_packages, &mut self.meta)
    }

    /// The data the lock hash is computed over.
    fn hash_data(&self) -> Value {
        let meta = json!({
            "requires": Value::Object(self.meta.requires.clone()),
            "sources": self.meta.sources.iter().map(Source::to_value).collect::<Vec<Value>>(),
        });

        json!({
            "default": packages_to_pipfile_section(&self.packages),
            "develop": packages_to_pipfile_section(&self.dev_packages),
            "_meta": meta,
        })
    }

    /// sha256 over the canonical compact JSON of the Pipfile data, as pipenv
    /// records it in Pipfile.lock.
    pub fn hash(&self) -> Result<String> {
        let content = serde_json::to_string(&self.hash_data())?;
        let hexdigest = hex::encode(Sha256::digest(content.as_bytes()));
        tracing::debug!("Computed Pipfile hash: {hexdigest}");
        Ok(hexdigest)
    }

    /// Requirement specification in requirements.txt format.
    pub fn to_requirements_file(&self, develop: bool) -> String {
        let mut requirements = self.meta.to_requirements_index_conf();

        let section = if develop {
            &self.dev_packages
        } else {
            &self.packages
        };
        for package_version in section.iter() {
            let specifier = if package_version.version == "*" {
                ""
            } else {
                package_version.version.as_str()
            };
            requirements.push_str(&format!("{}{}\n", package_version.name, specifier));
        }

        requirements
    }
}

/// A Pipfile.lock representation - a fully pinned down application stack
/// with artifact hashes.
#[derive(Debug, Clone)]
pub struct PipfileLock {
    pub packages: Packages,
    pub dev_packages: Packages,
    pub meta: PipfileMeta,
    pub pipfile: Option<Pipfile>,
}

impl PipfileLock {
    pub fn from_file<P: AsRef<Path>>(path: P, pipfile: Option<Pipfile>) -> Result<Self> {
        tracing::debug!("Loading Pipfile.lock from {:?}", path.as_ref());
        let content = std::fs::read_to_string(path)?;
        Self::from_string(&content, pipfile)
    }

    pub fn from_string(content: &str, pipfile: Option<Pipfile>) -> Result<Self> {
        tracing::debug!("Parsing Pipfile.lock JSON representation from string");
        let parsed: Value =
            serde_json::from_str(content).map_err(|e| PipstackError::ParseError {
                file_kind: "Pipfile.lock",
                message: e.to_string(),
            })?;
        Self::from_value(&parsed, pipfile)
    }

    pub fn from_value(value: &Value, pipfile: Option<Pipfile>) -> Result<Self> {
        let meta_section = value.get("_meta").ok_or_else(|| PipstackError::ParseError {
            file_kind: "Pipfile.lock",
            message: "missing _meta section".to_string(),
        })?;
        let meta = PipfileMeta::from_value(meta_section)?;

        let default_section = value.get("default").cloned().unwrap_or_else(|| json!({}));
        let develop_section = value.get("develop").cloned().unwrap_or_else(|| json!({}));

        Ok(Self {
            packages: packages_from_lock_section(&default_section, false, &meta)?,
            dev_packages: packages_from_lock_section(&develop_section, true, &meta)?,
            meta,
            pipfile,
        })
    }

    pub fn from_package_versions(
        pipfile: Pipfile,
        package_versions: Vec<PackageVersion>,
        meta: Option<PipfileMeta>,
    ) -> Self {
        let (dev, default): (Vec<PackageVersion>, Vec<PackageVersion>) =
            package_versions.into_iter().partition(|pv| pv.develop);
        let meta = meta.unwrap_or_else(|| pipfile.meta.clone());

        Self {
            packages: Packages::from_package_versions(default),
            dev_packages: Packages::from_package_versions(dev),
            meta,
            pipfile: Some(pipfile),
        }
    }

    pub fn add_package_version(&mut self, package_version: PackageVersion) {
        if package_version.develop {
            self.dev_packages.insert(package_version);
        } else {
            self.packages.insert(package_version);
        }
    }

    pub fn sanitize_source_indexes(&mut self) -> Result<()> {
        sanitize_sources(&self.packages, &self.dev_packages, &mut self.meta)
    }

    /// Pipfile.lock content, recording the hash of the Pipfile it locks.
    pub fn to_value(&mut self, pipfile: Option<&Pipfile>) -> Result<Value> {
        tracing::debug!("Generating Pipfile.lock");
        let hash = match pipfile.or(self.pipfile.as_ref()) {
            Some(pipfile) => pipfile.hash()?,
            None => {
                return Err(PipstackError::Internal {
                    message: "Pipfile has to be provided when generating Pipfile.lock \
                              to compute its hash"
                        .to_string(),
                })
            }
        };
        self.meta.hash = Some(hash);
        sanitize_sources(&self.packages, &self.dev_packages, &mut self.meta)?;

        let mut result = Map::new();
        result.insert("_meta".to_string(), self.meta.to_value(true));
        result.insert(
            "default".to_string(),
            packages_to_lock_section(&self.packages)?,
        );
        result.insert(
            "develop".to_string(),
            packages_to_lock_section(&self.dev_packages)?,
        );
        Ok(Value::Object(result))
    }

    /// Pipfile.lock file content: 4-space indented JSON with sorted keys and
    /// a trailing newline, matching pipenv output.
    pub fn to_json(&mut self, pipfile: Option<&Pipfile>) -> Result<String> {
        let value = self.to_value(pipfile)?;

        let mut buffer = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        value.serialize(&mut serializer)?;

        let mut content = String::from_utf8(buffer).map_err(|e| PipstackError::Internal {
            message: format!("Generated Pipfile.lock is not valid UTF-8: {e}"),
        })?;
        content.push('\n');
        Ok(content)
    }

    pub fn to_file<P: AsRef<Path>>(&mut self, path: P, pipfile: Option<&Pipfile>) -> Result<()> {
        let content = self.to_json(pipfile)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn index_from_meta(
    meta: &PipfileMeta,
    file_kind: &'static str,
    package_name: &str,
    index_name: Option<&str>,
) -> Result<Option<Source>> {
    match index_name {
        Some(name) => meta
            .source(name)
            .cloned()
            .map(Some)
            .ok_or_else(|| PipstackError::ParseError {
                file_kind,
                message: format!(
                    "Index {name} configured for package {package_name} not found in metadata"
                ),
            }),
        // Pipenv does not assign an index to every package; leave it unassigned.
        None => Ok(None),
    }
}

fn string_array(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|array| {
            array
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Construct a package from its Pipfile entry. The entry is either a bare
/// specifier string (`requests = "*"`) or a table with additional
/// configuration (`requests = {version = "*", index = "pypi"}`).
fn package_from_pipfile_entry(
    package_name: &str,
    entry: &Value,
    develop: bool,
    meta: &PipfileMeta,
) -> Result<PackageVersion> {
    tracing::debug!("Parsing Pipfile entry for package {:?}", package_name);
    match entry {
        Value::String(version) => Ok(PackageVersion::new(package_name, version, develop)),
        Value::Object(table) => {
            if VCS_KEYS.iter().any(|key| table.contains_key(*key)) {
                return Err(PipstackError::UnsupportedConfiguration {
                    message: format!(
                        "Package {package_name} uses a version control system \
                         instead of a package index"
                    ),
                });
            }

            let mut table = table.clone();
            let version = table
                .remove("version")
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| "*".to_string());
            let index_name = table
                .remove("index")
                .and_then(|v| v.as_str().map(str::to_string));
            let extras = table
                .remove("extras")
                .map(|v| string_array(&v))
                .unwrap_or_default();
            let markers = table
                .remove("markers")
                .and_then(|v| v.as_str().map(str::to_string));

            if !table.is_empty() {
                let unused: Vec<&String> = table.keys().collect();
                tracing::warn!(
                    "Unparsed Pipfile entry parts for package {:?}: {:?}",
                    package_name,
                    unused
                );
            }

            let mut package_version = PackageVersion::new(package_name, &version, develop);
            package_version.index =
                index_from_meta(meta, "Pipfile", package_name, index_name.as_deref())?;
            package_version.extras = extras;
            package_version.markers = markers;
            Ok(package_version)
        }
        _ => Err(PipstackError::ParseError {
            file_kind: "Pipfile",
            message: format!("Entry for package {package_name} is neither a string nor a table"),
        }),
    }
}

/// Construct a package from its Pipfile.lock entry; a locked entry has to
/// carry an exact version and artifact hashes.
fn package_from_lock_entry(
    package_name: &str,
    entry: &Value,
    develop: bool,
    meta: &PipfileMeta,
) -> Result<PackageVersion> {
    tracing::debug!("Parsing Pipfile.lock entry for package {:?}", package_name);
    let table = entry.as_object().ok_or_else(|| PipstackError::ParseError {
        file_kind: "Pipfile.lock",
        message: format!("Entry for package {package_name} is not a table"),
    })?;
    let mut table = table.clone();

    let version = table
        .remove("version")
        .and_then(|v| v.as_str().map(str::to_string))
        .filter(|version| !version.is_empty())
        .ok_or_else(|| PipstackError::ParseError {
            file_kind: "Pipfile.lock",
            message: format!("Package {package_name} has a missing or empty locked version"),
        })?;
    let hashes = table
        .remove("hashes")
        .map(|v| string_array(&v))
        .filter(|hashes| !hashes.is_empty())
        .ok_or_else(|| PipstackError::ParseError {
            file_kind: "Pipfile.lock",
            message: format!("Package {package_name} has missing or empty artifact hashes"),
        })?;
    let index_name = table
        .remove("index")
        .and_then(|v| v.as_str().map(str::to_string));
    let markers = table
        .remove("markers")
        .and_then(|v| v.as_str().map(str::to_string));
    let extras = table
        .remove("extras")
        .map(|v| string_array(&v))
        .unwrap_or_default();

    if !table.is_empty() {
        let unused: Vec<&String> = table.keys().collect();
        tracing::warn!(
            "Unparsed Pipfile.lock entry parts for package {:?}: {:?}",
            package_name,
            unused
        );
    }

    let mut package_version = PackageVersion::new(package_name, &version, develop);
    package_version.index =
        index_from_meta(meta, "Pipfile.lock", package_name, index_name.as_deref())?;
    package_version.hashes = hashes;
    package_version.markers = markers;
    package_version.extras = extras;
    Ok(package_version)
}

fn package_to_pipfile_entry(package_version: &PackageVersion) -> (String, Value) {
    let mut entry = Map::new();
    if let Some(index) = &package_version.index {
        entry.insert("index".to_string(), Value::String(index.name.clone()));
    }
    if let Some(markers) = &package_version.markers {
        entry.insert("markers".to_string(), Value::String(markers.clone()));
    }
    if !package_version.extras.is_empty() {
        entry.insert("extras".to_string(), json!(package_version.extras));
    }

    if entry.is_empty() {
        // Only version information is available.
        return (
            package_version.name.clone(),
            Value::String(package_version.version.clone()),
        );
    }

    entry.insert(
        "version".to_string(),
        Value::String(package_version.version.clone()),
    );
    (package_version.name.clone(), Value::Object(entry))
}

fn package_to_lock_entry(package_version: &PackageVersion) -> Result<(String, Value)> {
    if !package_version.is_locked() {
        return Err(PipstackError::Internal {
            message: format!(
                "Trying to generate Pipfile.lock with package {} not locked \
                 to an exact version: {}",
                package_version.name, package_version.version
            ),
        });
    }

    let mut entry = Map::new();
    entry.insert(
        "version".to_string(),
        Value::String(package_version.version.clone()),
    );
    entry.insert("hashes".to_string(), json!(package_version.hashes));
    if let Some(markers) = &package_version.markers {
        entry.insert("markers".to_string(), Value::String(markers.clone()));
    }
    if let Some(index) = &package_version.index {
        entry.insert("index".to_string(), Value::String(index.name.clone()));
    }
    if !package_version.extras.is_empty() {
        entry.insert("extras".to_string(), json!(package_version.extras));
    }

    Ok((package_version.name.clone(), Value::Object(entry)))
}

fn packages_from_pipfile_section(
    section: &Value,
    develop: bool,
    meta: &PipfileMeta,
) -> Result<Packages> {
    let entries = section.as_object().ok_or_else(|| PipstackError::ParseError {
        file_kind: "Pipfile",
        message: "packages section is not a table".to_string(),
    })?;

    let mut packages = Packages::new();
    for (package_name, entry) in entries {
        packages.insert(package_from_pipfile_entry(package_name, entry, develop, meta)?);
    }
    Ok(packages)
}

fn packages_from_lock_section(
    section: &Value,
    develop: bool,
    meta: &PipfileMeta,
) -> Result<Packages> {
    let entries = section.as_object().ok_or_else(|| PipstackError::ParseError {
        file_kind: "Pipfile.lock",
        message: "locked packages section is not a table".to_string(),
    })?;

    let mut packages = Packages::new();
    for (package_name, entry) in entries {
        packages.insert(package_from_lock_entry(package_name, entry, develop, meta)?);
    }
    Ok(packages)
}

fn packages_to_pipfile_section(packages: &Packages) -> Value {
    let mut section = Map::new();
    for package_version in packages.iter() {
        let (name, entry) = package_to_pipfile_entry(package_version);
        section.insert(name, entry);
    }
    Value::Object(section)
}

fn packages_to_lock_section(packages: &Packages) -> Result<Value> {
    let mut section = Map::new();
    for package_version in packages.iter() {
        let (name, entry) = package_to_lock_entry(package_version)?;
        section.insert(name, entry);
    }
    Ok(Value::Object(section))
}

fn check_index_conflict(
    package_version: &PackageVersion,
    index: &Source,
    registered: &Source,
) -> Result<()> {
    if registered.name == index.name && registered.url != index.url {
        return Err(PipstackError::Internal {
            message: format!(
                "Source index {} with URL {} conflicts with index of the same name \
                 with URL {} used by package {} in version {}",
                registered.name, registered.url, index.url, package_version.name,
                package_version.version
            ),
        });
    }
    if registered.name == index.name && registered.verify_ssl != index.verify_ssl {
        return Err(PipstackError::Internal {
            message: format!(
                "Source index {} has different SSL verification settings than the \
                 index used by package {} in version {}",
                registered.name, package_version.name, package_version.version
            ),
        });
    }
    Ok(())
}

/// Register every index referenced by a package in metadata, rejecting
/// conflicting indexes that share a name.
fn sanitize_sources(
    packages: &Packages,
    dev_packages: &Packages,
    meta: &mut PipfileMeta,
) -> Result<()> {
    tracing::debug!("Checking source indexes used by packages");
    for package_version in packages.iter().chain(dev_packages.iter()) {
        let Some(index) = &package_version.index else {
            continue;
        };

        match meta.source(&index.name) {
            Some(registered) => check_index_conflict(package_version, index, registered)?,
            None => {
                for registered in &meta.sources {
                    check_index_conflict(package_version, index, registered)?;
                }
                meta.add_source(index.clone());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIPFILE_CONTENT: &str = r#"
[[source]]
url = "https://pypi.org/simple"
verify_ssl = true
name = "pypi"

[packages]
requests = "*"
click = "*"
thoth-analyzer = "*"
thoth-common = "*"
beautifulsoup4 = "*"
lxml = "*"
pyelftools = "*"
packaging = "*"
semantic-version = "==2.6.0"

[dev-packages]
pytest = "*"
flexmock = "*"
mypy = "*"

[requires]
python_version = "3.6"
"#;

    const PIPFILE_LOCK_CONTENT: &str = r#"{
    "_meta": {
        "hash": {
            "sha256": "0000000000000000000000000000000000000000000000000000000000000000"
        },
        "pipfile-spec": 6,
        "requires": {
            "python_version": "3.6"
        },
        "sources": [
            {
                "name": "pypi",
                "url": "https://pypi.org/simple",
                "verify_ssl": true
            }
        ]
    },
    "default": {
        "requests": {
            "hashes": [
                "sha256:502a824f31acdacb3a35b6690b5fbf0bc41d63a24a45c4004352b0242707598e"
            ],
            "index": "pypi",
            "version": "==2.21.0"
        },
        "semantic-version": {
            "hashes": [
                "sha256:2a4328680073e9b243667b201119772aefc5fc63ae32398d6afafff07c4f54c0"
            ],
            "version": "==2.6.0"
        }
    },
    "develop": {
        "pytest": {
            "hashes": [
                "sha256:3f193df1cfe1d1609d4c583838bea3d532b18d6160fd3f55c9447fdca30848ec"
            ],
            "markers": "python_version >= '2.7'",
            "version": "==4.3.0"
        }
    }
}
"#;

    #[test]
    fn test_parse_pipfile() {
        let pipfile = Pipfile::from_string(PIPFILE_CONTENT).unwrap();

        assert_eq!(pipfile.packages.len(), 9);
        assert_eq!(pipfile.dev_packages.len(), 3);

        let semantic_version = pipfile.packages.get("semantic-version").unwrap();
        assert!(semantic_version.is_locked());
        assert_eq!(semantic_version.locked_version().unwrap(), "2.6.0");

        let requests = pipfile.packages.get("requests").unwrap();
        assert_eq!(requests.version, "*");
        assert!(!requests.develop);

        let pytest = pipfile.dev_packages.get("pytest").unwrap();
        assert!(pytest.develop);

        assert_eq!(
            pipfile.meta.requires.get("python_version").unwrap(),
            &Value::String("3.6".to_string())
        );

        let pypi = pipfile.meta.source("pypi").unwrap();
        assert_eq!(pypi.url, "https://pypi.org/simple");
        assert!(pypi.verify_ssl);
        assert!(pypi.warehouse);
    }

    #[test]
    fn test_parse_pipfile_json_fallback() {
        let content = r#"{
            "source": [{"name": "pypi", "url": "https://pypi.org/simple", "verify_ssl": true}],
            "packages": {"requests": "*"},
            "dev-packages": {},
            "requires": {"python_version": "3.6"}
        }"#;

        let pipfile = Pipfile::from_string(content).unwrap();
        assert_eq!(pipfile.packages.len(), 1);
        assert!(pipfile.packages.contains("requests"));
    }

    #[test]
    fn test_parse_pipfile_garbage_fails() {
        assert!(Pipfile::from_string("{{{ not a pipfile").is_err());
    }

    #[test]
    fn test_pipfile_entry_with_table() {
        let content = r#"
[[source]]
url = "https://pypi.org/simple"
verify_ssl = true
name = "pypi"

[packages]
thoth-common = {version = ">=0.4.0", index = "pypi", extras = ["openshift"]}
"#;

        let pipfile = Pipfile::from_string(content).unwrap();
        let thoth_common = pipfile.packages.get("thoth-common").unwrap();
        assert_eq!(thoth_common.version, ">=0.4.0");
        assert_eq!(thoth_common.extras, vec!["openshift".to_string()]);
        assert_eq!(thoth_common.index.as_ref().unwrap().name, "pypi");
    }

    #[test]
    fn test_pipfile_entry_with_unknown_index_fails() {
        let content = r#"
[packages]
requests = {version = "*", index = "aicoe"}
"#;
        assert!(Pipfile::from_string(content).is_err());
    }

    #[test]
    fn test_pipfile_entry_with_vcs_fails() {
        let content = r#"
[packages]
requests = {git = "https://github.com/psf/requests"}
"#;
        let error = Pipfile::from_string(content).unwrap_err();
        assert!(matches!(
            error,
            PipstackError::UnsupportedConfiguration { .. }
        ));
    }

    #[test]
    fn test_pipfile_toml_roundtrip() {
        let pipfile = Pipfile::from_string(PIPFILE_CONTENT).unwrap();
        let serialized = pipfile.to_toml().unwrap();
        let reparsed = Pipfile::from_string(&serialized).unwrap();

        assert_eq!(pipfile.packages.len(), reparsed.packages.len());
        assert_eq!(pipfile.dev_packages.len(), reparsed.dev_packages.len());
        assert_eq!(
            pipfile.packages.get("semantic-version").unwrap().version,
            reparsed.packages.get("semantic-version").unwrap().version
        );
        assert_eq!(pipfile.hash().unwrap(), reparsed.hash().unwrap());
    }

    #[test]
    fn test_pipfile_hash_is_stable() {
        let first = Pipfile::from_string(PIPFILE_CONTENT).unwrap();
        let second = Pipfile::from_string(PIPFILE_CONTENT).unwrap();

        let hexdigest = first.hash().unwrap();
        assert_eq!(hexdigest.len(), 64);
        assert!(hexdigest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hexdigest, second.hash().unwrap());
    }

    #[test]
    fn test_pipfile_hash_respects_source_file_order() {
        let content = r#"
[[source]]
url = "https://zeta.example.com/simple"
verify_ssl = true
name = "zeta"

[[source]]
url = "https://alpha.example.com/simple"
verify_ssl = true
name = "alpha"

[packages]
requests = "*"

[requires]
python_version = "3.6"
"#;

        let pipfile = Pipfile::from_string(content).unwrap();
        let names: Vec<&str> = pipfile
            .meta
            .sources
            .iter()
            .map(|source| source.name.as_str())
            .collect();
        assert_eq!(names, vec!["zeta", "alpha"]);

        // Digest pipenv computes for this Pipfile, sources kept in file order.
        assert_eq!(
            pipfile.hash().unwrap(),
            "f016b056962c6d692103945469b1dc6e836c518822de4702deb3d2b9bf737ea7"
        );

        let serialized = pipfile.to_value();
        assert_eq!(serialized["source"][0]["name"], "zeta");
        assert_eq!(serialized["source"][1]["name"], "alpha");

        let conf = pipfile.meta.to_requirements_index_conf();
        assert!(conf.starts_with("-i https://zeta.example.com/simple\n"));
        assert!(conf.contains("--extra-index-url https://alpha.example.com/simple\n"));
    }

    #[test]
    fn test_pipfile_hash_changes_with_packages() {
        let pipfile = Pipfile::from_string(PIPFILE_CONTENT).unwrap();
        let mut changed = pipfile.clone();
        changed.add_package_version(PackageVersion::new("selinon", "==1.0.0", false));

        assert_ne!(pipfile.hash().unwrap(), changed.hash().unwrap());
    }

    #[test]
    fn test_parse_pipfile_lock() {
        let pipfile = Pipfile::from_string(PIPFILE_CONTENT).unwrap();
        let lock = PipfileLock::from_string(PIPFILE_LOCK_CONTENT, Some(pipfile)).unwrap();

        assert_eq!(lock.packages.len(), 2);
        assert_eq!(lock.dev_packages.len(), 1);

        let requests = lock.packages.get("requests").unwrap();
        assert_eq!(requests.locked_version().unwrap(), "2.21.0");
        assert_eq!(requests.index.as_ref().unwrap().name, "pypi");
        assert_eq!(requests.hashes.len(), 1);

        let pytest = lock.dev_packages.get("pytest").unwrap();
        assert_eq!(
            pytest.markers.as_deref(),
            Some("python_version >= '2.7'")
        );

        assert_eq!(lock.meta.pipfile_spec, Some(6));
        assert_eq!(
            lock.meta.hash.as_deref(),
            Some("0000000000000000000000000000000000000000000000000000000000000000")
        );
    }

    #[test]
    fn test_lock_entry_without_hashes_fails() {
        let content = r#"{
            "_meta": {"sources": [], "requires": {}},
            "default": {"requests": {"version": "==2.21.0"}},
            "develop": {}
        }"#;
        assert!(PipfileLock::from_string(content, None).is_err());
    }

    #[test]
    fn test_lock_entry_with_unknown_index_reports_lock_file() {
        let content = r#"{
            "_meta": {"sources": [], "requires": {}},
            "default": {
                "requests": {
                    "version": "==2.21.0",
                    "hashes": ["sha256:aa"],
                    "index": "aicoe"
                }
            },
            "develop": {}
        }"#;

        let error = PipfileLock::from_string(content, None).unwrap_err();
        match error {
            PipstackError::ParseError { file_kind, .. } => assert_eq!(file_kind, "Pipfile.lock"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_lock_serialization_records_pipfile_hash() {
        let pipfile = Pipfile::from_string(PIPFILE_CONTENT).unwrap();
        let expected_hash = pipfile.hash().unwrap();
        let mut lock = PipfileLock::from_string(PIPFILE_LOCK_CONTENT, Some(pipfile)).unwrap();

        let content = lock.to_json(None).unwrap();
        assert!(content.ends_with('\n'));
        assert!(content.starts_with("{\n    \"_meta\""));

        let reparsed: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(
            reparsed["_meta"]["hash"]["sha256"].as_str().unwrap(),
            expected_hash
        );
        assert_eq!(reparsed["_meta"]["pipfile-spec"].as_u64().unwrap(), 6);
        assert!(reparsed["default"]["requests"]["hashes"].is_array());
    }

    #[test]
    fn test_lock_serialization_without_pipfile_fails() {
        let mut lock = PipfileLock::from_string(PIPFILE_LOCK_CONTENT, None).unwrap();
        assert!(lock.to_json(None).is_err());
    }

    #[test]
    fn test_lock_with_unlocked_package_fails() {
        let pipfile = Pipfile::from_string(PIPFILE_CONTENT).unwrap();
        let mut package = PackageVersion::new("requests", ">=2.0", false);
        package.hashes = vec!["sha256:00".to_string()];
        let mut lock = PipfileLock::from_package_versions(pipfile, vec![package], None);

        assert!(lock.to_json(None).is_err());
    }

    #[test]
    fn test_from_package_versions_partitions_sections() {
        let pipfile = Pipfile::from_package_versions(
            vec![
                PackageVersion::new("requests", "*", false),
                PackageVersion::new("pytest", "*", true),
            ],
            None,
        );

        assert!(pipfile.packages.contains("requests"));
        assert!(pipfile.dev_packages.contains("pytest"));
        assert!(!pipfile.packages.contains("pytest"));
    }

    #[test]
    fn test_sanitize_source_indexes_registers_package_index() {
        let mut pipfile = Pipfile::from_package_versions(Vec::new(), None);
        let mut package = PackageVersion::new("requests", "*", false);
        package.index = Some(Source::new("https://example.com/simple"));
        pipfile.add_package_version(package);

        assert!(pipfile.meta.sources.is_empty());
        pipfile.sanitize_source_indexes().unwrap();
        assert!(pipfile.meta.source("example-com").is_some());
    }

    #[test]
    fn test_sanitize_source_indexes_conflicting_url_fails() {
        let mut meta = PipfileMeta::default();
        let mut registered = Source::new("https://example.com/simple");
        registered.name = "mirror".to_string();
        meta.add_source(registered);

        let mut pipfile = Pipfile::from_package_versions(Vec::new(), Some(meta));
        let mut conflicting = Source::new("https://other.example.com/simple");
        conflicting.name = "mirror".to_string();
        let mut package = PackageVersion::new("requests", "*", false);
        package.index = Some(conflicting);
        pipfile.add_package_version(package);

        assert!(pipfile.sanitize_source_indexes().is_err());
    }

    #[test]
    fn test_requirements_file_export() {
        let pipfile = Pipfile::from_string(PIPFILE_CONTENT).unwrap();
        let requirements = pipfile.to_requirements_file(false);

        assert!(requirements.starts_with("-i https://pypi.org/simple\n"));
        assert!(requirements.contains("semantic-version==2.6.0\n"));
        assert!(requirements.contains("requests\n"));
        assert!(!requirements.contains("pytest"));

        let dev_requirements = pipfile.to_requirements_file(true);
        assert!(dev_requirements.contains("pytest\n"));
        assert!(!dev_requirements.contains("requests\n"));
    }

    #[test]
    fn test_requirements_index_conf_extra_indexes() {
        let mut meta = PipfileMeta::default();
        meta.add_source(Source::new("https://pypi.org/simple"));
        meta.add_source(Source::new("https://mirror.example.com/simple"));

        let conf = meta.to_requirements_index_conf();
        let lines: Vec<&str> = conf.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("-i "));
        assert!(lines[1].starts_with("--extra-index-url "));
    }

    #[test]
    fn test_meta_ignores_unknown_keys() {
        let meta = PipfileMeta::from_value(&json!({
            "sources": [],
            "requires": {"python_version": "3.6"},
            "unknown-flag": true,
        }))
        .unwrap();

        assert!(meta.sources.is_empty());
        assert_eq!(
            meta.requires.get("python_version").unwrap(),
            &Value::String("3.6".to_string())
        );
    }
}
