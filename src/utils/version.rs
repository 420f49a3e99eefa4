//! Python package name and version handling.
//!
//! Python versions follow PEP 440 and are frequently not valid semantic
//! versions (`0.12.0rc0`, `3.01.2`, `1.0.post1`). Comparison is done on a
//! coerced semver representation.

use crate::utils::error::{PipstackError, Result};
use regex::Regex;
use semver::{BuildMetadata, Prerelease, Version};

/// Normalize a package name according to PEP 503: lowercase, with runs of
/// `-`, `_` and `.` collapsed into a single dash.
pub fn normalize_package_name(package_name: &str) -> String {
    let re = Regex::new(r"[-_.]+").unwrap();
    re.replace_all(package_name.trim(), "-").to_lowercase()
}

/// Normalize a plain version identifier: trimmed, lowercased, without the
/// optional leading `v` some projects tag their releases with.
pub fn normalize_version_identifier(version: &str) -> String {
    let trimmed = version.trim();
    let stripped = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    stripped.to_lowercase()
}

/// Parse a version identifier into a semantic version, coercing identifiers
/// that are not valid semver.
pub fn parse_semantic_version(version_identifier: &str) -> Result<Version> {
    let identifier = normalize_version_identifier(version_identifier);
    if let Ok(version) = Version::parse(&identifier) {
        return Ok(version);
    }

    let coerced = coerce_semantic_version(&identifier)?;
    tracing::debug!(
        "Version identifier {:?} is not valid semver, coerced to {}",
        version_identifier,
        coerced
    );
    Ok(coerced)
}

fn coerce_semantic_version(identifier: &str) -> Result<Version> {
    let re = Regex::new(r"^(\d+)(?:\.(\d+))?(?:\.(\d+))?(.*)$").unwrap();
    let caps = re
        .captures(identifier)
        .ok_or_else(|| PipstackError::Internal {
            message: format!("Cannot coerce version identifier {identifier:?} into a semantic version"),
        })?;

    let component = |index: usize| -> Result<u64> {
        match caps.get(index) {
            // Leading zeros (e.g. 3.01.2) are stripped by the numeric parse.
            Some(m) => m.as_str().parse::<u64>().map_err(|e| PipstackError::Internal {
                message: format!("Version component {:?} out of range: {e}", m.as_str()),
            }),
            None => Ok(0),
        }
    };

    let major = component(1)?;
    let minor = component(2)?;
    let patch = component(3)?;

    let rest = caps.get(4).map(|m| m.as_str()).unwrap_or("");
    let rest: String = rest
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '.' })
        .collect();

    let segments: Vec<String> = rest
        .split('.')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            if segment.chars().all(|c| c.is_ascii_digit()) {
                // Semver pre-release identifiers may not have leading zeros.
                let trimmed = segment.trim_start_matches('0');
                if trimmed.is_empty() { "0" } else { trimmed }.to_string()
            } else {
                segment.to_string()
            }
        })
        .collect();

    if segments.is_empty() {
        return Ok(Version::new(major, minor, patch));
    }

    let pre = Prerelease::new(&segments.join(".")).map_err(|e| PipstackError::Internal {
        message: format!("Cannot coerce version identifier {identifier:?} into a semantic version: {e}"),
    })?;

    Ok(Version {
        major,
        minor,
        patch,
        pre,
        build: BuildMetadata::EMPTY,
    })
}
