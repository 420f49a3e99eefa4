use crate::domain::model::ArtifactHash;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Fetches artifact digests for a package version from package indexes.
#[async_trait]
pub trait DigestsFetcher: Send + Sync {
    /// Digests for all artifacts of the given locked package version, keyed
    /// by the URL of the index serving them.
    async fn fetch_digests(
        &self,
        package_name: &str,
        package_version: &str,
    ) -> Result<HashMap<String, Vec<ArtifactHash>>>;
}
