use crate::core::index::IndexClient;
use crate::domain::model::{ArtifactHash, Source};
use crate::domain::ports::DigestsFetcher;
use crate::utils::error::{PipstackError, Result};
use async_trait::async_trait;
use std::collections::HashMap;

/// Fetches artifact digests from all configured package source indexes.
pub struct PackageDigestsFetcher {
    clients: Vec<IndexClient>,
}

impl PackageDigestsFetcher {
    pub fn new(sources: Vec<Source>) -> Result<Self> {
        let clients = sources
            .into_iter()
            .map(IndexClient::new)
            .collect::<Result<Vec<IndexClient>>>()?;
        Ok(Self { clients })
    }
}

#[async_trait]
impl DigestsFetcher for PackageDigestsFetcher {
    async fn fetch_digests(
        &self,
        package_name: &str,
        package_version: &str,
    ) -> Result<HashMap<String, Vec<ArtifactHash>>> {
        let mut report = HashMap::new();
        for client in &self.clients {
            match client.get_package_hashes(package_name, package_version).await {
                Ok(hashes) => {
                    report.insert(client.source().url.clone(), hashes);
                }
                Err(PipstackError::NotFound { message }) => {
                    tracing::debug!(
                        "Index {} does not serve {package_name} in version \
                         {package_version}: {message}",
                        client.source().url
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn test_fetch_digests_skips_indexes_without_package() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/simple/selinon");
            then.status(200)
                .body(r#"<a href="/p/selinon-1.0.0.tar.gz#sha256=aa">selinon-1.0.0.tar.gz</a>"#);
        });
        server.mock(|when, then| {
            when.method(GET).path("/other/selinon");
            then.status(404);
        });

        let mut first = Source::new(&server.url("/simple"));
        first.name = "first".to_string();
        first.warehouse = false;
        let mut second = Source::new(&server.url("/other"));
        second.name = "second".to_string();
        second.warehouse = false;

        let fetcher =
            PackageDigestsFetcher::new(vec![first.clone(), second]).unwrap();
        let report = fetcher.fetch_digests("selinon", "1.0.0").await.unwrap();

        assert_eq!(report.len(), 1);
        assert_eq!(report.get(&first.url).unwrap()[0].sha256, "aa");
    }
}
