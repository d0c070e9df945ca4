//! Chart resolution: coordinates in, loaded chart out

use std::sync::Arc;

use hub_common::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::cache::{CacheOutcome, ChartIndexCache};
use crate::loader::{Chart, ChartLoader};
use crate::repository::{RepositoryClient, RepositoryStore};

/// Where to find a chart and how to install it, as sent by clients
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartCoordinates {
    /// AppRepository holding the chart
    #[serde(default)]
    pub app_repository_resource_name: String,
    /// Chart name in the repository index
    #[serde(default)]
    pub chart_name: String,
    /// Release to create or modify
    #[serde(default)]
    pub release_name: String,
    /// Chart version, empty for the newest
    #[serde(default)]
    pub version: String,
    /// User values as a YAML document
    #[serde(default)]
    pub values: String,
}

impl ChartCoordinates {
    /// Parse a request body
    pub fn parse(body: &[u8]) -> Result<Self> {
        let coordinates: ChartCoordinates = serde_json::from_slice(body)
            .map_err(|e| Error::bad_request(format!("Unable to parse request body: {}", e)))?;
        if coordinates.app_repository_resource_name.is_empty() {
            return Err(Error::bad_request("An AppRepositoryResourceName is required"));
        }
        Ok(coordinates)
    }
}

/// Resolves chart coordinates to a loaded chart
pub struct ChartResolver {
    cache: Arc<ChartIndexCache>,
    repositories: Arc<dyn RepositoryStore>,
    client: Arc<dyn RepositoryClient>,
    loader: Arc<dyn ChartLoader>,
}

impl ChartResolver {
    /// Create a resolver over a shared index cache
    pub fn new(
        cache: Arc<ChartIndexCache>,
        repositories: Arc<dyn RepositoryStore>,
        client: Arc<dyn RepositoryClient>,
        loader: Arc<dyn ChartLoader>,
    ) -> Self {
        Self {
            cache,
            repositories,
            client,
            loader,
        }
    }

    /// Fetch the repository index, find the requested version, download and load it.
    pub async fn resolve(&self, coordinates: &ChartCoordinates) -> Result<Chart> {
        let repo = self
            .repositories
            .repository(&coordinates.app_repository_resource_name)
            .await?;
        let index_url = repo.index_url();

        let bytes = self.client.fetch(&repo, &index_url).await?;
        let (index, outcome) = self.cache.lookup_or_parse(&index_url, &bytes)?;
        debug!(
            url = %index_url,
            cached = outcome == CacheOutcome::Hit,
            "resolved repository index"
        );

        let entry = index.get(&coordinates.chart_name, &coordinates.version)?;
        let location = entry.urls.first().ok_or_else(|| {
            Error::internal(format!(
                "chart {:?} version {:?} has no downloadable URLs",
                coordinates.chart_name, coordinates.version
            ))
        })?;
        let chart_url = resolve_chart_url(&index_url, location)?;

        let archive = self.client.fetch(&repo, &chart_url).await?;
        let chart = self.loader.load(archive)?;

        info!(
            repository = %repo.name,
            chart = %chart.metadata.name,
            version = %chart.metadata.version,
            "loaded chart"
        );
        Ok(chart)
    }
}

/// Resolve a chart download location against the index URL.
///
/// Absolute locations are returned unchanged.
pub fn resolve_chart_url(index_url: &str, location: &str) -> Result<String> {
    let base = Url::parse(index_url)
        .map_err(|e| Error::internal(format!("invalid repository URL {}: {}", index_url, e)))?;
    base.join(location)
        .map(String::from)
        .map_err(|e| Error::internal(format!("invalid chart URL {}: {}", location, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::archive;
    use crate::loader::ArchiveLoader;
    use crate::repository::{MockRepositoryClient, MockRepositoryStore, RepositoryConfig};

    const INDEX: &str = "apiVersion: v1\nentries:\n  foo:\n  - name: foo\n    version: 1.0.0\n    urls: [foo-1.0.0.tgz]\n  - name: foo\n    version: 0.9.0\n    urls: []\n";

    fn store() -> MockRepositoryStore {
        let mut store = MockRepositoryStore::new();
        store.expect_repository().returning(|name| {
            Ok(RepositoryConfig {
                name: name.to_string(),
                url: "https://charts.example.com/stable/".to_string(),
                ..Default::default()
            })
        });
        store
    }

    fn resolver(client: MockRepositoryClient, cache: Arc<ChartIndexCache>) -> ChartResolver {
        ChartResolver::new(cache, Arc::new(store()), Arc::new(client), Arc::new(ArchiveLoader))
    }

    fn coordinates(version: &str) -> ChartCoordinates {
        ChartCoordinates {
            app_repository_resource_name: "stable".to_string(),
            chart_name: "foo".to_string(),
            release_name: "foobar".to_string(),
            version: version.to_string(),
            values: String::new(),
        }
    }

    #[test]
    fn parse_requires_repository_name() {
        let err = ChartCoordinates::parse(br#"{"chartName":"foo","releaseName":"foobar"}"#).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.to_string(), "An AppRepositoryResourceName is required");
    }

    #[test]
    fn parse_reads_camel_case_body() {
        let coords = ChartCoordinates::parse(
            br#"{"appRepositoryResourceName":"stable","chartName":"foo","releaseName":"foobar","version":"1.0.0","values":"a: 1"}"#,
        )
        .unwrap();
        assert_eq!(coords, ChartCoordinates { values: "a: 1".to_string(), ..coordinates("1.0.0") });
    }

    #[test]
    fn parse_rejects_malformed_json() {
        assert_eq!(ChartCoordinates::parse(b"{").unwrap_err().status_code(), 400);
    }

    #[test]
    fn relative_chart_urls_resolve_against_index() {
        assert_eq!(
            resolve_chart_url("https://charts.example.com/stable/index.yaml", "foo-1.0.0.tgz").unwrap(),
            "https://charts.example.com/stable/foo-1.0.0.tgz"
        );
        assert_eq!(
            resolve_chart_url("https://charts.example.com/stable/index.yaml", "https://cdn.example.com/foo.tgz")
                .unwrap(),
            "https://cdn.example.com/foo.tgz"
        );
    }

    #[tokio::test]
    async fn resolves_and_loads_chart() {
        let mut client = MockRepositoryClient::new();
        client.expect_fetch().returning(|_, url| match url {
            "https://charts.example.com/stable/index.yaml" => Ok(INDEX.as_bytes().to_vec()),
            "https://charts.example.com/stable/foo-1.0.0.tgz" => {
                Ok(archive(&[("foo/Chart.yaml", "name: foo\nversion: 1.0.0\n")]))
            }
            other => panic!("unexpected fetch {}", other),
        });

        let cache = Arc::new(ChartIndexCache::new());
        let chart = resolver(client, Arc::clone(&cache))
            .resolve(&coordinates(""))
            .await
            .unwrap();
        assert_eq!(chart.metadata.version, "1.0.0");
        assert!(cache.get("https://charts.example.com/stable/index.yaml").is_some());
    }

    #[tokio::test]
    async fn entry_without_urls_is_an_error() {
        let mut client = MockRepositoryClient::new();
        client
            .expect_fetch()
            .times(1)
            .returning(|_, _| Ok(INDEX.as_bytes().to_vec()));

        let err = resolver(client, Arc::new(ChartIndexCache::new()))
            .resolve(&coordinates("0.9.0"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), r#"chart "foo" version "0.9.0" has no downloadable URLs"#);
    }

    #[tokio::test]
    async fn unknown_version_is_not_found() {
        let mut client = MockRepositoryClient::new();
        client
            .expect_fetch()
            .returning(|_, _| Ok(INDEX.as_bytes().to_vec()));

        let err = resolver(client, Arc::new(ChartIndexCache::new()))
            .resolve(&coordinates("2.0.0"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn failed_index_download_leaves_cache_untouched() {
        let mut client = MockRepositoryClient::new();
        client
            .expect_fetch()
            .returning(|_, _| Err(Error::internal("chart download request failed")));

        let cache = Arc::new(ChartIndexCache::new());
        let err = resolver(client, Arc::clone(&cache))
            .resolve(&coordinates("1.0.0"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "chart download request failed");
        assert!(cache.is_empty());
    }
}
