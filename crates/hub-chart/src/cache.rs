//! Repository index cache keyed by index URL
//!
//! Each entry remembers the SHA-256 of the document it was parsed from. A
//! fetch whose bytes hash to the same value reuses the parsed index; any other
//! content is parsed and replaces the entry. Parsing happens outside the map's
//! shard locks, so refreshing one repository never blocks lookups of another.
//! Two requests racing on the same URL may both parse; the last insert wins and
//! both callers receive a complete index.

use std::sync::Arc;

use dashmap::DashMap;
use hub_common::Result;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::index::RepositoryIndex;

/// A parsed index together with the checksum of its source document
#[derive(Debug)]
pub struct CachedIndex {
    /// Index URL the document was fetched from
    pub url: String,
    /// Hex SHA-256 of the raw document
    pub checksum: String,
    /// Parsed index
    pub index: Arc<RepositoryIndex>,
}

/// Whether a lookup reused the cached parse
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Checksum matched, cached index returned
    Hit,
    /// Document was parsed and stored
    Parsed,
}

/// Process-wide index cache, owned by the composition root
#[derive(Debug, Default)]
pub struct ChartIndexCache {
    entries: DashMap<String, Arc<CachedIndex>>,
}

impl ChartIndexCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Hex SHA-256 of an index document
    pub fn checksum(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// Return the parsed index for `bytes` fetched from `url`.
    ///
    /// On a parse error nothing is cached and the previous entry, if any, is
    /// left in place.
    pub fn lookup_or_parse(
        &self,
        url: &str,
        bytes: &[u8],
    ) -> Result<(Arc<RepositoryIndex>, CacheOutcome)> {
        let checksum = Self::checksum(bytes);

        let cached = self.entries.get(url).map(|entry| Arc::clone(entry.value()));
        if let Some(cached) = cached {
            if cached.checksum == checksum {
                return Ok((Arc::clone(&cached.index), CacheOutcome::Hit));
            }
            debug!(url = %url, old = %cached.checksum, new = %checksum, "repository index changed");
        }

        let index = Arc::new(RepositoryIndex::parse(bytes)?);
        self.entries.insert(
            url.to_string(),
            Arc::new(CachedIndex {
                url: url.to_string(),
                checksum,
                index: Arc::clone(&index),
            }),
        );
        Ok((index, CacheOutcome::Parsed))
    }

    /// Current entry for a URL
    pub fn get(&self, url: &str) -> Option<Arc<CachedIndex>> {
        self.entries.get(url).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of cached repositories
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
