//! Chart repositories for the hub gateway
//!
//! [`ChartResolver`] turns client supplied [`ChartCoordinates`] into a loaded
//! [`Chart`]: it looks up the `AppRepository`, downloads `index.yaml`, reuses
//! the parsed index from [`ChartIndexCache`] when its checksum is unchanged,
//! and downloads the selected archive.

#![deny(missing_docs)]

pub mod cache;
pub mod index;
pub mod loader;
pub mod repository;
pub mod resolver;

pub use cache::{CacheOutcome, ChartIndexCache};
pub use index::{ChartMetadata, ChartVersion, RepositoryIndex};
pub use loader::{ArchiveLoader, Chart, ChartLoader};
pub use repository::{
    AppRepository, KubeRepositoryStore, RepositoryClient, RepositoryConfig, RepositoryStore,
    ReqwestRepositoryClient,
};
pub use resolver::{ChartCoordinates, ChartResolver};
