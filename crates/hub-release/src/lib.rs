//! Release orchestration for the hub gateway
//!
//! [`ReleaseOrchestrator`] drives the release lifecycle against a target
//! cluster. It serializes work per release name with [`ReleaseLocks`],
//! authorizes rendered manifests with [`ManifestAuthGate`] and delegates the
//! actual deployment to an [`Installer`].

#![deny(missing_docs)]

pub mod cluster;
#[cfg(any(test, feature = "mocks"))]
pub mod fake;
pub mod gate;
pub mod helm;
pub mod installer;
pub mod lock;
pub mod orchestrator;
pub mod pull_secret;
pub mod release;

pub use cluster::KubeClusterOps;
pub use gate::ManifestAuthGate;
pub use helm::HelmCli;
pub use installer::{
    AccessCheck, ClusterOps, Installer, InstallerError, InstallerResult, ReleaseRequest, ResourceInfo,
    ResourceKind,
};
pub use lock::{ReleaseGuard, ReleaseLocks};
pub use orchestrator::{Actor, ReleaseOrchestrator, ReleaseSpec, DEFAULT_LIST_MAX, MAX_HISTORY};
pub use pull_secret::PullSecretPolicy;
pub use release::{AppOverview, Release, ReleaseStatus};
