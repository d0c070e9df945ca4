//! Release objects as reported by the installer, and list shaping

use std::collections::HashMap;

use hub_chart::ChartMetadata;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Status of a release that was uninstalled with history retained
pub const STATUS_UNINSTALLED: &str = "uninstalled";
/// Status of a successfully deployed release
pub const STATUS_DEPLOYED: &str = "deployed";

/// Lifecycle information of one release revision
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    /// First deployment time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_deployed: Option<String>,
    /// Last deployment time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_deployed: Option<String>,
    /// Human readable description of the last operation
    #[serde(default)]
    pub description: String,
    /// Release status, e.g. `deployed`, `failed`, `uninstalled`
    #[serde(default)]
    pub status: String,
    /// Rendered NOTES.txt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Chart a release was installed from
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseChart {
    /// Chart metadata
    #[serde(default)]
    pub metadata: ChartMetadata,
    /// Chart default values
    #[serde(default)]
    pub values: Map<String, Value>,
}

/// One revision of a release
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Release {
    /// Release name
    pub name: String,
    /// Namespace the release lives in
    #[serde(default)]
    pub namespace: String,
    /// Revision number
    #[serde(default)]
    pub version: i64,
    /// Lifecycle information
    #[serde(default)]
    pub info: ReleaseInfo,
    /// Source chart
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<ReleaseChart>,
    /// User supplied values
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Rendered manifest
    #[serde(default)]
    pub manifest: String,
}

impl Release {
    /// Chart metadata, if the installer reported it
    pub fn chart_metadata(&self) -> Option<&ChartMetadata> {
        self.chart.as_ref().map(|c| &c.metadata)
    }
}

/// Short status summary, logged after every mutation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseStatus {
    /// Release name
    pub name: String,
    /// Namespace
    pub namespace: String,
    /// Revision number
    pub revision: i64,
    /// Status string
    pub status: String,
    /// Description of the last operation
    pub description: String,
}

impl From<&Release> for ReleaseStatus {
    fn from(release: &Release) -> Self {
        Self {
            name: release.name.clone(),
            namespace: release.namespace.clone(),
            revision: release.version,
            status: release.info.status.clone(),
            description: release.info.description.clone(),
        }
    }
}

/// List entry returned to clients
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppOverview {
    /// Release name
    pub release_name: String,
    /// Description of the last operation
    pub description: String,
    /// Chart version
    pub version: String,
    /// Namespace
    pub namespace: String,
    /// Chart icon URL
    pub icon: String,
    /// Release status
    pub status: String,
    /// Chart name
    pub chart: String,
    /// Full chart metadata
    pub chart_metadata: ChartMetadata,
}

impl From<&Release> for AppOverview {
    fn from(release: &Release) -> Self {
        let metadata = release.chart_metadata().cloned().unwrap_or_default();
        Self {
            release_name: release.name.clone(),
            description: release.info.description.clone(),
            version: metadata.version.clone(),
            namespace: release.namespace.clone(),
            icon: metadata.icon.clone().unwrap_or_default(),
            status: release.info.status.clone(),
            chart: metadata.name.clone(),
            chart_metadata: metadata,
        }
    }
}

/// Keep only the highest revision of each release name, then restrict to
/// `namespace` when given.
///
/// Output order follows the first appearance of each name in the input.
pub fn latest_revisions(releases: Vec<Release>, namespace: Option<&str>) -> Vec<Release> {
    let mut order: Vec<String> = Vec::new();
    let mut latest: HashMap<String, Release> = HashMap::new();

    for release in releases {
        if namespace.is_some_and(|ns| release.namespace != ns) {
            continue;
        }
        match latest.get(&release.name) {
            Some(existing) if existing.version >= release.version => {}
            Some(_) => {
                latest.insert(release.name.clone(), release);
            }
            None => {
                order.push(release.name.clone());
                latest.insert(release.name.clone(), release);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|name| latest.remove(&name))
        .collect()
}

/// Whether a release passes a status filter.
///
/// `None`, empty and `all` disable filtering; otherwise statuses compare
/// case-insensitively.
pub fn status_matches(release: &Release, filter: Option<&str>) -> bool {
    match filter.map(str::trim) {
        None | Some("") => true,
        Some(f) if f.eq_ignore_ascii_case("all") => true,
        Some(f) => release.info.status.eq_ignore_ascii_case(f),
    }
}
