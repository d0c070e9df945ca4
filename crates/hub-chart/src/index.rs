//! Chart repository index documents (`index.yaml`)

use std::cmp::Ordering;
use std::collections::BTreeMap;

use hub_common::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// Metadata from a chart's `Chart.yaml`, also embedded in index entries
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// Chart name
    pub name: String,
    /// Chart version (semver)
    #[serde(deserialize_with = "scalar_string")]
    pub version: String,
    /// Chart API version (`v1` or `v2`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    /// Version of the packaged application
    #[serde(
        default,
        deserialize_with = "optional_scalar_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub app_version: Option<String>,
    /// One-line description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Icon URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Project home page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,
    /// Search keywords
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    /// Whether the chart is deprecated
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deprecated: bool,
}

/// YAML scalar as written; repositories often leave versions unquoted
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl From<Scalar> for String {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::String(s) => s,
            Scalar::Integer(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

fn scalar_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Scalar::deserialize(deserializer).map(String::from)
}

fn optional_scalar_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(String::from))
}

/// One downloadable version of a chart
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartVersion {
    /// Chart metadata
    #[serde(flatten)]
    pub metadata: ChartMetadata,
    /// Download locations, absolute or relative to the index URL
    #[serde(default)]
    pub urls: Vec<String>,
    /// Archive digest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Parsed repository index
///
/// Versions of each chart are kept sorted newest first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryIndex {
    /// Index format version
    #[serde(default)]
    pub api_version: String,
    /// Chart name to versions
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<ChartVersion>>,
}

/// Index document with entries left undecoded
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIndex {
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    entries: BTreeMap<String, Option<Vec<serde_yaml::Value>>>,
}

impl RepositoryIndex {
    /// Parse an index document and sort every chart's versions newest first.
    ///
    /// Entries that do not decode are skipped, the rest of the index stays usable.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let raw: RawIndex = serde_yaml::from_slice(bytes)
            .map_err(|e| Error::internal(format!("failed to parse repository index: {}", e)))?;

        let mut entries = BTreeMap::new();
        for (name, values) in raw.entries {
            let versions: Vec<ChartVersion> = values
                .unwrap_or_default()
                .into_iter()
                .filter_map(|value| match serde_yaml::from_value(value) {
                    Ok(version) => Some(version),
                    Err(e) => {
                        warn!(chart = %name, error = %e, "skipping invalid index entry");
                        None
                    }
                })
                .collect();
            if !versions.is_empty() {
                entries.insert(name, versions);
            }
        }

        let mut index = RepositoryIndex {
            api_version: raw.api_version,
            entries,
        };
        index.sort_entries();
        Ok(index)
    }

    /// Sort versions of each chart by descending semantic version.
    ///
    /// Versions that do not parse as semver sort after all valid ones.
    pub fn sort_entries(&mut self) {
        for versions in self.entries.values_mut() {
            versions.sort_by(|a, b| compare_versions(&b.metadata.version, &a.metadata.version));
        }
    }

    /// Find a chart version; an empty version selects the newest listed.
    pub fn get(&self, name: &str, version: &str) -> Result<&ChartVersion> {
        let not_found = || {
            Error::not_found(format!(
                "chart {:?} version {:?} not found in repository",
                name, version
            ))
        };

        let versions = self.entries.get(name).ok_or_else(not_found)?;
        let found = if version.is_empty() {
            versions.first()
        } else {
            versions.iter().find(|v| v.metadata.version == version)
        };
        found.ok_or_else(not_found)
    }
}

fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| semver::Version::parse(v.trim_start_matches('v')).ok();
    match (parse(a), parse(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}
