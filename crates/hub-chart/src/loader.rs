//! Chart archive loading

use std::io::Read;

use flate2::read::GzDecoder;
use hub_common::{Error, Result};
use serde_json::{Map, Value};

use crate::index::ChartMetadata;

/// A loaded chart: metadata, default values and the original archive
#[derive(Clone, Debug, Default)]
pub struct Chart {
    /// Parsed `Chart.yaml`
    pub metadata: ChartMetadata,
    /// Parsed `values.yaml`, empty when the chart has none
    pub values: Map<String, Value>,
    /// Raw `.tgz` bytes, handed to the installer unchanged
    pub archive: Vec<u8>,
}

/// Turns downloaded archive bytes into a [`Chart`]
#[cfg_attr(test, mockall::automock)]
pub trait ChartLoader: Send + Sync {
    /// Load a chart archive
    fn load(&self, archive: Vec<u8>) -> Result<Chart>;
}

/// Loads gzip-compressed tar chart archives
#[derive(Clone, Copy, Debug, Default)]
pub struct ArchiveLoader;

impl ChartLoader for ArchiveLoader {
    fn load(&self, archive: Vec<u8>) -> Result<Chart> {
        let mut metadata = None;
        let mut values = Map::new();

        let mut tar = tar::Archive::new(GzDecoder::new(archive.as_slice()));
        let entries = tar
            .entries()
            .map_err(|e| Error::internal(format!("failed to read chart archive: {}", e)))?;

        for entry in entries {
            let mut entry =
                entry.map_err(|e| Error::internal(format!("failed to read chart archive: {}", e)))?;
            let path = entry
                .path()
                .map_err(|e| Error::internal(format!("invalid path in chart archive: {}", e)))?
                .into_owned();

            // Only top-level files of the chart directory; subcharts live deeper.
            let components: Vec<_> = path.components().collect();
            if components.len() != 2 {
                continue;
            }
            let file_name = components[1].as_os_str().to_string_lossy().into_owned();
            if file_name != "Chart.yaml" && file_name != "values.yaml" {
                continue;
            }

            let mut contents = Vec::new();
            entry
                .read_to_end(&mut contents)
                .map_err(|e| Error::internal(format!("failed to read {}: {}", file_name, e)))?;

            if file_name == "Chart.yaml" {
                let parsed: ChartMetadata = serde_yaml::from_slice(&contents)
                    .map_err(|e| Error::internal(format!("invalid Chart.yaml: {}", e)))?;
                metadata = Some(parsed);
            } else {
                values = match serde_yaml::from_slice::<Value>(&contents)
                    .map_err(|e| Error::internal(format!("invalid values.yaml: {}", e)))?
                {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
            }
        }

        let metadata =
            metadata.ok_or_else(|| Error::internal("chart archive does not contain Chart.yaml"))?;

        Ok(Chart {
            metadata,
            values,
            archive,
        })
    }
}
