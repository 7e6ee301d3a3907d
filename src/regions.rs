use std::fs::File;
use std::io::Read;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use geojson::GeoJson;
use serde_json::Value;
use tracing::{info, warn};

use crate::domain::Region;
use crate::error::CoverageError;
use crate::geometry;

pub const DEFAULT_NAME_PROPERTY: &str = "NAME";
pub const DEFAULT_CODE_PROPERTY: &str = "FIPS";

pub trait RegionSource {
    fn load_regions(&self) -> Result<Vec<Region>, CoverageError>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticRegions {
    regions: Vec<Region>,
}

impl StaticRegions {
    pub fn new(regions: Vec<Region>) -> Self {
        Self { regions }
    }
}

impl RegionSource for StaticRegions {
    fn load_regions(&self) -> Result<Vec<Region>, CoverageError> {
        Ok(self.regions.clone())
    }
}

/// Regions read from a GeoJSON FeatureCollection, plain or gzip-compressed (`.gz`).
#[derive(Debug, Clone)]
pub struct GeoJsonRegionSource {
    path: Utf8PathBuf,
    name_property: String,
    code_property: String,
}

impl GeoJsonRegionSource {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self::with_properties(path, DEFAULT_NAME_PROPERTY, DEFAULT_CODE_PROPERTY)
    }

    pub fn with_properties(path: Utf8PathBuf, name_property: &str, code_property: &str) -> Self {
        Self {
            path,
            name_property: name_property.to_string(),
            code_property: code_property.to_string(),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn read_text(&self) -> Result<String, CoverageError> {
        let file = File::open(self.path.as_std_path())
            .map_err(|err| CoverageError::Filesystem(format!("open {}: {err}", self.path)))?;
        let mut text = String::new();
        let read = if self.path.extension() == Some("gz") {
            GzDecoder::new(file).read_to_string(&mut text)
        } else {
            let mut file = file;
            file.read_to_string(&mut text)
        };
        read.map_err(|err| CoverageError::Filesystem(format!("read {}: {err}", self.path)))?;
        Ok(text)
    }

    pub fn parse_regions(&self, text: &str) -> Result<Vec<Region>, CoverageError> {
        let parsed = text
            .parse::<GeoJson>()
            .map_err(|err| CoverageError::InvalidRegion(format!("{}: {err}", self.path)))?;
        let GeoJson::FeatureCollection(collection) = parsed else {
            return Err(CoverageError::InvalidRegion(format!(
                "{} is not a FeatureCollection",
                self.path
            )));
        };

        let mut regions = Vec::new();
        for (index, feature) in collection.features.into_iter().enumerate() {
            let name = feature
                .property(&self.name_property)
                .and_then(property_text)
                .unwrap_or_else(|| format!("region-{index}"));
            let code = feature
                .property(&self.code_property)
                .and_then(property_text)
                .unwrap_or_default();
            let Some(raw) = feature.geometry else {
                warn!(region = %name, "region has no geometry, skipping");
                continue;
            };
            let converted = geo::Geometry::<f64>::try_from(raw)
                .map_err(|err| CoverageError::Geometry(err.to_string()))
                .and_then(geometry::to_multipolygon);
            match converted {
                Ok(multi) if !multi.0.is_empty() => regions.push(Region {
                    name,
                    code,
                    geometry: multi,
                }),
                Ok(_) => warn!(region = %name, "region geometry is empty, skipping"),
                Err(err) => warn!(region = %name, error = %err, "unusable region geometry, skipping"),
            }
        }
        Ok(regions)
    }
}

impl RegionSource for GeoJsonRegionSource {
    fn load_regions(&self) -> Result<Vec<Region>, CoverageError> {
        let text = self.read_text()?;
        let regions = self.parse_regions(&text)?;
        info!(path = %self.path, regions = regions.len(), "loaded regions");
        Ok(regions)
    }
}

fn property_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
