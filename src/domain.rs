use std::fmt;
use std::str::FromStr;

use geo::{BoundingRect, MultiPolygon, Rect, coord};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoverageError;

/// Base URL of a STAC API, normalized to end with a slash so that relative
/// endpoints (`search`, `collections`) resolve underneath it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogUrl(String);

impl CatalogUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn endpoint(&self, path: &str) -> Result<String, CoverageError> {
        let base = Url::parse(&self.0).map_err(|err| CoverageError::InvalidUrl(err.to_string()))?;
        let joined = base
            .join(path)
            .map_err(|err| CoverageError::InvalidUrl(format!("{}{path}: {err}", self.0)))?;
        Ok(joined.to_string())
    }

    pub fn contains_marker(&self, marker: &str) -> bool {
        !marker.is_empty() && self.0.contains(marker)
    }
}

impl fmt::Display for CatalogUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CatalogUrl {
    type Err = CoverageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let url = Url::parse(trimmed).map_err(|_| CoverageError::InvalidUrl(value.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CoverageError::InvalidUrl(value.to_string()));
        }
        let mut normalized = url.to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn to_rect(self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.min_x, y: self.min_y },
            coord! { x: self.max_x, y: self.max_y },
        )
    }
}

impl FromStr for BoundingBox {
    type Err = CoverageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts = value
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| CoverageError::InvalidBbox(value.to_string()))?;
        let &[min_x, min_y, max_x, max_y] = parts.as_slice() else {
            return Err(CoverageError::InvalidBbox(value.to_string()));
        };
        let finite = [min_x, min_y, max_x, max_y].iter().all(|v| v.is_finite());
        if !finite || min_x > max_x || min_y > max_y {
            return Err(CoverageError::InvalidBbox(value.to_string()));
        }
        Ok(Self {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }
}

/// A reference area with a coarse code, in EPSG:4326 lon/lat.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: String,
    pub code: String,
    pub geometry: MultiPolygon<f64>,
}

impl Region {
    pub fn from_bbox(name: &str, code: &str, bbox: BoundingBox) -> Self {
        Self {
            name: name.to_string(),
            code: code.to_string(),
            geometry: MultiPolygon::new(vec![bbox.to_rect().to_polygon()]),
        }
    }

    /// Axis-aligned envelope of the region, used as the search AOI instead of the full outline.
    pub fn envelope(&self) -> Result<Rect<f64>, CoverageError> {
        self.geometry
            .bounding_rect()
            .ok_or_else(|| CoverageError::InvalidRegion(format!("{} has no coordinates", self.name)))
    }
}

/// One STAC item as returned by a search. Only the parts the classifier reads
/// are typed; assets keep their document order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub assets: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub rel: String,
    pub href: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionSummary {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionsPage {
    pub collections: Vec<CollectionSummary>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl CollectionsPage {
    pub fn next_href(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|link| link.rel == "next")
            .map(|link| link.href.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_url_gets_trailing_slash() {
        let url: CatalogUrl = "https://example.com/api/stac/v1".parse().unwrap();
        assert_eq!(url.as_str(), "https://example.com/api/stac/v1/");
        assert_eq!(
            url.endpoint("search").unwrap(),
            "https://example.com/api/stac/v1/search"
        );
    }

    #[test]
    fn bbox_rejects_inverted_corners() {
        assert!("10,0,0,5".parse::<BoundingBox>().is_err());
        assert!("0,0,1".parse::<BoundingBox>().is_err());
        let bbox: BoundingBox = " -10, -5, 10, 5 ".parse().unwrap();
        assert_eq!(bbox.min_x, -10.0);
        assert_eq!(bbox.max_y, 5.0);
    }
}
