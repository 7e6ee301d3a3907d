use geo::{Geometry, Intersects, MultiPolygon, Polygon, Rect, Relate};
use serde_json::Value;

use crate::error::CoverageError;

/// Existing extent fully contains the candidate, boundary contact allowed.
pub fn covers(existing: &MultiPolygon<f64>, candidate: &MultiPolygon<f64>) -> bool {
    existing.relate(candidate).is_covers()
}

pub fn intersects(aoi: &Geometry<f64>, extent: &MultiPolygon<f64>) -> bool {
    aoi.intersects(extent)
}

pub fn rect_to_multipolygon(rect: Rect<f64>) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![rect.to_polygon()])
}

/// GeoJSON Polygon object for a search `intersects` clause.
pub fn rect_to_geojson(rect: Rect<f64>) -> Result<Value, CoverageError> {
    let polygon: Polygon<f64> = rect.to_polygon();
    let geometry = geojson::Geometry::new(geojson::Value::from(&polygon));
    serde_json::to_value(&geometry).map_err(|err| CoverageError::Geometry(err.to_string()))
}

/// Coerces any polygonal geometry to a MultiPolygon; other kinds are rejected.
pub fn to_multipolygon(geometry: Geometry<f64>) -> Result<MultiPolygon<f64>, CoverageError> {
    match geometry {
        Geometry::Polygon(polygon) => Ok(MultiPolygon::new(vec![polygon])),
        Geometry::MultiPolygon(multi) => Ok(multi),
        Geometry::Rect(rect) => Ok(rect_to_multipolygon(rect)),
        other => Err(CoverageError::Geometry(format!(
            "expected a polygonal geometry, got {}",
            geometry_kind(&other)
        ))),
    }
}

/// Parses a GeoJSON geometry, or the geometry of a GeoJSON Feature.
pub fn parse_geojson_geometry(text: &str) -> Result<Geometry<f64>, CoverageError> {
    let parsed = text
        .parse::<geojson::GeoJson>()
        .map_err(|err| CoverageError::Geometry(err.to_string()))?;
    let geometry = match parsed {
        geojson::GeoJson::Geometry(geometry) => geometry,
        geojson::GeoJson::Feature(feature) => feature
            .geometry
            .ok_or_else(|| CoverageError::Geometry("feature has no geometry".to_string()))?,
        geojson::GeoJson::FeatureCollection(_) => {
            return Err(CoverageError::Geometry(
                "expected a geometry or a feature, got a feature collection".to_string(),
            ));
        }
    };
    Geometry::<f64>::try_from(geometry).map_err(|err| CoverageError::Geometry(err.to_string()))
}

fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

/// Serde adapter storing a MultiPolygon as a GeoJSON geometry object.
pub mod multipolygon_geojson {
    use geo::MultiPolygon;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &MultiPolygon<f64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        geojson::Geometry::new(geojson::Value::from(value)).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<MultiPolygon<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let geometry = geojson::Geometry::deserialize(deserializer)?;
        match MultiPolygon::<f64>::try_from(geometry.value.clone()) {
            Ok(multi) => Ok(multi),
            Err(_) => geo::Polygon::<f64>::try_from(geometry.value)
                .map(|polygon| MultiPolygon::new(vec![polygon]))
                .map_err(D::Error::custom),
        }
    }
}
