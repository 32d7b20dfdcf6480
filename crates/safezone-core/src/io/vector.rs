//! GeoJSON polygons in, GeoJSON points out.
//!
//! RFC 7946 GeoJSON is always WGS84 lon/lat, but files exported from GIS
//! tools still carry the legacy `crs` member; it is honoured when present.

use std::path::Path;

use geo::{Geometry, MultiPolygon, Polygon};
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject, JsonValue};
use serde_json::json;

use crate::compliance::SafestPoint;
use crate::crs::Crs;
use crate::error::{Result, SsdError};
use crate::zone::SafetyZone;

fn crs_member(members: Option<&JsonObject>) -> Result<Option<Crs>> {
    let Some(crs) = members.and_then(|m| m.get("crs")) else {
        return Ok(None);
    };
    let name = crs
        .pointer("/properties/name")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| SsdError::CoordinateResolution("GeoJSON crs member without a name".into()))?;
    Crs::from_name(name).map(Some)
}

fn crs_json(crs: &Crs) -> JsonValue {
    json!({ "type": "name", "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", crs.epsg()) } })
}

fn push_polygons(geom: geojson::Geometry, out: &mut Vec<Polygon<f64>>) -> Result<()> {
    match Geometry::<f64>::try_from(geom)? {
        Geometry::Polygon(p) => out.push(p),
        Geometry::MultiPolygon(mp) => out.extend(mp.0),
        Geometry::GeometryCollection(gc) => {
            for g in gc {
                match g {
                    Geometry::Polygon(p) => out.push(p),
                    Geometry::MultiPolygon(mp) => out.extend(mp.0),
                    _ => return Err(SsdError::InvalidInput("safety zone must be polygonal".into())),
                }
            }
        }
        _ => return Err(SsdError::InvalidInput("safety zone must be polygonal".into())),
    }
    Ok(())
}

/// Parse a safety zone from GeoJSON text. All polygonal features are
/// dissolved into one multi-polygon.
pub fn parse_zone(text: &str) -> Result<SafetyZone> {
    let gj: GeoJson = text.parse()?;
    let mut polygons = Vec::new();
    let crs = match gj {
        GeoJson::FeatureCollection(fc) => {
            let crs = crs_member(fc.foreign_members.as_ref())?;
            for f in fc.features {
                if let Some(g) = f.geometry {
                    push_polygons(g, &mut polygons)?;
                }
            }
            crs
        }
        GeoJson::Feature(f) => {
            let crs = crs_member(f.foreign_members.as_ref())?;
            if let Some(g) = f.geometry {
                push_polygons(g, &mut polygons)?;
            }
            crs
        }
        GeoJson::Geometry(g) => {
            let crs = crs_member(g.foreign_members.as_ref())?;
            push_polygons(g, &mut polygons)?;
            crs
        }
    };
    if polygons.is_empty() {
        return Err(SsdError::InvalidInput("safety zone file holds no polygon".into()));
    }
    Ok(SafetyZone::new(
        MultiPolygon::new(polygons),
        Some(crs.unwrap_or(Crs::WGS84)),
    ))
}

pub fn read_zone(path: &Path) -> Result<SafetyZone> {
    parse_zone(&std::fs::read_to_string(path)?)
}

/// One-feature collection holding the safest point, tagged with `crs`.
pub fn safest_point_geojson(point: &SafestPoint, crs: &Crs) -> FeatureCollection {
    let mut props = JsonObject::new();
    props.insert("pssd".into(), json!(point.value));
    props.insert("row".into(), json!(point.row));
    props.insert("col".into(), json!(point.col));
    props.insert("tied_cells".into(), json!(point.tied_cells));

    let feature = Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::new(geojson::Value::Point(vec![point.x, point.y]))),
        id: None,
        properties: Some(props),
        foreign_members: None,
    };
    let mut members = JsonObject::new();
    members.insert("crs".into(), crs_json(crs));
    FeatureCollection { bbox: None, features: vec![feature], foreign_members: Some(members) }
}

pub fn write_safest_point(path: &Path, point: &SafestPoint, crs: &Crs) -> Result<()> {
    let fc = safest_point_geojson(point, crs);
    std::fs::write(path, GeoJson::from(fc).to_string())?;
    Ok(())
}
