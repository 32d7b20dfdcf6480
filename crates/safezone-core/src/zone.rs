//! Candidate safety-zone polygon.

use geo::{BoundingRect, Centroid, EuclideanDistance, Intersects, MapCoords, MultiPolygon, Point};

use crate::crs::{Crs, Transformer};
use crate::error::{Result, SsdError};
use crate::raster::Extent;

/// User-supplied safety zone, possibly multi-part.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyZone {
    pub shape: MultiPolygon<f64>,
    /// None when the source did not say; callers must resolve before use.
    pub crs: Option<Crs>,
}

impl SafetyZone {
    pub fn new(shape: impl Into<MultiPolygon<f64>>, crs: Option<Crs>) -> Self {
        Self { shape: shape.into(), crs }
    }

    pub fn crs(&self) -> Result<Crs> {
        self.crs
            .ok_or_else(|| SsdError::CoordinateResolution("safety zone".into()))
    }

    pub fn extent(&self) -> Result<Extent> {
        let r = self
            .shape
            .bounding_rect()
            .ok_or_else(|| SsdError::InvalidInput("safety zone has no vertices".into()))?;
        Ok(Extent::new(r.min().x, r.min().y, r.max().x, r.max().y))
    }

    /// Area-weighted centroid in the zone's own CRS.
    pub fn centroid(&self) -> Result<(f64, f64)> {
        self.shape
            .centroid()
            .map(|p| (p.x(), p.y()))
            .ok_or_else(|| SsdError::InvalidInput("safety zone has no centroid".into()))
    }

    /// Same zone expressed in `to`. Pass-through when already there.
    pub fn reprojected(&self, to: &Crs) -> Result<SafetyZone> {
        let from = self.crs()?;
        if from == *to {
            return Ok(self.clone());
        }
        let t = Transformer::new(&from, to)?;
        let shape = self.shape.try_map_coords(|c| {
            let (x, y) = t.apply(c.x, c.y)?;
            Ok::<_, SsdError>(geo::Coord { x, y })
        })?;
        Ok(SafetyZone { shape, crs: Some(*to) })
    }

    /// Planar distance from `(x, y)` to the zone; 0 inside or on the boundary.
    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        let p = Point::new(x, y);
        if self.shape.intersects(&p) {
            return 0.0;
        }
        self.shape
            .0
            .iter()
            .map(|poly| p.euclidean_distance(poly))
            .fold(f64::INFINITY, f64::min)
    }
}
