//! Coordinate reference systems, identified by EPSG code and backed by
//! `proj4rs` definitions. All coordinate math uses f64 for precision.
//!
//! Geographic coordinates are exchanged in degrees; the radian convention of
//! `proj4rs` stays inside [`Transformer`].

use proj4rs::proj::Proj;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SsdError};

/// Last UTM zone with an EPSG 269zz (NAD83) code.
const LAST_NAD83_ZONE: u8 = 23;

/// Fixed projection definitions outside the UTM families.
#[rustfmt::skip]
const DEFINITIONS: &[(u32, &str)] = &[
    (4326, "+proj=longlat +datum=WGS84 +no_defs"),
    (4269, "+proj=longlat +datum=NAD83 +no_defs"),
    (4258, "+proj=longlat +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +no_defs"),
    // CONUS Albers (NAD83), the LANDFIRE grid.
    (5070, "+proj=aea +lat_0=23 +lon_0=-96 +lat_1=29.5 +lat_2=45.5 +x_0=0 +y_0=0 +datum=NAD83 +units=m +no_defs"),
    (6350, "+proj=aea +lat_0=23 +lon_0=-96 +lat_1=29.5 +lat_2=45.5 +x_0=0 +y_0=0 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs"),
    (3310, "+proj=aea +lat_0=0 +lon_0=-120 +lat_1=34 +lat_2=40.5 +x_0=0 +y_0=-4000000 +datum=NAD83 +units=m +no_defs"),
    (3338, "+proj=aea +lat_0=50 +lon_0=-154 +lat_1=55 +lat_2=65 +x_0=0 +y_0=0 +datum=NAD83 +units=m +no_defs"),
    (3083, "+proj=aea +lat_0=18 +lon_0=-100 +lat_1=27.5 +lat_2=35 +x_0=1500000 +y_0=6000000 +datum=NAD83 +units=m +no_defs"),
    (3577, "+proj=aea +lat_0=0 +lon_0=132 +lat_1=-18 +lat_2=-36 +x_0=0 +y_0=0 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs"),
    (2163, "+proj=laea +lat_0=45 +lon_0=-100 +x_0=0 +y_0=0 +a=6370997 +b=6370997 +units=m +no_defs"),
    (3035, "+proj=laea +lat_0=52 +lon_0=10 +x_0=4321000 +y_0=3210000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs"),
    (3978, "+proj=lcc +lat_0=49 +lon_0=-95 +lat_1=49 +lat_2=77 +x_0=0 +y_0=0 +datum=NAD83 +units=m +no_defs"),
    (2193, "+proj=tmerc +lat_0=0 +lon_0=173 +k=0.9996 +x_0=1600000 +y_0=10000000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs"),
    (2056, "+proj=somerc +lat_0=46.9524055555556 +lon_0=7.43958333333333 +k_0=1 +x_0=2600000 +y_0=1200000 +ellps=bessel +towgs84=674.374,15.056,405.346,0,0,0,0 +units=m +no_defs"),
    (3395, "+proj=merc +lon_0=0 +k=1 +x_0=0 +y_0=0 +datum=WGS84 +units=m +no_defs"),
    (3857, "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +nadgrids=@null +no_defs"),
];

/// A point in geographic coordinates (WGS84).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LonLat {
    /// Longitude in degrees, -180 to +180.
    pub lon: f64,
    /// Latitude in degrees, -90 to +90.
    pub lat: f64,
}

impl LonLat {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

/// A coordinate reference system with a known projection definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Crs {
    epsg: u32,
}

impl Crs {
    pub const WGS84: Crs = Crs { epsg: 4326 };

    /// Resolve an EPSG code.
    ///
    /// Recognised: the WGS84 UTM zones (326zz, 327zz), NAD83 UTM 269zz for
    /// zones 1-23, ETRS89 UTM 258zz for zones 28-38, and the geographic,
    /// Albers, Lambert and Mercator systems listed in `DEFINITIONS`.
    pub fn from_epsg(code: u32) -> Result<Self> {
        if definition(code).is_some() {
            Ok(Crs { epsg: code })
        } else {
            Err(SsdError::CapabilityUnavailable(format!(
                "no projection definition for EPSG:{code}"
            )))
        }
    }

    /// Parse `EPSG:26912`, `epsg:4326` or `urn:ogc:def:crs:EPSG::26912`.
    /// `OGC:CRS84` is accepted as WGS84 lon/lat.
    pub fn from_name(name: &str) -> Result<Self> {
        let trimmed = name.trim();
        if trimmed.eq_ignore_ascii_case("urn:ogc:def:crs:OGC:1.3:CRS84")
            || trimmed.eq_ignore_ascii_case("OGC:CRS84")
        {
            return Ok(Crs::WGS84);
        }
        let upper = trimmed.to_ascii_uppercase();
        let digits = upper
            .rsplit(':')
            .next()
            .filter(|_| upper.contains("EPSG"))
            .and_then(|d| d.parse::<u32>().ok())
            .ok_or_else(|| SsdError::CoordinateResolution(format!("unrecognised CRS name '{name}'")))?;
        Self::from_epsg(digits)
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    /// proj-string definition of this CRS.
    pub fn definition(&self) -> String {
        // Construction goes through `from_epsg`, so the lookup cannot miss.
        definition(self.epsg).unwrap_or_default()
    }

    pub fn is_geographic(&self) -> bool {
        self.definition().starts_with("+proj=longlat")
    }

    pub fn proj(&self) -> Result<Proj> {
        Ok(Proj::from_proj_string(&self.definition())?)
    }

    /// Project WGS84 lon/lat into this CRS.
    pub fn project(&self, ll: LonLat) -> Result<(f64, f64)> {
        transform(&Crs::WGS84, self, ll.lon, ll.lat)
    }

    /// Unproject coordinates of this CRS to WGS84 lon/lat.
    pub fn unproject(&self, x: f64, y: f64) -> Result<LonLat> {
        let (lon, lat) = transform(self, &Crs::WGS84, x, y)?;
        Ok(LonLat::new(lon, lat))
    }
}

impl TryFrom<u32> for Crs {
    type Error = SsdError;

    fn try_from(code: u32) -> Result<Self> {
        Crs::from_epsg(code)
    }
}

impl From<Crs> for u32 {
    fn from(crs: Crs) -> u32 {
        crs.epsg
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

fn definition(code: u32) -> Option<String> {
    let zone_in = |base: u32, first: u32, last: u32| -> Option<u32> {
        (base + first..=base + last).contains(&code).then(|| code - base)
    };
    if let Some(zone) = zone_in(32600, 1, 60) {
        Some(format!("+proj=utm +zone={zone} +datum=WGS84 +units=m +no_defs"))
    } else if let Some(zone) = zone_in(32700, 1, 60) {
        Some(format!("+proj=utm +zone={zone} +south +datum=WGS84 +units=m +no_defs"))
    } else if let Some(zone) = zone_in(26900, 1, LAST_NAD83_ZONE as u32) {
        Some(format!("+proj=utm +zone={zone} +datum=NAD83 +units=m +no_defs"))
    } else if let Some(zone) = zone_in(25800, 28, 38) {
        Some(format!(
            "+proj=utm +zone={zone} +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs"
        ))
    } else {
        DEFINITIONS
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, d)| (*d).to_string())
    }
}

/// Point transformation between two CRSs, built once and reused per cell.
#[derive(Debug, Clone)]
pub struct Transformer {
    src: Proj,
    dst: Proj,
    identity: bool,
}

impl Transformer {
    pub fn new(from: &Crs, to: &Crs) -> Result<Self> {
        Ok(Self {
            src: from.proj()?,
            dst: to.proj()?,
            identity: from == to,
        })
    }

    pub fn apply(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if self.identity {
            return Ok((x, y));
        }
        let mut p = if self.src.is_latlong() {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };
        proj4rs::transform::transform(&self.src, &self.dst, &mut p)?;
        if self.dst.is_latlong() {
            Ok((p.0.to_degrees(), p.1.to_degrees()))
        } else {
            Ok((p.0, p.1))
        }
    }
}

/// Transform a single coordinate between two CRSs.
pub fn transform(from: &Crs, to: &Crs, x: f64, y: f64) -> Result<(f64, f64)> {
    if from == to {
        return Ok((x, y));
    }
    Transformer::new(from, to)?.apply(x, y)
}

/// UTM zone number for a longitude: `floor((lon + 180) / 6) mod 60 + 1`.
pub fn utm_zone(lon_deg: f64) -> u8 {
    (((lon_deg + 180.0) / 6.0).floor() as i64).rem_euclid(60) as u8 + 1
}

/// Northern-hemisphere UTM CRS for the zone containing `ll`.
///
/// NAD83 (EPSG 269zz) where such a code exists, WGS84 (EPSG 326zz) for the
/// remaining zones.
pub fn working_crs_for(ll: LonLat) -> Crs {
    let zone = utm_zone(ll.lon) as u32;
    let epsg = if zone <= LAST_NAD83_ZONE as u32 { 26900 + zone } else { 32600 + zone };
    Crs { epsg }
}
