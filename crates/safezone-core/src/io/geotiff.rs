//! Single-band GeoTIFF read/write.
//!
//! Georeferencing comes from ModelPixelScale + ModelTiepoint (north-up only),
//! the CRS from the GeoKey directory and the nodata value from GDAL_NODATA.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;
use tiff::ColorType;

use crate::crs::Crs;
use crate::error::{Result, SsdError};
use crate::raster::{CellKind, Extent, Raster};

// ── GeoKey ids ───────────────────────────────────────────────────────────────

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_PROJECTED: u16 = 1;
const MODEL_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const RASTER_PIXEL_IS_POINT: u16 = 2;
const USER_DEFINED: u16 = 32767;

/// On-disk nodata for float rasters.
pub const FLOAT_NODATA: f32 = f32::MIN;
/// On-disk nodata for integer rasters.
pub const INT_NODATA: i32 = i32::MIN;

/// Parsed GeoKey directory entries we care about.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct GeoKeys {
    model_type: Option<u16>,
    raster_type: Option<u16>,
    geographic: Option<u16>,
    projected: Option<u16>,
}

fn parse_geokeys(dir: &[u16]) -> GeoKeys {
    let mut keys = GeoKeys::default();
    if dir.len() < 4 {
        return keys;
    }
    let count = dir[3] as usize;
    for entry in dir[4..].chunks_exact(4).take(count) {
        let (id, location, value) = (entry[0], entry[1], entry[3]);
        // Values stored in other tags are not short codes.
        if location != 0 {
            continue;
        }
        match id {
            GT_MODEL_TYPE => keys.model_type = Some(value),
            GT_RASTER_TYPE => keys.raster_type = Some(value),
            GEOGRAPHIC_TYPE => keys.geographic = Some(value),
            PROJECTED_CS_TYPE => keys.projected = Some(value),
            _ => {}
        }
    }
    keys
}

fn crs_from_geokeys(keys: &GeoKeys) -> Result<Option<Crs>> {
    let code = match (keys.model_type, keys.projected, keys.geographic) {
        (Some(MODEL_GEOGRAPHIC), _, Some(g)) => g,
        (_, Some(p), _) => p,
        (_, None, Some(g)) => g,
        _ => return Ok(None),
    };
    if code == USER_DEFINED {
        return Err(SsdError::CapabilityUnavailable("user-defined GeoTIFF CRS".into()));
    }
    Crs::from_epsg(code as u32).map(Some)
}

fn geokey_directory(crs: &Crs) -> Vec<u16> {
    let (model, key) = if crs.is_geographic() {
        (MODEL_GEOGRAPHIC, GEOGRAPHIC_TYPE)
    } else {
        (MODEL_PROJECTED, PROJECTED_CS_TYPE)
    };
    vec![
        1, 1, 0, 3,
        GT_MODEL_TYPE, 0, 1, model,
        GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA,
        key, 0, 1, crs.epsg() as u16,
    ]
}

fn parse_nodata(text: &str) -> Option<f64> {
    text.trim_matches(char::from(0)).trim().parse().ok()
}

/// Samples as f32 plus the cell kind they came from.
fn samples_to_f32(img: DecodingResult) -> Result<(Vec<f32>, CellKind)> {
    use DecodingResult as D;
    Ok(match img {
        D::U8(v) => (v.into_iter().map(f32::from).collect(), CellKind::Integer),
        D::U16(v) => (v.into_iter().map(f32::from).collect(), CellKind::Integer),
        D::U32(v) => (v.into_iter().map(|x| x as f32).collect(), CellKind::Integer),
        D::I8(v) => (v.into_iter().map(f32::from).collect(), CellKind::Integer),
        D::I16(v) => (v.into_iter().map(f32::from).collect(), CellKind::Integer),
        D::I32(v) => (v.into_iter().map(|x| x as f32).collect(), CellKind::Integer),
        D::F32(v) => (v, CellKind::Float),
        D::F64(v) => (v.into_iter().map(|x| x as f32).collect(), CellKind::Float),
        _ => {
            return Err(SsdError::CapabilityUnavailable("64-bit integer GeoTIFF samples".into()))
        }
    })
}

/// Read a single-band GeoTIFF. A file without GeoKeys yields a raster with
/// no CRS.
pub fn read_raster(path: &Path) -> Result<Raster> {
    let mut dec = Decoder::new(BufReader::new(File::open(path)?))?;
    let (width, height) = dec.dimensions()?;
    let (width, height) = (width as usize, height as usize);

    if !matches!(dec.colortype()?, ColorType::Gray(_)) {
        return Err(SsdError::CapabilityUnavailable(format!(
            "{}: only single-band rasters are supported",
            path.display()
        )));
    }

    let scale = dec.get_tag_f64_vec(Tag::ModelPixelScaleTag)?;
    let tie = dec.get_tag_f64_vec(Tag::ModelTiepointTag)?;
    if scale.len() < 2 || tie.len() < 6 {
        return Err(SsdError::InvalidInput(format!("{}: malformed georeferencing tags", path.display())));
    }

    let keys = match dec.find_tag(Tag::GeoKeyDirectoryTag)? {
        Some(v) => parse_geokeys(&v.into_u16_vec()?),
        None => GeoKeys::default(),
    };
    let crs = crs_from_geokeys(&keys)?;

    let nodata = match dec.find_tag(Tag::GdalNodata)? {
        Some(v) => parse_nodata(&v.into_string()?),
        None => None,
    };

    let (cx, cy) = (scale[0], scale[1]);
    // Tiepoint maps raster (i, j) to model (x, y).
    let (mut origin_x, mut origin_y) = (tie[3] - tie[0] * cx, tie[4] + tie[1] * cy);
    if keys.raster_type == Some(RASTER_PIXEL_IS_POINT) {
        origin_x -= cx / 2.0;
        origin_y += cy / 2.0;
    }
    let extent = Extent::new(
        origin_x,
        origin_y - height as f64 * cy,
        origin_x + width as f64 * cx,
        origin_y,
    );

    let (mut data, kind) = samples_to_f32(dec.read_image()?)?;
    if data.len() != width * height {
        return Err(SsdError::InvalidInput(format!("{}: sample count mismatch", path.display())));
    }
    if let Some(nd) = nodata {
        let nd = nd as f32;
        for v in &mut data {
            if *v == nd {
                *v = f32::NAN;
            }
        }
    }

    Ok(Raster { data, width, height, extent, crs, kind })
}

/// Write a raster as a single-band GeoTIFF (f32 or i32 by cell kind).
pub fn write_raster(path: &Path, raster: &Raster) -> Result<()> {
    let crs = raster
        .crs
        .ok_or_else(|| SsdError::CoordinateResolution(format!("output {}", path.display())))?;
    let (cx, cy) = raster.cell_size();
    let scale = [cx, cy, 0.0];
    let tie = [0.0, 0.0, 0.0, raster.extent.min_x, raster.extent.max_y, 0.0];
    let keys = geokey_directory(&crs);
    let (w, h) = (raster.width as u32, raster.height as u32);

    let mut enc = TiffEncoder::new(BufWriter::new(File::create(path)?))?;
    match raster.kind {
        CellKind::Float => {
            let data: Vec<f32> = raster
                .data
                .iter()
                .map(|&v| if v.is_nan() { FLOAT_NODATA } else { v })
                .collect();
            let mut img = enc.new_image::<colortype::Gray32Float>(w, h)?;
            let dir = img.encoder();
            dir.write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
            dir.write_tag(Tag::ModelTiepointTag, &tie[..])?;
            dir.write_tag(Tag::GeoKeyDirectoryTag, &keys[..])?;
            dir.write_tag(Tag::GdalNodata, FLOAT_NODATA.to_string().as_str())?;
            img.write_data(&data)?;
        }
        CellKind::Integer => {
            let data: Vec<i32> = raster
                .data
                .iter()
                .map(|&v| if v.is_nan() { INT_NODATA } else { v.round() as i32 })
                .collect();
            let mut img = enc.new_image::<colortype::GrayI32>(w, h)?;
            let dir = img.encoder();
            dir.write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
            dir.write_tag(Tag::ModelTiepointTag, &tie[..])?;
            dir.write_tag(Tag::GeoKeyDirectoryTag, &keys[..])?;
            dir.write_tag(Tag::GdalNodata, INT_NODATA.to_string().as_str())?;
            img.write_data(&data)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: CellKind) -> Raster {
        let mut r = Raster::new(
            3,
            2,
            Extent::new(500_000.0, 4_000_000.0, 500_090.0, 4_000_060.0),
            Some(Crs::from_epsg(26912).unwrap()),
            0.0,
        );
        r.data = vec![1.0, 2.5, f32::NAN, 4.0, 5.0, 6.0];
        r.as_kind(kind)
    }

    #[test]
    fn float_raster_survives_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ssd.tif");
        let r = sample(CellKind::Float);
        write_raster(&path, &r).unwrap();

        let back = read_raster(&path).unwrap();
        assert_eq!((back.width, back.height), (3, 2));
        assert_eq!(back.extent, r.extent);
        assert_eq!(back.crs, r.crs);
        assert_eq!(back.kind, CellKind::Float);
        assert!(back.data[2].is_nan(), "nodata must come back as NaN");
        assert_eq!(back.data[1], 2.5);
    }

    #[test]
    fn integer_raster_is_written_as_i32() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("met.tif");
        write_raster(&path, &sample(CellKind::Integer)).unwrap();
        let back = read_raster(&path).unwrap();
        assert_eq!(back.kind, CellKind::Integer);
        assert_eq!(back.data[1], 3.0, "2.5 rounds away from zero");
        assert!(back.data[2].is_nan());
    }

    #[test]
    fn geokeys_resolve_projected_before_geographic() {
        let dir = [1, 1, 0, 3, 1024, 0, 1, 1, 2048, 0, 1, 4269, 3072, 0, 1, 26912];
        let keys = parse_geokeys(&dir);
        assert_eq!(crs_from_geokeys(&keys).unwrap(), Some(Crs::from_epsg(26912).unwrap()));

        let geographic = [1, 1, 0, 2, 1024, 0, 1, 2, 2048, 0, 1, 4326];
        let keys = parse_geokeys(&geographic);
        assert_eq!(crs_from_geokeys(&keys).unwrap(), Some(Crs::from_epsg(4326).unwrap()));
    }

    #[test]
    fn albers_geokeys_resolve_and_write_back() {
        let albers = [1, 1, 0, 2, 1024, 0, 1, 1, 3072, 0, 1, 5070];
        let crs = crs_from_geokeys(&parse_geokeys(&albers)).unwrap().unwrap();
        assert_eq!(crs.epsg(), 5070);
        assert!(!crs.is_geographic());
        assert_eq!(geokey_directory(&crs)[12..], [PROJECTED_CS_TYPE, 0, 1, 5070]);
    }

    #[test]
    fn unsupported_geokeys_are_capability_errors() {
        let user = [1, 1, 0, 1, 3072, 0, 1, USER_DEFINED];
        assert!(matches!(
            crs_from_geokeys(&parse_geokeys(&user)),
            Err(SsdError::CapabilityUnavailable(_))
        ));
        assert_eq!(crs_from_geokeys(&GeoKeys::default()).unwrap(), None);
    }

    #[test]
    fn nodata_text_parses_with_trailing_nul() {
        assert_eq!(parse_nodata("-9999\0"), Some(-9999.0));
        assert_eq!(parse_nodata("nan-ish"), None);
    }
}
