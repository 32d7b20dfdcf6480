//! Existing-vegetation-height code normalisation.
//!
//! Coded heights come in four disjoint ranges:
//!
//! | codes   | meaning                         | height × 100          |
//! |---------|---------------------------------|-----------------------|
//! | 11–100  | non-forest / sparse             | 0                     |
//! | 101–199 | forest, whole metres            | (code − 100) · 100    |
//! | 201–230 | shrub, tenths of a metre        | ⌊(code − 200) / 10 · 100⌋ |
//! | 301–310 | herb, tenths of a metre         | ⌊(code − 300) / 10 · 100⌋ |
//!
//! Anything else (including 200 and 311+) is unmapped and becomes nodata.

use crate::raster::Raster;

/// Integer height × 100 for a coded value, or None when unmapped.
pub fn height_code_to_centimeters(code: i32) -> Option<i32> {
    let tenths = |base: i32| (((code - base) as f64 / 10.0) * 100.0) as i32;
    match code {
        11..=100 => Some(0),
        101..=199 => Some((code - 100) * 100),
        201..=230 => Some(tenths(200)),
        301..=310 => Some(tenths(300)),
        _ => None,
    }
}

/// Height in metres for a coded value.
pub fn height_code_to_meters(code: i32) -> Option<f32> {
    height_code_to_centimeters(code).map(|cm| cm as f32 / 100.0)
}

/// Remap a coded vegetation raster into heights in metres.
///
/// Non-integral values can only come from a bad resample and are treated as
/// unmapped.
pub fn normalize_heights(codes: &Raster) -> Raster {
    codes.with_data(
        codes
            .data
            .iter()
            .map(|&v| {
                if v.is_nan() || v.fract() != 0.0 {
                    return f32::NAN;
                }
                height_code_to_meters(v as i32).unwrap_or(f32::NAN)
            })
            .collect(),
    )
}
