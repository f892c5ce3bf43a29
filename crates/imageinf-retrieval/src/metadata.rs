//! EXIF metadata extraction

use chrono::NaiveDateTime;
use exif::{Exif, In, Reader, Tag, Value};
use imageinf_core::ImageMetadata;
use std::io::Cursor;
use tracing::debug;

const EXIF_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Extract metadata from encoded image bytes.
///
/// Returns `None` when the image carries no EXIF block or the block has no
/// tags. Once any tag is present the result is `Some`, even if every
/// supported field is missing; fields that fail to parse are left `None`.
pub fn extract_metadata(bytes: &[u8]) -> Option<ImageMetadata> {
    let exif = match Reader::new().read_from_container(&mut Cursor::new(bytes)) {
        Ok(exif) => exif,
        Err(e) => {
            debug!(error = %e, "No EXIF metadata");
            return None;
        }
    };
    if exif.fields().next().is_none() {
        debug!("EXIF block has no tags");
        return None;
    }

    let metadata = ImageMetadata {
        date_taken: ascii(&exif, Tag::DateTimeOriginal).and_then(|s| parse_exif_date(&s)),
        latitude: coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef),
        longitude: coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef),
        altitude: altitude(&exif),
        camera_make: ascii(&exif, Tag::Make),
        camera_model: ascii(&exif, Tag::Model),
    };

    Some(metadata)
}

/// Parse an EXIF `YYYY:MM:DD HH:MM:SS` timestamp
pub fn parse_exif_date(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), EXIF_DATE_FORMAT).ok()
}

/// Degrees/minutes/seconds to signed decimal degrees; `S` and `W` are negative
pub fn dms_to_decimal(dms: &[f64], reference: &str) -> Option<f64> {
    let [degrees, minutes, seconds] = match dms {
        [d, m, s, ..] => [*d, *m, *s],
        _ => return None,
    };
    if !(degrees.is_finite() && minutes.is_finite() && seconds.is_finite()) {
        return None;
    }

    let decimal = degrees + minutes / 60.0 + seconds / 3600.0;
    match reference.trim().chars().next() {
        Some('S') | Some('W') => Some(-decimal),
        _ => Some(decimal),
    }
}

fn ascii(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(parts) => parts
            .first()
            .map(|raw| String::from_utf8_lossy(raw).trim_end_matches('\0').trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn rationals(exif: &Exif, tag: Tag) -> Option<Vec<f64>> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Rational(values) => Some(values.iter().map(|r| r.to_f64()).collect()),
        _ => None,
    }
}

fn coordinate(exif: &Exif, value_tag: Tag, ref_tag: Tag) -> Option<f64> {
    let dms = rationals(exif, value_tag)?;
    let reference = ascii(exif, ref_tag).unwrap_or_default();
    dms_to_decimal(&dms, &reference)
}

fn altitude(exif: &Exif) -> Option<f64> {
    let value = *rationals(exif, Tag::GPSAltitude)?.first()?;
    if !value.is_finite() {
        return None;
    }
    // GPSAltitudeRef 1 means below sea level
    let below = exif
        .get_field(Tag::GPSAltitudeRef, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        == Some(1);
    Some(if below { -value } else { value })
}
