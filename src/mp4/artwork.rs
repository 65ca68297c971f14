//! Cover art (`covr`) extraction with image size sniffing
//!
//! ```text
//! moov/udta/meta/ilst/covr
//!   ├── data: version(1) type(3) reserved(4) image bytes...
//!   └── data: ...
//! ```

use super::atom::{self, Atom};
use super::{COVR, DATA, ILST, META, UDTA};
use crate::codec::{be_u16_at, be_u32_at};
use crate::error::{OptionalExt, Result};
use crate::metadata::{Artwork, ArtworkKind, Warning};
use crate::reader::SafeReader;

/// Well-known `data` types for pictures. JPEG (13) is also the fallback.
const TYPE_PNG: u8 = 14;
const TYPE_BMP: u8 = 27;

/// Type word plus reserved word ahead of the image
const IMAGE_HEADER: u64 = 8;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// All pictures stored under `covr`. A file without one yields an empty list.
///
/// A broken record ends the scan with an `artwork` warning. Pictures read
/// before it are still returned.
pub fn read_artwork(
    reader: &SafeReader,
    moov: &Atom,
    warnings: &mut Vec<Warning>,
) -> Result<Vec<Artwork>> {
    let Some(covr) = atom::find_path(reader, moov, &[UDTA, META, ILST, COVR]).optional()? else {
        log::debug!("no covr box");
        return Ok(Vec::new());
    };

    let mut pictures = Vec::new();
    for record in atom::children(reader, &covr) {
        let picture = record.and_then(|record| {
            if record.kind == DATA {
                read_picture(reader, &record).map(Some)
            } else {
                Ok(None)
            }
        });
        match picture {
            Ok(Some(picture)) => pictures.push(picture),
            Ok(None) => {}
            Err(e) => {
                warnings.push(Warning::new("artwork", e));
                break;
            }
        }
    }
    Ok(pictures)
}

/// One `covr/data` record
fn read_picture(reader: &SafeReader, record: &Atom) -> Result<Artwork> {
    if record.data_size() < IMAGE_HEADER {
        return Err(reader.corrupted(record.offset, "covr data record too short"));
    }

    let type_code = reader.read_u32(record.data_offset(), "covr data type")?;
    let mime_type = mime_type((type_code & 0xFF) as u8);
    let data = reader.read_vec(
        record.data_offset() + IMAGE_HEADER,
        record.data_size() - IMAGE_HEADER,
        "covr image",
    )?;
    let (width, height) = image_dimensions(mime_type, &data);
    log::debug!(
        "cover {} ({} bytes, {}x{}) at {}",
        mime_type,
        data.len(),
        width,
        height,
        record.offset
    );

    Ok(Artwork {
        mime_type: mime_type.to_string(),
        data,
        kind: ArtworkKind::FrontCover,
        description: String::new(),
        width,
        height,
    })
}

fn mime_type(type_code: u8) -> &'static str {
    match type_code {
        TYPE_PNG => "image/png",
        TYPE_BMP => "image/bmp",
        _ => "image/jpeg",
    }
}

/// Width and height read from the image header, `(0, 0)` when unknown
pub fn image_dimensions(mime_type: &str, data: &[u8]) -> (u32, u32) {
    match mime_type {
        "image/jpeg" => jpeg_dimensions(data),
        "image/png" => png_dimensions(data),
        _ => (0, 0),
    }
}

/// Scan for a baseline, extended or progressive Start Of Frame marker.
///
/// SOF layout after the marker: length(2) precision(1) height(2) width(2)
pub fn jpeg_dimensions(data: &[u8]) -> (u32, u32) {
    let found = data.windows(2).enumerate().find_map(|(i, w)| {
        if w[0] != 0xFF || !matches!(w[1], 0xC0 | 0xC1 | 0xC2) {
            return None;
        }
        let height = be_u16_at(data, i + 5)?;
        let width = be_u16_at(data, i + 7)?;
        Some((u32::from(width), u32::from(height)))
    });
    found.unwrap_or((0, 0))
}

/// Width and height from the IHDR chunk, which must follow the signature
pub fn png_dimensions(data: &[u8]) -> (u32, u32) {
    if !data.starts_with(&PNG_SIGNATURE) {
        return (0, 0);
    }
    match (be_u32_at(data, 16), be_u32_at(data, 20)) {
        (Some(width), Some(height)) => (width, height),
        _ => (0, 0),
    }
}
