//! MP4/M4A/M4B metadata extraction
//!
//! MP4 file structure as far as this module cares:
//! ```text
//! ftyp (file type, M4A/M4B brand)
//! moov (movie/metadata container)
//!   ├── mvhd (movie header: timescale, duration)
//!   ├── trak (audio track)
//!   │   └── mdia → minf → stbl → stsd (codec, channels, sample rate)
//!   ├── trak (chapter text track, referenced through tref/chap)
//!   └── udta (user data)
//!       ├── chpl (Nero chapter list)
//!       └── meta (metadata)
//!           ├── hdlr (handler)
//!           └── ilst (iTunes metadata list)
//!               ├── ©nam, ©ART, trkn, ... (tags)
//!               ├── covr (cover art)
//!               └── ---- (freeform tags)
//! mdat (media data)
//! ```
//!
//! Each step below is best effort. A failing step adds a [`Warning`] and
//! leaves whatever it could not read at its empty value.

pub mod artwork;
pub mod atom;
pub mod chapters;
pub mod ilst;
pub mod technical;

#[cfg(test)]
pub(crate) mod testutil;

use crate::error::{Error, OptionalExt, Result};
use crate::metadata::{Artwork, FileMetadata, Format, Warning};
use crate::reader::{ByteSource, SafeReader};
use crate::series;
use crate::Parser;
use std::fmt;
use std::path::Path;

pub use atom::Atom;

/// Four-character box type code. Not necessarily printable ASCII.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const fn new(code: &[u8; 4]) -> Self {
        FourCc(*code)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            match b {
                0xA9 => f.write_str("©")?,
                0x20..=0x7E => write!(f, "{}", b as char)?,
                _ => write!(f, "\\x{:02x}", b)?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self)
    }
}

/// MP4 box/atom types
pub const FTYP: FourCc = FourCc::new(b"ftyp");
pub const MOOV: FourCc = FourCc::new(b"moov");
pub const MVHD: FourCc = FourCc::new(b"mvhd");
pub const TRAK: FourCc = FourCc::new(b"trak");
pub const TKHD: FourCc = FourCc::new(b"tkhd");
pub const TREF: FourCc = FourCc::new(b"tref");
pub const CHAP: FourCc = FourCc::new(b"chap");
pub const EDTS: FourCc = FourCc::new(b"edts");
pub const MDIA: FourCc = FourCc::new(b"mdia");
pub const MDHD: FourCc = FourCc::new(b"mdhd");
pub const HDLR: FourCc = FourCc::new(b"hdlr");
pub const MINF: FourCc = FourCc::new(b"minf");
pub const DINF: FourCc = FourCc::new(b"dinf");
pub const STBL: FourCc = FourCc::new(b"stbl");
pub const STSD: FourCc = FourCc::new(b"stsd");
pub const STTS: FourCc = FourCc::new(b"stts");
pub const STSZ: FourCc = FourCc::new(b"stsz");
pub const STCO: FourCc = FourCc::new(b"stco");
pub const CO64: FourCc = FourCc::new(b"co64");
pub const UDTA: FourCc = FourCc::new(b"udta");
pub const CHPL: FourCc = FourCc::new(b"chpl");
pub const META: FourCc = FourCc::new(b"meta");
pub const ILST: FourCc = FourCc::new(b"ilst");
pub const COVR: FourCc = FourCc::new(b"covr");
pub const FREEFORM: FourCc = FourCc::new(b"----");
pub const MEAN: FourCc = FourCc::new(b"mean");
pub const NAME: FourCc = FourCc::new(b"name");
pub const DATA: FourCc = FourCc::new(b"data");
pub const FREE: FourCc = FourCc::new(b"free");
pub const MDAT: FourCc = FourCc::new(b"mdat");

/// Audiobook brand, as major or compatible brand
const BRAND_M4B: [u8; 4] = *b"M4B ";

/// Cap on the compatible-brand list we look at
const MAX_BRANDS: u64 = 64;

/// Parser for the MP4 box family (M4A, M4B)
pub struct Mp4Parser;

impl Parser for Mp4Parser {
    fn name(&self) -> &'static str {
        "mp4"
    }

    fn probe(&self, head: &[u8]) -> bool {
        head.len() >= 8 && &head[4..8] == FTYP.as_bytes()
    }

    fn parse(&self, source: &dyn ByteSource, size: u64, path: &Path) -> Result<FileMetadata> {
        let reader = SafeReader::new(source, size, path);
        parse(&reader)
    }

    fn extract_artwork(
        &self,
        source: &dyn ByteSource,
        size: u64,
        path: &Path,
        warnings: &mut Vec<Warning>,
    ) -> Result<Vec<Artwork>> {
        let reader = SafeReader::new(source, size, path);
        let moov = atom::find_top(&reader, MOOV)?;
        artwork::read_artwork(&reader, &moov, warnings)
    }
}

/// Run every extraction step against one file
pub fn parse(reader: &SafeReader) -> Result<FileMetadata> {
    let mut meta = FileMetadata {
        path: reader.path().to_path_buf(),
        file_size: reader.size(),
        ..Default::default()
    };

    match detect_format(reader) {
        Ok(format) => meta.format = format,
        Err(e) => meta.warn(Warning::new("ftyp", e)),
    }

    let moov = match atom::find_top(reader, MOOV) {
        Ok(moov) => moov,
        Err(Error::NotFound { .. }) => {
            return Err(reader.corrupted(0, "no moov box, not a usable MP4 file"));
        }
        Err(e) => return Err(e),
    };
    log::debug!("{}: moov at {} ({} bytes)", reader.path().display(), moov.offset, moov.size);

    let mut warnings = Vec::new();

    // Tags: primary vocabulary first, freeform fields only fill the gaps
    match atom::find_path(reader, &moov, &[UDTA, META, ILST]).optional() {
        Ok(Some(ilst)) => {
            ilst::read_item_list(reader, &ilst, &mut meta.tags, &mut warnings);
            ilst::read_custom_fields(reader, &ilst, &mut meta.tags, &mut warnings);
        }
        Ok(None) => log::debug!("no ilst, file carries no tags"),
        Err(e) => warnings.push(Warning::new("tags", e)),
    }

    meta.audio = technical::read_audio_info(reader, &moov, &mut warnings);

    match chapters::read_chapters(reader, &moov, meta.audio.duration) {
        Ok(list) => meta.chapters = list,
        Err(e) => warnings.push(Warning::new("chapters", e)),
    }

    if meta.tags.series_part.is_empty() {
        if let Some(part) = series::resolve_series_part(
            &meta.tags.custom,
            &meta.tags.grouping,
            &meta.tags.title,
            &meta.tags.album,
            reader.path(),
        ) {
            meta.tags.series_part = part;
        }
    }

    for w in warnings {
        meta.warn(w);
    }

    Ok(meta)
}

/// M4B when the major brand or any compatible brand says so, M4A otherwise
pub fn detect_format(reader: &SafeReader) -> Result<Format> {
    let ftyp = atom::find_top(reader, FTYP)?;
    let start = ftyp.data_offset();

    let major = reader.read_fourcc(start, "ftyp major brand")?;
    if major == BRAND_M4B {
        return Ok(Format::M4b);
    }

    // Major brand and minor version come before the compatible list
    let list_start = start + 8;
    let count = (ftyp.end().saturating_sub(list_start) / 4).min(MAX_BRANDS);
    for i in 0..count {
        let brand = reader.read_fourcc(list_start + i * 4, "ftyp compatible brand")?;
        if brand == BRAND_M4B {
            return Ok(Format::M4b);
        }
    }

    Ok(Format::M4a)
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;

    #[test]
    fn test_fourcc_display() {
        assert_eq!(FourCc(*b"\xa9nam").to_string(), "©nam");
        assert_eq!(FREEFORM.to_string(), "----");
        assert_eq!(FourCc([0, b'a', b'b', 0x80]).to_string(), "\\x00ab\\x80");
    }

    #[test]
    fn test_m4b_from_major_brand() {
        let file = mp4_file(b"M4B ", &[], &[]);
        assert_eq!(parse_bytes(&file).format, Format::M4b);
    }

    #[test]
    fn test_m4b_from_compatible_brand() {
        let file = mp4_file(b"isom", &[b"mp42", b"M4B "], &[]);
        assert_eq!(parse_bytes(&file).format, Format::M4b);
    }

    #[test]
    fn test_unknown_brand_defaults_to_m4a() {
        let file = mp4_file(b"qt  ", &[b"isom"], &[]);
        let meta = parse_bytes(&file);
        assert_eq!(meta.format, Format::M4a);
        assert!(meta.warnings.is_empty());
    }

    #[test]
    fn test_missing_moov_is_an_error() {
        let file = ftyp(b"M4A ", &[]);
        let r = SafeReader::new(&file, file.len() as u64, Path::new("x.m4a"));
        assert!(matches!(parse(&r), Err(Error::Corrupted { .. })));
    }

    #[test]
    fn test_missing_ftyp_is_a_warning() {
        let file = atom(b"moov", &[]);
        let meta = parse_bytes(&file);
        assert_eq!(meta.format, Format::M4a);
        assert_eq!(meta.warnings.len(), 1);
        assert_eq!(meta.warnings[0].context, "ftyp");
    }

    #[test]
    fn test_title_tag_end_to_end() {
        let ilst = atom(b"ilst", &text_tag(b"\xa9nam", "My Audiobook"));
        let file = mp4_file(b"M4B ", &[], &udta_with_ilst(&ilst));
        let meta = parse_bytes(&file);
        assert_eq!(meta.tags.title, "My Audiobook");
        assert_eq!(meta.format, Format::M4b);
        assert!(meta.warnings.is_empty());
    }

    #[test]
    fn test_series_part_resolved_from_title() {
        let ilst = atom(b"ilst", &text_tag(b"\xa9nam", "Dune, Book 02"));
        let file = mp4_file(b"M4B ", &[], &udta_with_ilst(&ilst));
        assert_eq!(parse_bytes(&file).tags.series_part, "2");
    }

    #[test]
    fn test_parser_probe() {
        let file = mp4_file(b"M4A ", &[], &[]);
        assert!(Mp4Parser.probe(&file[..12]));
        assert!(!Mp4Parser.probe(b"ID3\x04\0\0\0\0\0\0"));
    }
}
