//! iTunes item list (`ilst`) tags
//!
//! Every item-list entry wraps one or more `data` records:
//! ```text
//! ©nam
//!   └── data: version(1) type(3) locale(4) payload...
//! ----
//!   ├── mean: version/flags(4) "com.apple.iTunes"
//!   ├── name: version/flags(4) "NARRATOR"
//!   └── data: version(1) type(3) locale(4) payload...
//! ```
//! A broken entry costs that entry only: it is recorded as a warning tied to
//! its type code and the scan moves on.

use super::atom::{self, Atom};
use super::{FourCc, DATA, FREEFORM, MEAN, NAME};
use crate::error::{Error, Result};
use crate::metadata::{Tags, Warning};
use crate::reader::SafeReader;
use crate::series;

pub const TITLE: FourCc = FourCc::new(b"\xa9nam");
pub const ARTIST: FourCc = FourCc::new(b"\xa9ART");
pub const ALBUM: FourCc = FourCc::new(b"\xa9alb");
pub const ALBUM_ARTIST: FourCc = FourCc::new(b"aART");
pub const GENRE: FourCc = FourCc::new(b"\xa9gen");
pub const COMMENT: FourCc = FourCc::new(b"\xa9cmt");
pub const COMPOSER: FourCc = FourCc::new(b"\xa9wrt");
pub const YEAR: FourCc = FourCc::new(b"\xa9day");
pub const GROUPING: FourCc = FourCc::new(b"\xa9grp");
pub const DESCRIPTION: FourCc = FourCc::new(b"desc");
pub const LONG_DESCRIPTION: FourCc = FourCc::new(b"ldes");
pub const COPYRIGHT: FourCc = FourCc::new(b"cprt");
pub const ENCODER: FourCc = FourCc::new(b"\xa9too");
pub const NARRATOR: FourCc = FourCc::new(b"\xa9nrt");
pub const PUBLISHER: FourCc = FourCc::new(b"\xa9pub");
pub const MOVEMENT_NAME: FourCc = FourCc::new(b"\xa9mvn");
pub const MOVEMENT_NUMBER: FourCc = FourCc::new(b"\xa9mvi");
pub const SUBTITLE: FourCc = FourCc::new(b"\xa9st3");
pub const TRACK_NUMBER: FourCc = FourCc::new(b"trkn");
pub const DISC_NUMBER: FourCc = FourCc::new(b"disk");

/// `data` record header: version(1) + type(3) + locale(4)
const VALUE_HEADER: u64 = 8;
/// `mean` / `name` header: version(1) + flags(3)
const LABEL_HEADER: u64 = 4;
/// Well-known data types
const TYPE_BE_SIGNED: u32 = 21;
const TYPE_BE_UNSIGNED: u32 = 22;
/// Longest text value we are willing to load
const MAX_TEXT_LEN: u64 = 1 << 20;

/// Result field a tag feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Artist,
    Album,
    AlbumArtist,
    Genre,
    Comment,
    Composer,
    Year,
    Grouping,
    Description,
    Copyright,
    Encoder,
    Narrator,
    Publisher,
    Series,
    SeriesPart,
    Subtitle,
    Isbn,
    Asin,
    Language,
}

/// Standard item-list vocabulary
const TAG_FIELDS: &[(FourCc, Field)] = &[
    (TITLE, Field::Title),
    (ARTIST, Field::Artist),
    (ALBUM, Field::Album),
    (ALBUM_ARTIST, Field::AlbumArtist),
    (GENRE, Field::Genre),
    (COMMENT, Field::Comment),
    (COMPOSER, Field::Composer),
    (YEAR, Field::Year),
    (GROUPING, Field::Grouping),
    (DESCRIPTION, Field::Description),
    (LONG_DESCRIPTION, Field::Description),
    (COPYRIGHT, Field::Copyright),
    (ENCODER, Field::Encoder),
    (NARRATOR, Field::Narrator),
    (PUBLISHER, Field::Publisher),
    (MOVEMENT_NAME, Field::Series),
    (MOVEMENT_NUMBER, Field::SeriesPart),
    (SUBTITLE, Field::Subtitle),
];

/// Freeform field names, compacted (lower case, no spaces/dashes/underscores)
const CUSTOM_FIELDS: &[(&str, Field)] = &[
    ("narrator", Field::Narrator),
    ("narratedby", Field::Narrator),
    ("reader", Field::Narrator),
    ("series", Field::Series),
    ("seriesname", Field::Series),
    ("movementname", Field::Series),
    ("mvnm", Field::Series),
    ("movement", Field::SeriesPart),
    ("movementnumber", Field::SeriesPart),
    ("mvin", Field::SeriesPart),
    ("publisher", Field::Publisher),
    ("label", Field::Publisher),
    ("isbn", Field::Isbn),
    ("asin", Field::Asin),
    ("audibleasin", Field::Asin),
    ("language", Field::Language),
    ("lang", Field::Language),
    ("description", Field::Description),
    ("summary", Field::Description),
    ("synopsis", Field::Description),
    ("subtitle", Field::Subtitle),
    ("author", Field::Artist),
];

fn tag_field(code: FourCc) -> Option<Field> {
    TAG_FIELDS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, field)| *field)
}

fn custom_field(name: &str) -> Option<Field> {
    let key: String = name
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect();
    CUSTOM_FIELDS
        .iter()
        .find(|(n, _)| *n == key)
        .map(|(_, field)| *field)
}

/// Read the standard tags of an `ilst` box into `tags`
pub fn read_item_list(
    reader: &SafeReader,
    ilst: &Atom,
    tags: &mut Tags,
    warnings: &mut Vec<Warning>,
) {
    for item in atom::children(reader, ilst) {
        let item = match item {
            Ok(item) => item,
            Err(e) => {
                warnings.push(Warning::new("ilst", e));
                return;
            }
        };

        let result = match item.kind {
            TRACK_NUMBER | DISC_NUMBER => read_counter_pair(reader, &item).map(|(n, total)| {
                let (number, count) = if item.kind == TRACK_NUMBER {
                    (&mut tags.track_number, &mut tags.track_total)
                } else {
                    (&mut tags.disc_number, &mut tags.disc_total)
                };
                if *number == 0 {
                    *number = u32::from(n);
                }
                if *count == 0 {
                    *count = u32::from(total);
                }
            }),
            FREEFORM => continue,
            code => match tag_field(code) {
                Some(field) => read_value(reader, &item).map(|value| {
                    log::trace!("tag {} -> {:?} = {:?}", code, field, value);
                    apply(tags, field, &value, true);
                }),
                None => {
                    log::trace!("tag {} not mapped, skipped", code);
                    continue;
                }
            },
        };

        if let Err(e) = result {
            warnings.push(Warning::new(format!("tag {}", item.kind), e));
        }
    }
}

/// Read the `----` freeform fields of an `ilst` box.
///
/// Every field lands in `tags.custom`. Known names then fill result fields
/// that the standard tags left empty.
pub fn read_custom_fields(
    reader: &SafeReader,
    ilst: &Atom,
    tags: &mut Tags,
    warnings: &mut Vec<Warning>,
) {
    for item in atom::children(reader, ilst) {
        let item = match item {
            Ok(item) => item,
            // Already reported by the standard pass
            Err(_) => return,
        };
        if item.kind != FREEFORM {
            continue;
        }

        match read_freeform(reader, &item) {
            Ok((namespace, name, value)) => {
                log::trace!("freeform {}:{} = {:?}", namespace, name, value);
                if let Some(field) = custom_field(&name) {
                    apply(tags, field, &value, false);
                }
                tags.custom.entry(name).or_insert(value);
            }
            Err(e) => warnings.push(Warning::new(format!("tag {}", FREEFORM), e)),
        }
    }
}

/// Decode one `----` record into (namespace, name, value)
fn read_freeform(reader: &SafeReader, item: &Atom) -> Result<(String, String, String)> {
    let namespace = match atom::find_in(reader, item, MEAN) {
        Ok(mean) => read_label(reader, &mean, "freeform mean")?,
        Err(Error::NotFound { .. }) => String::new(),
        Err(e) => return Err(e),
    };
    let name_box = atom::find_in(reader, item, NAME)?;
    let name = read_label(reader, &name_box, "freeform name")?;
    let value = read_value(reader, item)?;
    Ok((namespace, name, value))
}

fn read_label(reader: &SafeReader, label: &Atom, what: &str) -> Result<String> {
    let len = label.data_size().saturating_sub(LABEL_HEADER).min(MAX_TEXT_LEN);
    let bytes = reader.read_vec(label.data_offset() + LABEL_HEADER, len, what)?;
    Ok(trim_text(&bytes))
}

/// Decode the first `data` record of an item as text
fn read_value(reader: &SafeReader, item: &Atom) -> Result<String> {
    let data = atom::find_in(reader, item, DATA)?;
    if data.data_size() < VALUE_HEADER {
        return Err(reader.corrupted(data.offset, "data record shorter than its header"));
    }

    let type_code = reader.read_u32(data.data_offset(), "data type")? & 0x00FF_FFFF;
    let len = data.data_size() - VALUE_HEADER;
    if len > MAX_TEXT_LEN {
        return Err(reader.corrupted(data.offset, format!("tag value of {} bytes", len)));
    }
    let bytes = reader.read_vec(data.data_offset() + VALUE_HEADER, len, "tag value")?;

    if matches!(type_code, TYPE_BE_SIGNED | TYPE_BE_UNSIGNED) {
        if let Some(n) = decode_integer(&bytes, type_code == TYPE_BE_SIGNED) {
            return Ok(n);
        }
    }
    Ok(trim_text(&bytes))
}

/// Two 16-bit counters behind a 2-byte pad, as used by `trkn` and `disk`
fn read_counter_pair(reader: &SafeReader, item: &Atom) -> Result<(u16, u16)> {
    let data = atom::find_in(reader, item, DATA)?;
    let pos = data.data_offset() + VALUE_HEADER + 2;
    let number = reader.read_u16(pos, "counter number")?;
    let total = reader.read_u16(pos + 2, "counter total")?;
    Ok((number, total))
}

/// Big-endian integer of 1, 2, 4 or 8 bytes as decimal text
fn decode_integer(bytes: &[u8], signed: bool) -> Option<String> {
    let value = match (bytes.len(), signed) {
        (1, true) => i64::from(bytes[0] as i8).to_string(),
        (2, true) => i16::from_be_bytes(bytes.try_into().ok()?).to_string(),
        (4, true) => i32::from_be_bytes(bytes.try_into().ok()?).to_string(),
        (8, true) => i64::from_be_bytes(bytes.try_into().ok()?).to_string(),
        (1, false) => bytes[0].to_string(),
        (2, false) => u16::from_be_bytes(bytes.try_into().ok()?).to_string(),
        (4, false) => u32::from_be_bytes(bytes.try_into().ok()?).to_string(),
        (8, false) => u64::from_be_bytes(bytes.try_into().ok()?).to_string(),
        _ => return None,
    };
    Some(value)
}

/// UTF-8 text with trailing NULs, then trailing whitespace, removed
fn trim_text(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.trim_end_matches('\0').trim_end().to_string()
}

/// Store `value` in `field`.
///
/// Scalar fields keep the first non-empty value they see. List fields
/// collect every value from the standard tags (`collect_lists`).
fn apply(tags: &mut Tags, field: Field, value: &str, collect_lists: bool) {
    if value.is_empty() {
        return;
    }

    let slot = match field {
        Field::Genre | Field::Composer => {
            let list = if field == Field::Genre {
                &mut tags.genres
            } else {
                &mut tags.composers
            };
            if collect_lists || list.is_empty() {
                list.push(value.to_string());
            }
            return;
        }
        Field::Year => {
            if tags.year == 0 {
                tags.year = parse_year(value);
            }
            return;
        }
        Field::SeriesPart => {
            if tags.series_part.is_empty() {
                tags.series_part = series::normalize_series_part(value);
            }
            return;
        }
        Field::Title => &mut tags.title,
        Field::Artist => &mut tags.artist,
        Field::Album => &mut tags.album,
        Field::AlbumArtist => &mut tags.album_artist,
        Field::Comment => &mut tags.comment,
        Field::Grouping => &mut tags.grouping,
        Field::Description => &mut tags.description,
        Field::Copyright => &mut tags.copyright,
        Field::Encoder => &mut tags.encoder,
        Field::Narrator => &mut tags.narrator,
        Field::Publisher => &mut tags.publisher,
        Field::Series => &mut tags.series,
        Field::Subtitle => &mut tags.subtitle,
        Field::Isbn => &mut tags.isbn,
        Field::Asin => &mut tags.asin,
        Field::Language => &mut tags.language,
    };

    if slot.is_empty() {
        *slot = value.to_string();
    }
}

/// Leading four digits of a date such as "2019-05-01T07:00:00Z"
fn parse_year(value: &str) -> u32 {
    let digits: String = value.trim().chars().take(4).collect();
    if digits.len() == 4 && digits.chars().all(|c| c.is_ascii_digit()) {
        digits.parse().unwrap_or(0)
    } else {
        0
    }
}
