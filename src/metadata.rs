//! Result types shared by every parser

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Container flavour detected from the `ftyp` brands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Format {
    /// Plain MPEG-4 audio (the default)
    #[default]
    M4a,
    /// MPEG-4 audiobook
    M4b,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::M4a => "M4A",
            Format::M4b => "M4B",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag bag. Empty strings and zeros mean "not present".
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Tags {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub genres: Vec<String>,
    pub comment: String,
    pub composers: Vec<String>,
    pub year: u32,
    pub track_number: u32,
    pub track_total: u32,
    pub disc_number: u32,
    pub disc_total: u32,
    pub grouping: String,
    pub copyright: String,
    pub encoder: String,

    // Audiobook fields
    pub narrator: String,
    pub series: String,
    /// Position in series, normalized ("1", "2.5")
    pub series_part: String,
    pub publisher: String,
    pub isbn: String,
    pub asin: String,
    pub language: String,
    pub description: String,
    pub subtitle: String,

    /// Every freeform (`----`) field as found, keyed by its original name
    pub custom: BTreeMap<String, String>,
}

/// Technical audio properties
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AudioInfo {
    #[serde(serialize_with = "serialize_secs")]
    pub duration: Duration,
    /// Average bitrate in bits per second, derived from file size and duration
    pub bitrate: u32,
    pub sample_rate: u32,
    pub channels: u16,
    /// Sample entry four-character code, e.g. `mp4a`
    pub codec: String,
    /// Human readable codec name
    pub codec_name: String,
    /// AAC profile when known, e.g. `AAC-LC`
    pub codec_profile: String,
}

/// One chapter marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chapter {
    /// 1-based position
    pub index: usize,
    pub title: String,
    #[serde(serialize_with = "serialize_secs")]
    pub start_time: Duration,
    #[serde(serialize_with = "serialize_secs")]
    pub end_time: Duration,
}

impl Chapter {
    pub fn duration(&self) -> Duration {
        self.end_time.saturating_sub(self.start_time)
    }
}

/// Placement of an embedded picture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ArtworkKind {
    #[default]
    FrontCover,
}

/// Embedded picture
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artwork {
    pub mime_type: String,
    #[serde(rename = "size", serialize_with = "serialize_len")]
    pub data: Vec<u8>,
    pub kind: ArtworkKind,
    pub description: String,
    /// 0 when the image header does not tell
    pub width: u32,
    pub height: u32,
}

impl Artwork {
    /// File extension matching the MIME type
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/png" => "png",
            "image/bmp" => "bmp",
            _ => "jpg",
        }
    }
}

/// Non-fatal problem met while parsing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    /// Step or tag the problem belongs to, e.g. `tag ©nam` or `chapters`
    pub context: String,
    pub message: String,
}

impl Warning {
    pub fn new(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.message)
    }
}

/// Everything extracted from one file
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileMetadata {
    pub path: PathBuf,
    pub format: Format,
    pub file_size: u64,
    pub tags: Tags,
    pub audio: AudioInfo,
    pub chapters: Vec<Chapter>,
    /// Filled only when artwork extraction was requested
    pub artwork: Vec<Artwork>,
    pub warnings: Vec<Warning>,
}

impl FileMetadata {
    /// Record a warning, mirroring it to the log
    pub fn warn(&mut self, warning: Warning) {
        log::warn!("{}: {}", self.path.display(), warning);
        self.warnings.push(warning);
    }
}

fn serialize_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[allow(clippy::ptr_arg)]
fn serialize_len<S: Serializer>(data: &Vec<u8>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(data.len() as u64)
}
