//! # m4bmeta
//!
//! Safe metadata extraction for M4A/M4B audio files and audiobooks.
//!
//! Tags, technical properties, chapters and cover art are read straight from
//! the MP4 box tree. Every read is bounds-checked against the file size, so a
//! truncated or corrupted file yields a partial result with warnings instead
//! of a crash.
//!
//! ## Features
//!
//! - **Tags**: iTunes item list plus `----` freeform fields (narrator, series, ...)
//! - **Technical**: duration, codec, AAC profile, channels, sample rate, bitrate
//! - **Chapters**: QuickTime chapter tracks and Nero `chpl` lists
//! - **Artwork**: embedded JPEG/PNG/BMP covers with dimensions
//!
//! ## Example
//!
//! ```no_run
//! use m4bmeta::{open, Options};
//! use std::path::Path;
//!
//! let meta = open(Path::new("book.m4b"), &Options::default().with_artwork()).unwrap();
//! println!("{} by {}", meta.tags.title, meta.tags.artist);
//! for chapter in &meta.chapters {
//!     println!("{:>3} {}", chapter.index, chapter.title);
//! }
//! ```

pub mod codec;
pub mod error;
pub mod metadata;
pub mod mp4;
pub mod reader;
pub mod series;

pub use error::{Error, OptionalExt, Result};
pub use metadata::{
    Artwork, ArtworkKind, AudioInfo, Chapter, FileMetadata, Format, Tags, Warning,
};
pub use reader::{ByteSource, SafeReader};

use std::fs::File;
use std::path::Path;

/// Bytes handed to [`Parser::probe`]
pub const PROBE_LEN: usize = 12;

/// One container family.
///
/// Parsers never open or close files. They get a bounded random-access view
/// and its logical size.
pub trait Parser: Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Whether the first bytes of a file look like this format
    fn probe(&self, head: &[u8]) -> bool;

    /// Extract tags, technical info and chapters. Problems that did not stop
    /// parsing are listed in [`FileMetadata::warnings`].
    fn parse(&self, source: &dyn ByteSource, size: u64, path: &Path) -> Result<FileMetadata>;

    /// Extract embedded pictures. Records that could not be read are reported
    /// through `warnings` and the pictures before them are still returned.
    fn extract_artwork(
        &self,
        source: &dyn ByteSource,
        size: u64,
        path: &Path,
        warnings: &mut Vec<Warning>,
    ) -> Result<Vec<Artwork>>;
}

/// Known formats, in probe order
static PARSERS: &[&dyn Parser] = &[&mp4::Mp4Parser];

/// First parser accepting `head`
pub fn parser_for(head: &[u8]) -> Option<&'static dyn Parser> {
    PARSERS.iter().copied().find(|p| p.probe(head))
}

/// Extraction options
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    /// Fail with [`Error::Strict`] when any warning was recorded
    pub strict: bool,
    /// Also extract cover art
    pub with_artwork: bool,
}

impl Options {
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn with_artwork(mut self) -> Self {
        self.with_artwork = true;
        self
    }
}

/// Extract metadata from the file at `path`
pub fn open(path: &Path, options: &Options) -> Result<FileMetadata> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();

    let mut head = [0u8; PROBE_LEN];
    let head_len = usize::try_from(size).map_or(PROBE_LEN, |s| s.min(PROBE_LEN));
    if head_len > 0 {
        SafeReader::new(&file, size, path).read_exact_at(&mut head[..head_len], 0, "file header")?;
    }

    let parser = parser_for(&head[..head_len]).ok_or_else(|| Error::UnsupportedFormat {
        path: path.to_path_buf(),
    })?;
    log::debug!("{}: {} parser, {} bytes", path.display(), parser.name(), size);

    let mut meta = parser.parse(&file, size, path)?;

    if options.with_artwork {
        let mut warnings = Vec::new();
        match parser.extract_artwork(&file, size, path, &mut warnings) {
            Ok(artwork) => meta.artwork = artwork,
            Err(e) => warnings.push(Warning::new("artwork", e)),
        }
        for w in warnings {
            meta.warn(w);
        }
    }

    if options.strict && !meta.warnings.is_empty() {
        return Err(Error::Strict {
            path: path.to_path_buf(),
            count: meta.warnings.len(),
            first: meta.warnings[0].to_string(),
        });
    }

    Ok(meta)
}
