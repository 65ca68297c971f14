//! Error types for m4bmeta
//!
//! Three kinds of failure come out of the core:
//!
//! - **Out of bounds / short read**: a read would leave the declared file
//!   bounds, or the source returned fewer bytes than asked for. Always fatal
//!   to the step that issued the read.
//! - **Corrupted**: a structure would cause non-termination or nonsensical
//!   offsets (box size below the header minimum, zero-size box).
//! - **Not found**: an optional box is absent. This is the normal signal for
//!   "feature unavailable" and callers turn it into `Ok(None)` through
//!   [`OptionalExt::optional`].

use crate::mp4::FourCc;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for m4bmeta
#[derive(Error, Debug)]
pub enum Error {
    /// Read would leave the declared file bounds
    #[error(
        "{}: read of {len} bytes at offset {offset} is out of bounds (file size {size}) while reading {what}",
        .path.display()
    )]
    OutOfBounds {
        path: PathBuf,
        offset: u64,
        len: u64,
        size: u64,
        /// Caller supplied label describing the read
        what: String,
    },

    /// Source returned fewer bytes than requested
    #[error(
        "{}: short read at offset {offset}: wanted {len} bytes, got {got} (file size {size}) while reading {what}",
        .path.display()
    )]
    ShortRead {
        path: PathBuf,
        offset: u64,
        len: u64,
        got: u64,
        size: u64,
        what: String,
    },

    /// Structure that would otherwise loop forever or point nowhere
    #[error("{}: corrupted file at offset {offset}: {reason}", .path.display())]
    Corrupted {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    /// Optional box is absent
    #[error("box '{kind}' not found")]
    NotFound { kind: FourCc },

    /// No registered parser recognizes the file
    #[error("{}: unsupported file format", .path.display())]
    UnsupportedFormat { path: PathBuf },

    /// Strict mode escalated the warnings of a parse
    #[error("{}: {count} warning(s) in strict mode, first: {first}", .path.display())]
    Strict {
        path: PathBuf,
        count: usize,
        first: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the "optional structure absent" signal
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Splits "absent" from "malformed" on a lookup result.
///
/// `Ok(x)` becomes `Ok(Some(x))`, [`Error::NotFound`] becomes `Ok(None)` and
/// every other error is passed through untouched.
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for Result<T> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::MOOV;

    #[test]
    fn test_optional_splits_absent_from_malformed() {
        let found: Result<u32> = Ok(7);
        assert_eq!(found.optional().unwrap(), Some(7));

        let absent: Result<u32> = Err(Error::NotFound { kind: MOOV });
        assert_eq!(absent.optional().unwrap(), None);

        let broken: Result<u32> = Err(Error::Corrupted {
            path: PathBuf::from("a.m4b"),
            offset: 8,
            reason: "zero-size box".to_string(),
        });
        assert!(broken.optional().is_err());
    }

    #[test]
    fn test_out_of_bounds_message_carries_context() {
        let err = Error::OutOfBounds {
            path: PathBuf::from("book.m4b"),
            offset: 100,
            len: 8,
            size: 104,
            what: "mvhd duration".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("book.m4b"));
        assert!(msg.contains("offset 100"));
        assert!(msg.contains("file size 104"));
        assert!(msg.contains("mvhd duration"));
    }
}
