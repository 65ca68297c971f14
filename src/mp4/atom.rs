//! Box (atom) tree navigation
//!
//! Nothing here builds a tree. A box is whatever [`read_header`] finds at an
//! offset, and parent/child relations are recovered by scanning a parent's
//! data range again on every lookup.

use super::{
    FourCc, COVR, DINF, EDTS, FREEFORM, HDLR, ILST, MDIA, META, MINF, MOOV, STBL, TRAK, TREF, UDTA,
};
use crate::error::{Error, Result};
use crate::reader::SafeReader;

/// Boxes that hold child boxes rather than an opaque payload
const CONTAINERS: &[FourCc] = &[
    MOOV, TRAK, MDIA, MINF, STBL, UDTA, META, ILST, TREF, DINF, EDTS, COVR, FREEFORM,
];

/// Minimal header sizes
const HEADER_SIZE: u64 = 8;
const EXTENDED_HEADER_SIZE: u64 = 16;

/// One box header as found in the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Atom {
    /// Total size including the header
    pub size: u64,
    pub kind: FourCc,
    /// File offset of the first header byte
    pub offset: u64,
    /// Size came from the 64-bit extended field
    pub extended: bool,
}

impl Atom {
    pub fn header_size(&self) -> u64 {
        if self.extended {
            EXTENDED_HEADER_SIZE
        } else {
            HEADER_SIZE
        }
    }

    pub fn data_offset(&self) -> u64 {
        self.offset.saturating_add(self.header_size())
    }

    pub fn data_size(&self) -> u64 {
        self.size.saturating_sub(self.header_size())
    }

    /// Offset one past the last byte
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }
}

/// Parse the box header at `offset`
pub fn read_header(reader: &SafeReader, offset: u64) -> Result<Atom> {
    let size32 = reader.read_u32(offset, "box size")?;
    let kind = FourCc(reader.read_fourcc(offset + 4, "box type")?);

    let (size, extended) = if size32 == 1 {
        (reader.read_u64(offset + 8, "extended box size")?, true)
    } else {
        (u64::from(size32), false)
    };

    let min = if extended {
        EXTENDED_HEADER_SIZE
    } else {
        HEADER_SIZE
    };
    if size < min {
        return Err(reader.corrupted(
            offset,
            format!("box '{}' has size {} (minimum {})", kind, size, min),
        ));
    }

    Ok(Atom {
        size,
        kind,
        offset,
        extended,
    })
}

/// First box of type `kind` between `start` and `end`
pub fn find(reader: &SafeReader, start: u64, end: u64, kind: FourCc) -> Result<Atom> {
    let mut offset = start;

    while offset < end && end - offset >= HEADER_SIZE {
        let atom = read_header(reader, offset)?;
        if atom.kind == kind {
            return Ok(atom);
        }
        if atom.size == 0 {
            return Err(reader.corrupted(offset, "zero-size box"));
        }
        offset = offset
            .checked_add(atom.size)
            .ok_or_else(|| reader.corrupted(offset, "box size overflows file offset"))?;
    }

    Err(Error::NotFound { kind })
}

/// First top-level box of type `kind`
pub fn find_top(reader: &SafeReader, kind: FourCc) -> Result<Atom> {
    find(reader, 0, reader.size(), kind)
}

/// First child of `parent` of type `kind`
pub fn find_in(reader: &SafeReader, parent: &Atom, kind: FourCc) -> Result<Atom> {
    let (start, end) = child_range(reader, parent);
    find(reader, start, end, kind)
}

/// Follow `path` down from `parent`, e.g. `[UDTA, META, ILST]`
pub fn find_path(reader: &SafeReader, parent: &Atom, path: &[FourCc]) -> Result<Atom> {
    let mut current = *parent;
    for kind in path {
        current = find_in(reader, &current, *kind)?;
    }
    Ok(current)
}

/// Byte range holding the children of `parent`.
///
/// `meta` is a full box with four bytes of version/flags before its children,
/// except in the QuickTime layout where `hdlr` follows the header directly.
/// The end is clamped to the file so truncated parents still scan.
pub fn child_range(reader: &SafeReader, parent: &Atom) -> (u64, u64) {
    let mut start = parent.data_offset();
    if parent.kind == META {
        let quicktime_layout = reader
            .read_fourcc(start + 4, "meta child type")
            .map_or(false, |code| FourCc(code) == HDLR);
        if !quicktime_layout {
            start += 4;
        }
    }
    (start, parent.end().min(reader.size()))
}

/// Whether `kind` is classified as a container
pub fn is_container(kind: FourCc) -> bool {
    CONTAINERS.contains(&kind)
}

/// Iterate the direct children of `parent`
pub fn children<'a>(reader: &SafeReader<'a>, parent: &Atom) -> Children<'a> {
    let (start, end) = child_range(reader, parent);
    Children::new(*reader, start, end)
}

/// Iterator over sibling boxes in a byte range.
///
/// Yields at most one error, after which it is exhausted.
pub struct Children<'a> {
    reader: SafeReader<'a>,
    offset: u64,
    end: u64,
    done: bool,
}

impl<'a> Children<'a> {
    pub fn new(reader: SafeReader<'a>, start: u64, end: u64) -> Self {
        Self {
            reader,
            offset: start,
            end,
            done: false,
        }
    }
}

impl Iterator for Children<'_> {
    type Item = Result<Atom>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.end || self.end - self.offset < HEADER_SIZE {
            return None;
        }
        match read_header(&self.reader, self.offset) {
            Ok(atom) => {
                self.offset = self.offset.saturating_add(atom.size);
                Some(Ok(atom))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// One line of a box tree dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub depth: usize,
    pub atom: Atom,
}

/// Depth-first listing of every box, descending into containers.
///
/// Item-list entries are descended into as well, since each one wraps its
/// `data` records. Structural errors end the listing of that subtree only.
pub fn tree(reader: &SafeReader, max_depth: usize) -> Vec<TreeEntry> {
    let mut out = Vec::new();
    walk(reader, 0, reader.size(), 0, false, max_depth, &mut out);
    out
}

fn walk(
    reader: &SafeReader,
    start: u64,
    end: u64,
    depth: usize,
    in_item_list: bool,
    max_depth: usize,
    out: &mut Vec<TreeEntry>,
) {
    for atom in Children::new(*reader, start, end) {
        let atom = match atom {
            Ok(atom) => atom,
            Err(e) => {
                log::debug!("box walk stopped at depth {}: {}", depth, e);
                return;
            }
        };
        out.push(TreeEntry { depth, atom });

        if depth < max_depth && (in_item_list || is_container(atom.kind)) {
            let (child_start, child_end) = child_range(reader, &atom);
            walk(
                reader,
                child_start,
                child_end,
                depth + 1,
                atom.kind == ILST,
                max_depth,
                out,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::testutil::{atom, atom64, full_atom, with_reader};
    use crate::mp4::{DATA, FREE, FTYP, MDAT};

    #[test]
    fn test_header_roundtrip() {
        let data = atom(b"free", &[0u8; 12]);
        with_reader(&data, |r| {
            let a = read_header(r, 0).unwrap();
            assert_eq!(a.kind, FREE);
            assert_eq!(a.size, 20);
            assert!(!a.extended);
            assert_eq!(a.data_offset(), 8);
            assert_eq!(a.data_size(), 12);
        });
    }

    #[test]
    fn test_extended_header() {
        let data = atom64(b"mdat", &[7u8; 5]);
        with_reader(&data, |r| {
            let a = read_header(r, 0).unwrap();
            assert_eq!(a.kind, MDAT);
            assert!(a.extended);
            assert_eq!(a.size, 21);
            assert_eq!(a.data_offset(), 16);
            assert_eq!(a.data_size(), 5);
        });
    }

    #[test]
    fn test_undersized_headers_are_corrupt() {
        let mut data = vec![0, 0, 0, 4];
        data.extend_from_slice(b"free");
        with_reader(&data, |r| {
            assert!(matches!(read_header(r, 0), Err(Error::Corrupted { .. })));
        });

        // Extended size of 12 is below the 16-byte extended header
        let mut data = vec![0, 0, 0, 1];
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&12u64.to_be_bytes());
        with_reader(&data, |r| {
            assert!(matches!(read_header(r, 0), Err(Error::Corrupted { .. })));
        });
    }

    #[test]
    fn test_find_returns_middle_box() {
        let mut data = atom(b"ftyp", b"M4A \0\0\0\0");
        data.extend(atom(b"free", &[0u8; 3]));
        data.extend(atom(b"mdat", &[1u8; 9]));
        with_reader(&data, |r| {
            let end = r.size();
            let b = find(r, 0, end, FREE).unwrap();
            assert_eq!(b.offset, 16);
            assert_eq!(find(r, 0, end, FTYP).unwrap().offset, 0);
            assert!(find(r, 0, end, MOOV).unwrap_err().is_not_found());
            // End bound is respected even though mdat exists later
            assert!(find(r, 0, b.end(), MDAT).unwrap_err().is_not_found());
        });
    }

    #[test]
    fn test_find_first_match_wins() {
        let mut data = atom(b"free", &[1]);
        data.extend(atom(b"free", &[2, 2]));
        with_reader(&data, |r| {
            let first = find_top(r, FREE).unwrap();
            assert_eq!(first.offset, 0);
            let second = find(r, first.end(), r.size(), FREE).unwrap();
            assert_eq!(second.size, 10);
        });
    }

    #[test]
    fn test_find_zero_size_box_is_corrupt() {
        let mut data = atom(b"free", &[]);
        data.extend_from_slice(&[0, 0, 0, 0]);
        data.extend_from_slice(b"junk");
        data.extend(atom(b"moov", &[]));
        with_reader(&data, |r| {
            assert!(matches!(find_top(r, MOOV), Err(Error::Corrupted { .. })));
        });
    }

    #[test]
    fn test_meta_children_with_and_without_version() {
        let ilst = atom(b"ilst", &[]);
        let iso = full_atom(b"meta", 0, &ilst);
        let mut quicktime_payload = atom(b"hdlr", &[0u8; 4]);
        quicktime_payload.extend(ilst.clone());
        let quicktime = atom(b"meta", &quicktime_payload);

        for data in [iso, quicktime] {
            with_reader(&data, |r| {
                let meta = read_header(r, 0).unwrap();
                assert!(find_in(r, &meta, ILST).is_ok());
            });
        }
    }

    #[test]
    fn test_find_path_and_children() {
        let data_box = full_atom(b"data", 1, b"\0\0\0\0x");
        let nam = atom(b"\xa9nam", &data_box);
        let ilst = atom(b"ilst", &nam);
        let meta = full_atom(b"meta", 0, &ilst);
        let udta = atom(b"udta", &meta);
        let moov = atom(b"moov", &udta);
        with_reader(&moov, |r| {
            let root = find_top(r, MOOV).unwrap();
            let ilst = find_path(r, &root, &[UDTA, META, ILST]).unwrap();
            let kids: Vec<_> = children(r, &ilst).collect::<Result<_>>().unwrap();
            assert_eq!(kids.len(), 1);
            assert_eq!(kids[0].kind.to_string(), "©nam");
            assert!(find_in(r, &kids[0], DATA).is_ok());
        });
    }

    #[test]
    fn test_children_stop_after_error() {
        let mut data = atom(b"free", &[]);
        data.extend_from_slice(&[0, 0, 0, 2, b'b', b'a', b'd', b'!']);
        data.extend(atom(b"free", &[]));
        with_reader(&data, |r| {
            let items: Vec<_> = Children::new(*r, 0, r.size()).collect();
            assert_eq!(items.len(), 2);
            assert!(items[0].is_ok());
            assert!(items[1].is_err());
        });
    }

    #[test]
    fn test_tree_descends_into_containers() {
        let data_box = full_atom(b"data", 1, b"\0\0\0\0x");
        let nam = atom(b"\xa9nam", &data_box);
        let ilst = atom(b"ilst", &nam);
        let meta = full_atom(b"meta", 0, &ilst);
        let udta = atom(b"udta", &meta);
        let mut file = atom(b"ftyp", b"M4B \0\0\0\0");
        file.extend(atom(b"moov", &udta));
        with_reader(&file, |r| {
            let entries = tree(r, 16);
            let names: Vec<String> = entries
                .iter()
                .map(|e| format!("{}{}", e.depth, e.atom.kind))
                .collect();
            assert_eq!(
                names,
                vec!["0ftyp", "0moov", "1udta", "2meta", "3ilst", "4©nam", "5data"]
            );
            assert!(is_container(MOOV));
            assert!(!is_container(DATA));
        });
    }
}
