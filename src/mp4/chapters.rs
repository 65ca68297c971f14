//! Chapter markers
//!
//! Two layouts are understood:
//! - QuickTime: an audio track points through `tref/chap` at a text track
//!   whose samples are the chapter titles and whose sample times are the
//!   chapter starts.
//! - Nero: a flat `moov/udta/chpl` list of (start, title) pairs.
//!
//! QuickTime wins when both are present.

use super::atom::{self, Atom};
use super::technical::media_time;
use super::{CHAP, CHPL, CO64, MDHD, MDIA, MINF, STBL, STCO, STSZ, STTS, TKHD, TRAK, TREF, UDTA};
use crate::error::{Error, OptionalExt, Result};
use crate::metadata::Chapter;
use crate::reader::SafeReader;
use std::time::Duration;

/// Samples declaring this many bytes or more are not chapter titles
const MAX_TITLE_SAMPLE: u32 = 10_000;

/// `chpl` start times are in 100 ns units
const NERO_TIME_UNIT: u64 = 100;

/// Chapters of the file, QuickTime first and Nero as fallback.
///
/// No chapters at all is not an error. An error is returned only when a
/// chapter structure exists but could not be read and the other layout had
/// nothing to offer.
pub fn read_chapters(reader: &SafeReader, moov: &Atom, total: Duration) -> Result<Vec<Chapter>> {
    let quicktime = quicktime_chapters(reader, moov, total);
    if matches!(&quicktime, Ok(list) if !list.is_empty()) {
        return quicktime;
    }
    if let Err(e) = &quicktime {
        log::debug!("quicktime chapters unreadable: {}", e);
    }

    let nero = nero_chapters(reader, moov, total);
    match (quicktime, nero) {
        (_, Ok(list)) if !list.is_empty() => Ok(list),
        (Err(e), _) | (Ok(_), Err(e)) => Err(e),
        (Ok(_), Ok(_)) => Ok(Vec::new()),
    }
}

/// Chapters from a `tref/chap` referenced text track
pub fn quicktime_chapters(
    reader: &SafeReader,
    moov: &Atom,
    total: Duration,
) -> Result<Vec<Chapter>> {
    let Some(track_id) = chapter_track_id(reader, moov)? else {
        return Ok(Vec::new());
    };
    let Some(trak) = track_by_id(reader, moov, track_id)? else {
        log::debug!("chapter track {} referenced but missing", track_id);
        return Ok(Vec::new());
    };
    let Some(stbl) = atom::find_path(reader, &trak, &[MDIA, MINF, STBL]).optional()? else {
        log::debug!("chapter track {} has no sample table", track_id);
        return Ok(Vec::new());
    };

    let mdhd = required(reader, &trak, atom::find_path(reader, &trak, &[MDIA, MDHD]))?;
    let timescale = read_versioned_u32(reader, &mdhd, "mdhd timescale")?;
    if timescale == 0 {
        return Err(reader.corrupted(mdhd.offset, "chapter track timescale is 0"));
    }

    let offsets = chunk_offsets(reader, &stbl)?;
    let sizes = sample_sizes(reader, &stbl, offsets.len())?;
    let starts = sample_times(reader, &stbl, sizes.len())?;

    let mut chapters = Vec::new();
    for ((&start, &size), &offset) in starts.iter().zip(&sizes).zip(&offsets) {
        if size == 0 || size >= MAX_TITLE_SAMPLE {
            log::debug!("chapter sample at {} has implausible size {}, skipped", offset, size);
            continue;
        }
        let len = reader.read_u16(offset, "chapter title length")?;
        let len = u64::from(len).min(u64::from(size).saturating_sub(2));
        let text = reader.read_vec(offset + 2, len, "chapter title")?;
        chapters.push(Chapter {
            index: 0,
            title: decode_title(&text),
            start_time: media_time(start, timescale).unwrap_or_default(),
            end_time: Duration::ZERO,
        });
    }

    log::debug!("{} quicktime chapters from track {}", chapters.len(), track_id);
    Ok(finish_chapters(chapters, total))
}

/// Chapters from a Nero `chpl` box
pub fn nero_chapters(reader: &SafeReader, moov: &Atom, total: Duration) -> Result<Vec<Chapter>> {
    let Some(chpl) = atom::find_path(reader, moov, &[UDTA, CHPL]).optional()? else {
        return Ok(Vec::new());
    };

    // version(1) flags(3) reserved(4) count(1)
    let start = chpl.data_offset();
    let count = reader.read_u8(start + 8, "chpl chapter count")?;
    let end = chpl.end().min(reader.size());

    let mut chapters = Vec::with_capacity(usize::from(count));
    let mut pos = start + 9;
    for _ in 0..count {
        // start(8) title_len(1)
        if end.saturating_sub(pos) < 9 {
            log::debug!("chpl ends after {} of {} chapters", chapters.len(), count);
            break;
        }
        let time = reader.read_u64(pos, "chpl start time")?;
        let len = reader.read_u8(pos + 8, "chpl title length")?;
        let title = reader.read_vec(pos + 9, u64::from(len), "chpl title")?;
        pos += 9 + u64::from(len);

        chapters.push(Chapter {
            index: 0,
            title: String::from_utf8_lossy(&title).into_owned(),
            start_time: Duration::from_nanos(time.saturating_mul(NERO_TIME_UNIT)),
            end_time: Duration::ZERO,
        });
    }

    log::debug!("{} nero chapters", chapters.len());
    Ok(finish_chapters(chapters, total))
}

/// Number chapters from 1 and end each one where the next starts. The last
/// one ends at `total`.
pub fn finish_chapters(mut chapters: Vec<Chapter>, total: Duration) -> Vec<Chapter> {
    let starts: Vec<Duration> = chapters.iter().skip(1).map(|c| c.start_time).collect();
    for (i, chapter) in chapters.iter_mut().enumerate() {
        chapter.index = i + 1;
        chapter.end_time = starts.get(i).copied().unwrap_or(total);
    }
    chapters
}

/// Track ID named by the first `trak/tref/chap`
fn chapter_track_id(reader: &SafeReader, moov: &Atom) -> Result<Option<u32>> {
    for trak in atom::children(reader, moov) {
        let trak = trak?;
        if trak.kind != TRAK {
            continue;
        }
        if let Some(chap) = atom::find_path(reader, &trak, &[TREF, CHAP]).optional()? {
            if chap.data_size() >= 4 {
                return Ok(Some(reader.read_u32(chap.data_offset(), "chap track id")?));
            }
        }
    }
    Ok(None)
}

/// Track whose `tkhd` declares `id`
fn track_by_id(reader: &SafeReader, moov: &Atom, id: u32) -> Result<Option<Atom>> {
    for trak in atom::children(reader, moov) {
        let trak = trak?;
        if trak.kind != TRAK {
            continue;
        }
        if let Some(tkhd) = atom::find_in(reader, &trak, TKHD).optional()? {
            if read_versioned_u32(reader, &tkhd, "tkhd track id")? == id {
                return Ok(Some(trak));
            }
        }
    }
    Ok(None)
}

/// A box the chapter track cannot do without. Its absence is corruption of
/// the referenced track, not a missing feature.
fn required(reader: &SafeReader, parent: &Atom, lookup: Result<Atom>) -> Result<Atom> {
    lookup.map_err(|e| match e {
        Error::NotFound { kind } => reader.corrupted(
            parent.offset,
            format!("chapter track has no '{}' box", kind),
        ),
        e => e,
    })
}

/// The u32 following creation/modification times in `tkhd` and `mdhd`:
/// +12 in version 0, +20 in version 1
fn read_versioned_u32(reader: &SafeReader, full_box: &Atom, what: &str) -> Result<u32> {
    let start = full_box.data_offset();
    let skip = if reader.read_u8(start, what)? == 1 { 20 } else { 12 };
    reader.read_u32(start + skip, what)
}

/// Entry count of a full-box table, capped by the bytes the box holds
fn table_len(
    reader: &SafeReader,
    table: &Atom,
    header: u64,
    entry_size: u64,
    what: &str,
) -> Result<u64> {
    let count = u64::from(reader.read_u32(table.data_offset() + header - 4, what)?);
    let room = table.data_size().saturating_sub(header) / entry_size;
    if count > room {
        log::debug!("{} claims {} entries, room for {}", what, count, room);
    }
    Ok(count.min(room))
}

/// Chunk offsets from `stco` or `co64`
fn chunk_offsets(reader: &SafeReader, stbl: &Atom) -> Result<Vec<u64>> {
    if let Some(stco) = atom::find_in(reader, stbl, STCO).optional()? {
        let n = table_len(reader, &stco, 8, 4, "stco entry count")?;
        let base = stco.data_offset() + 8;
        return (0..n)
            .map(|i| reader.read_u32(base + i * 4, "stco offset").map(u64::from))
            .collect();
    }
    let co64 = required(reader, stbl, atom::find_in(reader, stbl, CO64))?;
    let n = table_len(reader, &co64, 8, 8, "co64 entry count")?;
    let base = co64.data_offset() + 8;
    (0..n)
        .map(|i| reader.read_u64(base + i * 8, "co64 offset"))
        .collect()
}

/// Per-sample byte sizes from `stsz`, at most `limit` of them
fn sample_sizes(reader: &SafeReader, stbl: &Atom, limit: usize) -> Result<Vec<u32>> {
    let stsz = required(reader, stbl, atom::find_in(reader, stbl, STSZ))?;
    let start = stsz.data_offset();
    let uniform = reader.read_u32(start + 4, "stsz sample size")?;
    let count = reader.read_u32(start + 8, "stsz sample count")?;
    let limit = limit as u64;

    if uniform != 0 {
        let n = u64::from(count).min(limit);
        return Ok(vec![uniform; n as usize]);
    }
    let n = table_len(reader, &stsz, 12, 4, "stsz sample count")?.min(limit);
    (0..n)
        .map(|i| reader.read_u32(start + 12 + i * 4, "stsz entry"))
        .collect()
}

/// Start time of each sample in media units, at most `limit` of them
fn sample_times(reader: &SafeReader, stbl: &Atom, limit: usize) -> Result<Vec<u64>> {
    let stts = required(reader, stbl, atom::find_in(reader, stbl, STTS))?;
    let n = table_len(reader, &stts, 8, 8, "stts entry count")?;
    let base = stts.data_offset() + 8;

    let mut starts = Vec::with_capacity(limit);
    let mut time = 0u64;
    for i in 0..n {
        let run = reader.read_u32(base + i * 8, "stts sample count")?;
        let delta = u64::from(reader.read_u32(base + i * 8 + 4, "stts sample delta")?);
        for _ in 0..run {
            if starts.len() >= limit {
                return Ok(starts);
            }
            starts.push(time);
            time = time.saturating_add(delta);
        }
    }
    Ok(starts)
}

/// Chapter title text: UTF-16 when it starts with a byte order mark,
/// UTF-8 otherwise
fn decode_title(bytes: &[u8]) -> String {
    let utf16 = |big_endian: bool| {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| {
                if big_endian {
                    u16::from_be_bytes([c[0], c[1]])
                } else {
                    u16::from_le_bytes([c[0], c[1]])
                }
            })
            .collect();
        String::from_utf16_lossy(&units)
    };
    let text = match bytes {
        [0xFE, 0xFF, ..] => utf16(true),
        [0xFF, 0xFE, ..] => utf16(false),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    };
    text.trim_end_matches('\0').to_string()
}
