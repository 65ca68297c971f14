//! Technical audio properties: duration, codec, channels, sample rate, bitrate
//!
//! ```text
//! moov
//!   ├── mvhd: version(1) flags(3) ... timescale duration
//!   └── trak
//!       └── mdia
//!           ├── hdlr: handler type (soun)
//!           └── minf → stbl → stsd
//!               └── mp4a (sample entry)
//!                   └── esds (AAC decoder config)
//! ```

use super::atom::{self, Atom};
use super::{FourCc, HDLR, MDIA, MINF, MVHD, STBL, STSD, TRAK};
use crate::error::{OptionalExt, Result};
use crate::metadata::{AudioInfo, Warning};
use crate::reader::SafeReader;
use std::time::Duration;

const SOUND_HANDLER: FourCc = FourCc::new(b"soun");
const MP4A: FourCc = FourCc::new(b"mp4a");
const AAVD: FourCc = FourCc::new(b"aavd");

/// How far past the sample entry start we look for `esds`
const ESDS_WINDOW: u64 = 256;

/// MPEG-4 descriptor tags
const ES_DESCRIPTOR: u8 = 0x03;
const DECODER_CONFIG: u8 = 0x04;
const DECODER_SPECIFIC_INFO: u8 = 0x05;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Sample entry codes with a human name. Anything else is shown as-is.
const CODEC_NAMES: &[(FourCc, &str)] = &[
    (MP4A, "AAC"),
    (AAVD, "AAC (Audible)"),
    (FourCc::new(b"ac-3"), "Dolby Digital (AC-3)"),
    (FourCc::new(b"ec-3"), "Dolby Digital Plus (E-AC-3)"),
    (FourCc::new(b"ac-4"), "Dolby AC-4"),
    (FourCc::new(b"alac"), "Apple Lossless (ALAC)"),
    (FourCc::new(b"fLaC"), "FLAC"),
    (FourCc::new(b"Opus"), "Opus"),
    (FourCc::new(b".mp3"), "MP3"),
    (FourCc::new(b"samr"), "AMR-NB"),
    (FourCc::new(b"sawb"), "AMR-WB"),
    (FourCc::new(b"lpcm"), "Linear PCM"),
    (FourCc::new(b"sowt"), "PCM (little-endian)"),
    (FourCc::new(b"twos"), "PCM (big-endian)"),
];

/// Read the technical properties of the first audio track.
///
/// Missing boxes leave fields at zero without complaint. A read failure is
/// recorded as one `technical` warning; whatever was read before it is kept.
pub fn read_audio_info(
    reader: &SafeReader,
    moov: &Atom,
    warnings: &mut Vec<Warning>,
) -> AudioInfo {
    let mut info = AudioInfo::default();
    if let Err(e) = read_into(reader, moov, &mut info) {
        warnings.push(Warning::new("technical", e));
    }
    info
}

fn read_into(reader: &SafeReader, moov: &Atom, info: &mut AudioInfo) -> Result<()> {
    match atom::find_in(reader, moov, MVHD).optional()? {
        Some(mvhd) => {
            info.duration = movie_duration(reader, &mvhd)?;
            info.bitrate = bitrate(reader.size(), info.duration);
        }
        None => log::debug!("no mvhd, duration unknown"),
    }

    let Some(trak) = audio_track(reader, moov)? else {
        log::debug!("no trak, codec unknown");
        return Ok(());
    };
    let Some(stsd) = atom::find_path(reader, &trak, &[MDIA, MINF, STBL, STSD]).optional()? else {
        log::debug!("track at {} has no stsd", trak.offset);
        return Ok(());
    };
    read_sample_description(reader, &stsd, info)
}

/// Movie duration from `mvhd`, zero when the timescale is 0
fn movie_duration(reader: &SafeReader, mvhd: &Atom) -> Result<Duration> {
    let start = mvhd.data_offset();
    let version = reader.read_u8(start, "mvhd version")?;
    let (timescale, units) = if version == 1 {
        (
            reader.read_u32(start + 20, "mvhd timescale")?,
            reader.read_u64(start + 24, "mvhd duration")?,
        )
    } else {
        (
            reader.read_u32(start + 12, "mvhd timescale")?,
            u64::from(reader.read_u32(start + 16, "mvhd duration")?),
        )
    };
    Ok(media_time(units, timescale).unwrap_or_default())
}

/// Convert `units` of `timescale` per second to real time.
///
/// `None` when the timescale is 0.
pub fn media_time(units: u64, timescale: u32) -> Option<Duration> {
    if timescale == 0 {
        return None;
    }
    let nanos = u128::from(units) * NANOS_PER_SEC / u128::from(timescale);
    Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
}

/// Average bits per second over the whole file
fn bitrate(file_size: u64, duration: Duration) -> u32 {
    let nanos = duration.as_nanos();
    if file_size == 0 || nanos == 0 {
        return 0;
    }
    let bps = u128::from(file_size) * 8 * NANOS_PER_SEC / nanos;
    u32::try_from(bps).unwrap_or(u32::MAX)
}

/// First track with a sound handler, otherwise the first track. A track
/// whose handler cannot be read counts as not being sound.
fn audio_track(reader: &SafeReader, moov: &Atom) -> Result<Option<Atom>> {
    let mut first = None;
    for trak in atom::children(reader, moov) {
        let trak = trak?;
        if trak.kind != TRAK {
            continue;
        }
        let handler = handler_type(reader, &trak).unwrap_or_else(|e| {
            log::debug!("track at {}: unreadable handler: {}", trak.offset, e);
            None
        });
        if handler == Some(SOUND_HANDLER) {
            return Ok(Some(trak));
        }
        first.get_or_insert(trak);
    }
    Ok(first)
}

/// Handler type declared in `trak/mdia/hdlr`
fn handler_type(reader: &SafeReader, trak: &Atom) -> Result<Option<FourCc>> {
    match atom::find_path(reader, trak, &[MDIA, HDLR]).optional()? {
        // version/flags(4) pre_defined(4) handler_type(4)
        Some(hdlr) if hdlr.data_size() >= 12 => Ok(Some(FourCc(
            reader.read_fourcc(hdlr.data_offset() + 8, "hdlr handler type")?,
        ))),
        _ => Ok(None),
    }
}

/// Codec, channels and sample rate from the first sample entry
fn read_sample_description(
    reader: &SafeReader,
    stsd: &Atom,
    info: &mut AudioInfo,
) -> Result<()> {
    let start = stsd.data_offset();
    let count = reader.read_u32(start + 4, "stsd entry count")?;
    if count == 0 {
        log::debug!("stsd at {} has no entries", stsd.offset);
        return Ok(());
    }

    // Sample entry: size(4) format(4) reserved(6) data_ref_index(2)
    // version(2) revision(2) vendor(4) channels(2) sample_size(2)
    // compression_id(2) packet_size(2) sample_rate(4, 16.16)
    let entry = start + 8;
    let codec = FourCc(reader.read_fourcc(entry + 4, "sample entry codec")?);
    info.codec = codec.to_string();
    info.codec_name = codec_name(codec)
        .map(str::to_string)
        .unwrap_or_else(|| info.codec.clone());
    info.channels = reader.read_u16(entry + 24, "sample entry channels")?;
    info.sample_rate = reader.read_u32(entry + 32, "sample entry sample rate")? >> 16;

    if codec == MP4A || codec == AAVD {
        if let Some(profile) = aac_profile(reader, entry, stsd.end()) {
            info.codec_profile = profile.to_string();
        }
    }
    Ok(())
}

fn codec_name(codec: FourCc) -> Option<&'static str> {
    CODEC_NAMES
        .iter()
        .find(|(c, _)| *c == codec)
        .map(|(_, name)| *name)
}

/// AAC profile from the `esds` box following the sample entry
fn aac_profile(reader: &SafeReader, entry: u64, limit: u64) -> Option<&'static str> {
    let end = limit.min(reader.size());
    let window = end.saturating_sub(entry).min(ESDS_WINDOW);
    let bytes = reader.read_vec(entry, window, "esds search window").ok()?;

    let marker = bytes.windows(4).position(|w| w == b"esds")?;
    // Skip the type code and the version/flags word
    let descriptors = bytes.get(marker + 8..)?;
    let object_type = audio_object_type(descriptors)?;
    log::trace!("esds audio object type {}", object_type);
    profile_name(object_type)
}

/// Walk ES → DecoderConfig → DecoderSpecificInfo to the Audio Object Type
fn audio_object_type(bytes: &[u8]) -> Option<u8> {
    let mut pos = 0;

    if descriptor_header(bytes, &mut pos)? != ES_DESCRIPTOR {
        return None;
    }
    pos += 2; // ES_ID
    let flags = *bytes.get(pos)?;
    pos += 1;
    if flags & 0x80 != 0 {
        pos += 2; // dependsOn_ES_ID
    }
    if flags & 0x40 != 0 {
        pos += 1 + usize::from(*bytes.get(pos)?); // URL
    }
    if flags & 0x20 != 0 {
        pos += 2; // OCR_ES_ID
    }

    if descriptor_header(bytes, &mut pos)? != DECODER_CONFIG {
        return None;
    }
    // objectTypeIndication(1) streamType(1) bufferSize(3) maxBitrate(4) avgBitrate(4)
    pos += 13;

    if descriptor_header(bytes, &mut pos)? != DECODER_SPECIFIC_INFO {
        return None;
    }
    let first = *bytes.get(pos)?;
    let object_type = first >> 3;
    if object_type != 31 {
        return Some(object_type);
    }
    let second = *bytes.get(pos + 1)?;
    Some(32 + (((first & 0x07) << 3) | (second >> 5)))
}

/// Read a descriptor tag and its 7-bit continued length, leaving `pos` at
/// the payload
fn descriptor_header(bytes: &[u8], pos: &mut usize) -> Option<u8> {
    let tag = *bytes.get(*pos)?;
    *pos += 1;
    for _ in 0..4 {
        let b = *bytes.get(*pos)?;
        *pos += 1;
        if b & 0x80 == 0 {
            break;
        }
    }
    Some(tag)
}

fn profile_name(object_type: u8) -> Option<&'static str> {
    let name = match object_type {
        1 => "AAC Main",
        2 => "AAC-LC",
        3 => "AAC SSR",
        4 => "AAC LTP",
        5 => "HE-AAC",
        6 => "AAC Scalable",
        23 => "AAC-LD",
        29 => "HE-AAC v2",
        39 => "AAC-ELD",
        42 => "xHE-AAC",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use crate::mp4::MOOV;

    fn mvhd_v1(timescale: u32, duration: u64) -> Vec<u8> {
        let mut body = vec![1u8, 0, 0, 0];
        body.extend_from_slice(&[0u8; 16]);
        body.extend_from_slice(&u32_bytes(timescale));
        body.extend_from_slice(&duration.to_be_bytes());
        body.extend_from_slice(&[0u8; 80]);
        atom(b"mvhd", &body)
    }

    fn sample_entry(codec: &[u8; 4], channels: u16, rate: u32, extra: &[u8]) -> Vec<u8> {
        let mut body = vec![0u8; 16];
        body.extend_from_slice(&channels.to_be_bytes());
        body.extend_from_slice(&[0, 16, 0, 0, 0, 0]);
        body.extend_from_slice(&u32_bytes(rate << 16));
        body.extend_from_slice(extra);
        atom(codec, &body)
    }

    fn esds(asc: &[u8]) -> Vec<u8> {
        let mut dsi = vec![DECODER_SPECIFIC_INFO, asc.len() as u8];
        dsi.extend_from_slice(asc);
        let mut dcd = vec![DECODER_CONFIG, 13 + dsi.len() as u8, 0x40, 0x15];
        dcd.extend_from_slice(&[0u8; 11]);
        dcd.extend(dsi);
        // Four-byte length form, as many encoders write it
        let mut es = vec![ES_DESCRIPTOR, 0x80, 0x80, 0x80, 3 + dcd.len() as u8, 0, 1, 0];
        es.extend(dcd);
        full_atom(b"esds", 0, &es)
    }

    fn trak(handler: &[u8; 4], entry: &[u8]) -> Vec<u8> {
        let mut stsd_body = u32_bytes(1).to_vec();
        stsd_body.extend_from_slice(entry);
        let stbl = atom(b"stbl", &full_atom(b"stsd", 0, &stsd_body));
        let mut mdia = hdlr(handler);
        mdia.extend(atom(b"minf", &stbl));
        atom(b"trak", &atom(b"mdia", &mdia))
    }

    fn audio_info(moov_payload: &[u8]) -> (AudioInfo, Vec<Warning>) {
        let file = mp4_file(b"M4A ", &[], moov_payload);
        with_reader(&file, |r| {
            let moov = atom::find_top(r, MOOV).unwrap();
            let mut warnings = Vec::new();
            let info = read_audio_info(r, &moov, &mut warnings);
            (info, warnings)
        })
    }

    #[test]
    fn test_media_time() {
        assert_eq!(media_time(180_000, 1000), Some(Duration::from_secs(180)));
        assert_eq!(media_time(22_050, 44_100), Some(Duration::from_millis(500)));
        assert_eq!(media_time(5, 0), None);
        assert_eq!(media_time(u64::MAX, 1), Some(Duration::from_nanos(u64::MAX)));
    }

    #[test]
    fn test_bitrate() {
        assert_eq!(bitrate(1_000_000, Duration::from_secs(8)), 1_000_000);
        assert_eq!(bitrate(1_000_000, Duration::ZERO), 0);
        assert_eq!(bitrate(0, Duration::from_secs(8)), 0);
    }

    #[test]
    fn test_mvhd_version_0() {
        let (info, warnings) = audio_info(&mvhd(1000, 180_000));
        assert_eq!(info.duration, Duration::from_secs(180));
        assert!(info.bitrate > 0);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_mvhd_version_1() {
        let (info, warnings) = audio_info(&mvhd_v1(44_100, 44_100 * 3600));
        assert_eq!(info.duration, Duration::from_secs(3600));
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_zero_timescale_leaves_duration_unknown() {
        let (info, warnings) = audio_info(&mvhd(0, 180_000));
        assert_eq!(info.duration, Duration::ZERO);
        assert_eq!(info.bitrate, 0);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_aac_lc_track() {
        let entry = sample_entry(b"mp4a", 2, 44_100, &esds(&[0x12, 0x10]));
        let mut moov = mvhd(44_100, 44_100 * 60);
        moov.extend(trak(b"soun", &entry));
        let (info, warnings) = audio_info(&moov);
        assert_eq!(info.codec, "mp4a");
        assert_eq!(info.codec_name, "AAC");
        assert_eq!(info.codec_profile, "AAC-LC");
        assert_eq!(info.channels, 2);
        assert_eq!(info.sample_rate, 44_100);
        assert_eq!(info.duration, Duration::from_secs(60));
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_escaped_object_type() {
        // 31 escape, then 6 bits: 10 → 32 + 10 = 42
        let entry = sample_entry(b"mp4a", 1, 48_000, &esds(&[0xF9, 0x40]));
        let (info, _) = audio_info(&trak(b"soun", &entry));
        assert_eq!(info.codec_profile, "xHE-AAC");
    }

    #[test]
    fn test_missing_esds_leaves_profile_empty() {
        let entry = sample_entry(b"mp4a", 2, 22_050, &[]);
        let (info, warnings) = audio_info(&trak(b"soun", &entry));
        assert_eq!(info.codec_name, "AAC");
        assert_eq!(info.codec_profile, "");
        assert_eq!(info.sample_rate, 22_050);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_sound_track_preferred() {
        let mut moov = trak(b"text", &sample_entry(b"text", 0, 0, &[]));
        moov.extend(trak(b"soun", &sample_entry(b"alac", 2, 48_000, &[])));
        let (info, _) = audio_info(&moov);
        assert_eq!(info.codec, "alac");
        assert_eq!(info.codec_name, "Apple Lossless (ALAC)");
        assert_eq!(info.sample_rate, 48_000);
    }

    #[test]
    fn test_broken_handler_is_not_sound() {
        // Undersized box ahead of hdlr in the first track, short hdlr in the second
        let mut broken = vec![0, 0, 0, 2];
        broken.extend_from_slice(b"bad!");
        broken.extend(hdlr(b"soun"));
        let mut moov = atom(b"trak", &atom(b"mdia", &broken));
        moov.extend(atom(b"trak", &atom(b"mdia", &full_atom(b"hdlr", 0, b"soun"))));
        moov.extend(trak(b"soun", &sample_entry(b"alac", 2, 44_100, &[])));

        let (info, warnings) = audio_info(&moov);
        assert_eq!(info.codec, "alac");
        assert_eq!(info.sample_rate, 44_100);
        assert!(warnings.is_empty(), "{:?}", warnings);
    }

    #[test]
    fn test_empty_sample_description() {
        let stbl = atom(b"stbl", &full_atom(b"stsd", 0, &u32_bytes(0)));
        let mut mdia = hdlr(b"soun");
        mdia.extend(atom(b"minf", &stbl));
        let mut moov = mvhd(1000, 2000);
        moov.extend(atom(b"trak", &atom(b"mdia", &mdia)));

        let (info, warnings) = audio_info(&moov);
        assert_eq!(info.duration, Duration::from_secs(2));
        assert_eq!(info.codec, "");
        assert_eq!((info.channels, info.sample_rate), (0, 0));
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_unknown_codec_passes_through() {
        let (info, _) = audio_info(&trak(b"soun", &sample_entry(b"zzzz", 6, 48_000, &[])));
        assert_eq!(info.codec, "zzzz");
        assert_eq!(info.codec_name, "zzzz");
        assert_eq!(info.channels, 6);
    }

    #[test]
    fn test_missing_boxes_are_silent() {
        let bare = atom(b"trak", &atom(b"mdia", &hdlr(b"soun")));
        let (info, warnings) = audio_info(&bare);
        assert_eq!(info, AudioInfo::default());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_truncated_sample_entry_warns() {
        // stsd declares one entry but the entry is cut short
        let mut stsd_body = u32_bytes(1).to_vec();
        stsd_body.extend_from_slice(&[0, 0, 0, 40]);
        stsd_body.extend_from_slice(b"mp4a");
        let stbl = atom(b"stbl", &full_atom(b"stsd", 0, &stsd_body));
        let mut mdia = hdlr(b"soun");
        mdia.extend(atom(b"minf", &stbl));
        let mut moov = mvhd(1000, 5000);
        moov.extend(atom(b"trak", &atom(b"mdia", &mdia)));
        // The file ends right after the codec code
        let (info, warnings) = audio_info(&moov);
        assert_eq!(info.duration, Duration::from_secs(5));
        assert_eq!(info.codec, "mp4a");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].context, "technical");
    }
}
