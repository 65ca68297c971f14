//! Box builders for unit tests

use crate::codec::{put, ByteOrder};
use crate::metadata::FileMetadata;
use crate::reader::SafeReader;
use std::path::Path;

fn be32(value: u32) -> [u8; 4] {
    let mut out = [0u8; 4];
    put(&mut out, value, ByteOrder::Big);
    out
}

/// Plain box
pub fn atom(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&be32(8 + payload.len() as u32));
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

/// Box using the 64-bit extended size field
pub fn atom64(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + payload.len());
    out.extend_from_slice(&be32(1));
    out.extend_from_slice(kind);
    let mut size = [0u8; 8];
    put(&mut size, 16 + payload.len() as u64, ByteOrder::Big);
    out.extend_from_slice(&size);
    out.extend_from_slice(payload);
    out
}

/// Full box: version 0 and 24-bit flags ahead of the payload
pub fn full_atom(kind: &[u8; 4], flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = be32(flags & 0x00FF_FFFF).to_vec();
    body.extend_from_slice(payload);
    atom(kind, &body)
}

/// `data` record with a well-known type and the reserved locale field
pub fn data_record(type_code: u32, value: &[u8]) -> Vec<u8> {
    let mut body = vec![0u8; 4];
    body.extend_from_slice(value);
    full_atom(b"data", type_code, &body)
}

/// Item-list text tag
pub fn text_tag(code: &[u8; 4], text: &str) -> Vec<u8> {
    atom(code, &data_record(1, text.as_bytes()))
}

/// `----` freeform tag
pub fn freeform_tag(namespace: &str, name: &str, value: &str) -> Vec<u8> {
    let mut body = full_atom(b"mean", 0, namespace.as_bytes());
    body.extend(full_atom(b"name", 0, name.as_bytes()));
    body.extend(data_record(1, value.as_bytes()));
    atom(b"----", &body)
}

/// `udta/meta/ilst` wrapper around a prepared `ilst` box
pub fn udta_with_ilst(ilst: &[u8]) -> Vec<u8> {
    let mut meta_body = atom(b"hdlr", &[0u8; 25]);
    meta_body.extend_from_slice(ilst);
    atom(b"udta", &full_atom(b"meta", 0, &meta_body))
}

pub fn ftyp(major: &[u8; 4], compatible: &[&[u8; 4]]) -> Vec<u8> {
    let mut body = major.to_vec();
    body.extend_from_slice(&[0, 0, 2, 0]);
    for brand in compatible {
        body.extend_from_slice(*brand);
    }
    atom(b"ftyp", &body)
}

/// `ftyp` followed by `moov` holding `moov_payload`
pub fn mp4_file(major: &[u8; 4], compatible: &[&[u8; 4]], moov_payload: &[u8]) -> Vec<u8> {
    let mut out = ftyp(major, compatible);
    out.extend(atom(b"moov", moov_payload));
    out
}

/// Version 0 movie header
pub fn mvhd(timescale: u32, duration: u32) -> Vec<u8> {
    let mut body = vec![0u8; 8];
    body.extend_from_slice(&be32(timescale));
    body.extend_from_slice(&be32(duration));
    body.extend_from_slice(&[0u8; 80]);
    full_atom(b"mvhd", 0, &body)
}

/// Nero chapter list, start times in 100 ns units
pub fn chpl(chapters: &[(u64, &str)]) -> Vec<u8> {
    let mut body = vec![1u8, 0, 0, 0, 0, 0, 0, 0, chapters.len() as u8];
    for (start, title) in chapters {
        let mut t = [0u8; 8];
        put(&mut t, *start, ByteOrder::Big);
        body.extend_from_slice(&t);
        body.push(title.len() as u8);
        body.extend_from_slice(title.as_bytes());
    }
    atom(b"chpl", &body)
}

pub fn parse_bytes(file: &Vec<u8>) -> FileMetadata {
    let r = SafeReader::new(file, file.len() as u64, Path::new("/books/Series/test.m4b"));
    crate::mp4::parse(&r).expect("parse failed")
}

/// Run `f` with a reader over `data`
pub fn with_reader<T>(data: &Vec<u8>, f: impl FnOnce(&SafeReader) -> T) -> T {
    let r = SafeReader::new(data, data.len() as u64, Path::new("test.m4b"));
    f(&r)
}

/// Handler reference box declaring `handler` (`soun`, `text`, ...)
pub fn hdlr(handler: &[u8; 4]) -> Vec<u8> {
    let mut body = vec![0u8; 4];
    body.extend_from_slice(handler);
    body.extend_from_slice(&[0u8; 12]);
    body.extend_from_slice(b"Handler\0");
    full_atom(b"hdlr", 0, &body)
}

/// Big-endian u32 as bytes, for hand-built payloads
pub fn u32_bytes(value: u32) -> [u8; 4] {
    be32(value)
}
