//! ZIP reader/writer over an in-memory byte buffer.
//!
//! The central directory lives at the end of the file, so the reader needs
//! random access; callers holding a stream are upgraded by buffering the
//! whole body first (see [`ZipArchive::parse_reader`]). Entry bodies are
//! decompressed lazily on first access and cached on the entry.

use std::io::{Read, Write};

use crate::error::ArchiveError;

pub const METHOD_STORE: u16 = 0;
pub const METHOD_DEFLATE: u16 = 8;

/// General-purpose flag bit 3: sizes/CRC follow the data in a descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
/// General-purpose flag bit 11: name and comment are UTF-8.
pub const FLAG_UTF8: u16 = 0x0800;

const LOCAL_SIG: u32 = 0x04034b50;
const CENTRAL_SIG: u32 = 0x02014b50;
const EOCD_SIG: u32 = 0x06054b50;
const EOCD64_SIG: u32 = 0x06064b50;
const EOCD64_LOCATOR_SIG: u32 = 0x07064b50;
const DESCRIPTOR_SIG: u32 = 0x08074b50;

const EXTRA_ZIP64: u16 = 0x0001;
const EXTRA_EXT_TIMESTAMP: u16 = 0x5455;

const U32_MAX: u64 = u32::MAX as u64;

#[derive(Debug, Clone)]
struct RawBody {
    data: Vec<u8>,
    method: u16,
}

/// A mutable view of one ZIP member.
#[derive(Debug, Clone, Default)]
pub struct ZipEntry {
    pub name: String,
    /// Seconds since the Unix epoch, derived from the DOS fields (or the
    /// extended-timestamp extra) at parse time. The DOS fields are
    /// authoritative on write.
    pub modified: i64,
    pub dos_time: u16,
    pub dos_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub compressed_size64: u64,
    pub uncompressed_size64: u64,
    pub method: u16,
    pub flags: u16,
    /// True when the name/comment are declared (or detected) as non-UTF-8.
    pub non_utf8: bool,
    pub creator_version: u16,
    pub reader_version: u16,
    pub external_attrs: u32,
    pub extra: Vec<u8>,
    pub comment: String,
    raw: Option<RawBody>,
    body: Option<Vec<u8>>,
}

impl ZipEntry {
    /// Creates a stored entry from a name and body, for building archives
    /// from scratch.
    pub fn new(name: impl Into<String>, body: Vec<u8>) -> Self {
        let mut e = ZipEntry {
            name: name.into(),
            method: METHOD_STORE,
            ..ZipEntry::default()
        };
        e.set_body(body);
        e
    }

    /// Returns the decompressed body, reading it from the original archive
    /// bytes on first access.
    pub fn body(&mut self) -> Result<&[u8], ArchiveError> {
        if self.body.is_none() {
            let decoded = match &self.raw {
                Some(raw) => decompress(&raw.data, raw.method)?,
                None => Vec::new(),
            };
            self.body = Some(decoded);
        }
        Ok(self.body.as_deref().unwrap_or_default())
    }

    /// Overrides the body. Sizes and CRC recompute on write.
    pub fn set_body(&mut self, body: Vec<u8>) {
        self.uncompressed_size64 = body.len() as u64;
        self.uncompressed_size = self.uncompressed_size64.min(U32_MAX) as u32;
        self.body = Some(body);
        self.raw = None;
    }

    /// True for directory placeholders (name ends with `/`).
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    /// Sets `modified` and keeps the DOS date/time fields in sync.
    pub fn set_modified(&mut self, unix_secs: i64) {
        self.modified = unix_secs;
        let (d, t) = unix_to_dos(unix_secs);
        self.dos_date = d;
        self.dos_time = t;
    }
}

/// A mutable view of a whole ZIP archive. Entry order is authoritative on
/// write.
#[derive(Debug, Clone, Default)]
pub struct ZipArchive {
    pub entries: Vec<ZipEntry>,
    pub comment: String,
}

impl ZipArchive {
    /// Parses a ZIP archive from a byte slice.
    pub fn parse(data: &[u8]) -> Result<Self, ArchiveError> {
        let (eocd_at, comment) = find_eocd(data)?;
        let (entry_count, cd_offset) = directory_location(data, eocd_at)?;

        let mut entries = Vec::with_capacity(entry_count.min(4096) as usize);
        let mut pos = cd_offset as usize;
        for _ in 0..entry_count {
            let (entry, next) = parse_central_entry(data, pos)?;
            entries.push(entry);
            pos = next;
        }
        Ok(ZipArchive { entries, comment })
    }

    /// Buffers a stream fully, then parses. The fallback for callers that
    /// cannot offer random access.
    pub fn parse_reader<R: Read>(mut r: R) -> Result<Self, ArchiveError> {
        let mut buf = Vec::new();
        r.read_to_end(&mut buf)?;
        Self::parse(&buf)
    }

    /// Serializes the archive. Per-entry CRC and sizes are recomputed from
    /// the actual body; when the data-descriptor flag is clear they are
    /// written in the local header, otherwise in a trailing descriptor.
    pub fn write(&mut self) -> Result<Vec<u8>, ArchiveError> {
        let mut out = Vec::new();
        let mut centrals: Vec<CentralRecord> = Vec::with_capacity(self.entries.len());

        for entry in &mut self.entries {
            let body = entry.body()?.to_vec();
            let compressed = compress(&body, entry.method)?;
            let crc = crc32fast::hash(&body);

            entry.crc32 = crc;
            entry.uncompressed_size64 = body.len() as u64;
            entry.compressed_size64 = compressed.len() as u64;
            entry.uncompressed_size = entry.uncompressed_size64.min(U32_MAX) as u32;
            entry.compressed_size = entry.compressed_size64.min(U32_MAX) as u32;

            let zip64 = entry.uncompressed_size64 > U32_MAX || entry.compressed_size64 > U32_MAX;
            let offset = out.len() as u64;

            let name_bytes = entry.name.as_bytes();
            let comment_bytes = entry.comment.as_bytes();
            let flags = effective_flags(entry);
            let version_needed = if zip64 { 45 } else { 20 };

            let mut extra = entry.extra.clone();
            if zip64 {
                extra.extend_from_slice(&zip64_extra(
                    entry.uncompressed_size64,
                    entry.compressed_size64,
                    None,
                ));
            }

            let descriptor = flags & FLAG_DATA_DESCRIPTOR != 0;
            let (hdr_crc, hdr_csize, hdr_usize) = if descriptor {
                (0u32, 0u32, 0u32)
            } else if zip64 {
                (crc, u32::MAX, u32::MAX)
            } else {
                (crc, entry.compressed_size, entry.uncompressed_size)
            };

            put_u32(&mut out, LOCAL_SIG);
            put_u16(&mut out, version_needed);
            put_u16(&mut out, flags);
            put_u16(&mut out, entry.method);
            put_u16(&mut out, entry.dos_time);
            put_u16(&mut out, entry.dos_date);
            put_u32(&mut out, hdr_crc);
            put_u32(&mut out, hdr_csize);
            put_u32(&mut out, hdr_usize);
            put_u16(&mut out, name_bytes.len() as u16);
            put_u16(&mut out, extra.len() as u16);
            out.extend_from_slice(name_bytes);
            out.extend_from_slice(&extra);
            out.extend_from_slice(&compressed);

            if descriptor {
                put_u32(&mut out, DESCRIPTOR_SIG);
                put_u32(&mut out, crc);
                if zip64 {
                    put_u64(&mut out, entry.compressed_size64);
                    put_u64(&mut out, entry.uncompressed_size64);
                } else {
                    put_u32(&mut out, entry.compressed_size);
                    put_u32(&mut out, entry.uncompressed_size);
                }
            }

            centrals.push(CentralRecord {
                creator_version: (entry.creator_version & 0xff00) | version_needed,
                version_needed,
                flags,
                method: entry.method,
                dos_time: entry.dos_time,
                dos_date: entry.dos_date,
                crc,
                compressed: entry.compressed_size64,
                uncompressed: entry.uncompressed_size64,
                external_attrs: entry.external_attrs,
                offset,
                name: name_bytes.to_vec(),
                extra: entry.extra.clone(),
                comment: comment_bytes.to_vec(),
            });
        }

        let cd_start = out.len() as u64;
        for rec in &centrals {
            rec.write(&mut out);
        }
        let cd_size = out.len() as u64 - cd_start;

        let count = centrals.len() as u64;
        let need64 = count > 0xFFFF || cd_start > U32_MAX || cd_size > U32_MAX;
        if need64 {
            let eocd64_at = out.len() as u64;
            put_u32(&mut out, EOCD64_SIG);
            put_u64(&mut out, 44); // size of the remainder of this record
            put_u16(&mut out, 45);
            put_u16(&mut out, 45);
            put_u32(&mut out, 0);
            put_u32(&mut out, 0);
            put_u64(&mut out, count);
            put_u64(&mut out, count);
            put_u64(&mut out, cd_size);
            put_u64(&mut out, cd_start);
            put_u32(&mut out, EOCD64_LOCATOR_SIG);
            put_u32(&mut out, 0);
            put_u64(&mut out, eocd64_at);
            put_u32(&mut out, 1);
        }
        put_u32(&mut out, EOCD_SIG);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        put_u16(&mut out, count.min(0xFFFF) as u16);
        put_u16(&mut out, count.min(0xFFFF) as u16);
        put_u32(&mut out, cd_size.min(U32_MAX) as u32);
        put_u32(&mut out, cd_start.min(U32_MAX) as u32);
        let comment_bytes = self.comment.as_bytes();
        put_u16(&mut out, comment_bytes.len() as u16);
        out.extend_from_slice(comment_bytes);
        Ok(out)
    }
}

struct CentralRecord {
    creator_version: u16,
    version_needed: u16,
    flags: u16,
    method: u16,
    dos_time: u16,
    dos_date: u16,
    crc: u32,
    compressed: u64,
    uncompressed: u64,
    external_attrs: u32,
    offset: u64,
    name: Vec<u8>,
    extra: Vec<u8>,
    comment: Vec<u8>,
}

impl CentralRecord {
    fn write(&self, out: &mut Vec<u8>) {
        let size64 = self.compressed > U32_MAX || self.uncompressed > U32_MAX;
        let off64 = self.offset > U32_MAX;
        let mut extra = self.extra.clone();
        if size64 || off64 {
            extra.extend_from_slice(&zip64_extra(
                self.uncompressed,
                self.compressed,
                off64.then_some(self.offset),
            ));
        }
        put_u32(out, CENTRAL_SIG);
        put_u16(out, self.creator_version);
        put_u16(out, self.version_needed);
        put_u16(out, self.flags);
        put_u16(out, self.method);
        put_u16(out, self.dos_time);
        put_u16(out, self.dos_date);
        put_u32(out, self.crc);
        put_u32(out, self.compressed.min(U32_MAX) as u32);
        put_u32(out, self.uncompressed.min(U32_MAX) as u32);
        put_u16(out, self.name.len() as u16);
        put_u16(out, extra.len() as u16);
        put_u16(out, self.comment.len() as u16);
        put_u16(out, 0); // disk number start
        put_u16(out, 0); // internal attributes
        put_u32(out, self.external_attrs);
        put_u32(out, self.offset.min(U32_MAX) as u32);
        out.extend_from_slice(&self.name);
        out.extend_from_slice(&extra);
        out.extend_from_slice(&self.comment);
    }
}

/// Scans backward for the end-of-central-directory record, tolerating a
/// trailing archive comment up to 64 KiB.
fn find_eocd(data: &[u8]) -> Result<(usize, String), ArchiveError> {
    if data.len() < 22 {
        return Err(ArchiveError::malformed("too short for an end-of-central-directory record"));
    }
    let floor = data.len().saturating_sub(22 + 0xFFFF);
    let mut i = data.len() - 22;
    loop {
        if read_u32(data, i)? == EOCD_SIG {
            let clen = read_u16(data, i + 20)? as usize;
            if i + 22 + clen == data.len() {
                let comment = String::from_utf8_lossy(&data[i + 22..]).into_owned();
                return Ok((i, comment));
            }
        }
        if i == floor {
            return Err(ArchiveError::malformed("no end-of-central-directory record"));
        }
        i -= 1;
    }
}

/// Resolves entry count and central-directory offset, honoring ZIP64 when
/// the classic fields are saturated.
fn directory_location(data: &[u8], eocd_at: usize) -> Result<(u64, u64), ArchiveError> {
    let count = read_u16(data, eocd_at + 10)? as u64;
    let cd_offset = read_u32(data, eocd_at + 16)? as u64;
    if count != 0xFFFF && cd_offset != U32_MAX {
        return Ok((count, cd_offset));
    }
    let loc_at = eocd_at
        .checked_sub(20)
        .ok_or_else(|| ArchiveError::malformed("saturated EOCD without a ZIP64 locator"))?;
    if read_u32(data, loc_at)? != EOCD64_LOCATOR_SIG {
        return Err(ArchiveError::malformed("missing ZIP64 end-of-central-directory locator"));
    }
    let eocd64_at = read_u64(data, loc_at + 8)? as usize;
    if read_u32(data, eocd64_at)? != EOCD64_SIG {
        return Err(ArchiveError::malformed("bad ZIP64 end-of-central-directory signature"));
    }
    let count = read_u64(data, eocd64_at + 32)?;
    let cd_offset = read_u64(data, eocd64_at + 48)?;
    Ok((count, cd_offset))
}

fn parse_central_entry(data: &[u8], pos: usize) -> Result<(ZipEntry, usize), ArchiveError> {
    if read_u32(data, pos)? != CENTRAL_SIG {
        return Err(ArchiveError::malformed("bad central directory signature"));
    }
    let creator_version = read_u16(data, pos + 4)?;
    let reader_version = read_u16(data, pos + 6)?;
    let flags = read_u16(data, pos + 8)?;
    let method = read_u16(data, pos + 10)?;
    let dos_time = read_u16(data, pos + 12)?;
    let dos_date = read_u16(data, pos + 14)?;
    let crc = read_u32(data, pos + 16)?;
    let mut csize = read_u32(data, pos + 20)? as u64;
    let mut usize_ = read_u32(data, pos + 24)? as u64;
    let name_len = read_u16(data, pos + 28)? as usize;
    let extra_len = read_u16(data, pos + 30)? as usize;
    let comment_len = read_u16(data, pos + 32)? as usize;
    let external_attrs = read_u32(data, pos + 38)?;
    let mut local_offset = read_u32(data, pos + 42)? as u64;

    let name_at = pos + 46;
    let extra_at = name_at + name_len;
    let comment_at = extra_at + extra_len;
    let end = comment_at + comment_len;
    if end > data.len() {
        return Err(ArchiveError::malformed("truncated central directory entry"));
    }
    let name_bytes = &data[name_at..extra_at];
    let extra = data[extra_at..comment_at].to_vec();
    let comment_bytes = &data[comment_at..end];

    // ZIP64 extra overrides saturated 32-bit fields, in spec order.
    if let Some(z64) = find_extra(&extra, EXTRA_ZIP64) {
        let mut at = 0;
        if usize_ == U32_MAX {
            usize_ = read_u64(z64, at).unwrap_or(usize_);
            at += 8;
        }
        if csize == U32_MAX {
            csize = read_u64(z64, at).unwrap_or(csize);
            at += 8;
        }
        if local_offset == U32_MAX {
            local_offset = read_u64(z64, at).unwrap_or(local_offset);
        }
    }

    let lo = local_offset as usize;
    if read_u32(data, lo)? != LOCAL_SIG {
        return Err(ArchiveError::malformed("bad local header signature"));
    }
    let local_name_len = read_u16(data, lo + 26)? as usize;
    let local_extra_len = read_u16(data, lo + 28)? as usize;
    let data_at = lo + 30 + local_name_len + local_extra_len;
    let data_end = data_at + csize as usize;
    if data_end > data.len() {
        return Err(ArchiveError::malformed("entry data extends past end of archive"));
    }

    let name = String::from_utf8_lossy(name_bytes).into_owned();
    let comment = String::from_utf8_lossy(comment_bytes).into_owned();
    let non_utf8 = flags & FLAG_UTF8 == 0
        && (!name_bytes.is_ascii() || !comment_bytes.is_ascii());

    let modified = match find_extra(&extra, EXTRA_EXT_TIMESTAMP) {
        Some(ts) if ts.len() >= 5 && ts[0] & 1 != 0 => {
            i32::from_le_bytes([ts[1], ts[2], ts[3], ts[4]]) as i64
        }
        _ => dos_to_unix(dos_date, dos_time),
    };

    let entry = ZipEntry {
        name,
        modified,
        dos_time,
        dos_date,
        crc32: crc,
        compressed_size: csize.min(U32_MAX) as u32,
        uncompressed_size: usize_.min(U32_MAX) as u32,
        compressed_size64: csize,
        uncompressed_size64: usize_,
        method,
        flags,
        non_utf8,
        creator_version,
        reader_version,
        external_attrs,
        extra,
        comment,
        raw: Some(RawBody {
            data: data[data_at..data_end].to_vec(),
            method,
        }),
        body: None,
    };
    Ok((entry, end))
}

/// The flags actually written: the entry's flags with the UTF-8 bit derived
/// from `non_utf8` and the name/comment contents.
fn effective_flags(entry: &ZipEntry) -> u16 {
    let ascii = entry.name.is_ascii() && entry.comment.is_ascii();
    if !entry.non_utf8 && !ascii {
        entry.flags | FLAG_UTF8
    } else if entry.non_utf8 {
        entry.flags & !FLAG_UTF8
    } else {
        entry.flags
    }
}

fn zip64_extra(uncompressed: u64, compressed: u64, offset: Option<u64>) -> Vec<u8> {
    let mut body = Vec::with_capacity(28);
    put_u64(&mut body, uncompressed);
    put_u64(&mut body, compressed);
    if let Some(off) = offset {
        put_u64(&mut body, off);
    }
    let mut extra = Vec::with_capacity(body.len() + 4);
    put_u16(&mut extra, EXTRA_ZIP64);
    put_u16(&mut extra, body.len() as u16);
    extra.extend_from_slice(&body);
    extra
}

fn find_extra(extra: &[u8], id: u16) -> Option<&[u8]> {
    let mut at = 0;
    while at + 4 <= extra.len() {
        let field_id = u16::from_le_bytes([extra[at], extra[at + 1]]);
        let size = u16::from_le_bytes([extra[at + 2], extra[at + 3]]) as usize;
        let body_at = at + 4;
        if body_at + size > extra.len() {
            return None;
        }
        if field_id == id {
            return Some(&extra[body_at..body_at + size]);
        }
        at = body_at + size;
    }
    None
}

fn decompress(data: &[u8], method: u16) -> Result<Vec<u8>, ArchiveError> {
    match method {
        METHOD_STORE => Ok(data.to_vec()),
        METHOD_DEFLATE => {
            let mut out = Vec::new();
            flate2::read::DeflateDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| ArchiveError::malformed(format!("bad deflate stream: {e}")))?;
            Ok(out)
        }
        other => Err(ArchiveError::UnsupportedFormat(format!(
            "zip compression method {other}"
        ))),
    }
}

fn compress(body: &[u8], method: u16) -> Result<Vec<u8>, ArchiveError> {
    match method {
        METHOD_STORE => Ok(body.to_vec()),
        METHOD_DEFLATE => {
            let mut enc =
                flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(body)?;
            Ok(enc.finish()?)
        }
        other => Err(ArchiveError::UnsupportedFormat(format!(
            "zip compression method {other}"
        ))),
    }
}

/// DOS date/time to seconds since epoch. A zeroed date decodes to the epoch.
fn dos_to_unix(date: u16, time: u16) -> i64 {
    if date == 0 {
        return 0;
    }
    let year = 1980 + (date >> 9) as i64;
    let month = ((date >> 5) & 0xF).max(1) as i64;
    let day = (date & 0x1F).max(1) as i64;
    let hour = (time >> 11) as i64;
    let minute = ((time >> 5) & 0x3F) as i64;
    let second = ((time & 0x1F) * 2) as i64;
    days_from_civil(year, month, day) * 86_400 + hour * 3600 + minute * 60 + second
}

/// Seconds since epoch to DOS date/time. Times before 1980 collapse to zero,
/// which is also what a zeroed field decodes back to.
fn unix_to_dos(secs: i64) -> (u16, u16) {
    if secs <= 0 {
        return (0, 0);
    }
    let days = secs.div_euclid(86_400);
    let rem = secs.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);
    if year < 1980 {
        return (0, 0);
    }
    if year > 2107 {
        return (0xFF9F, 0xBF7D); // clamp to the DOS epoch ceiling
    }
    let date = (((year - 1980) as u16) << 9) | ((month as u16) << 5) | day as u16;
    let time =
        ((rem / 3600) as u16) << 11 | (((rem / 60) % 60) as u16) << 5 | ((rem % 60) / 2) as u16;
    (date, time)
}

fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_from_days(z: i64) -> (i64, i64, i64) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    (if m <= 2 { y + 1 } else { y }, m, d)
}

fn read_u16(data: &[u8], at: usize) -> Result<u16, ArchiveError> {
    data.get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| ArchiveError::malformed("truncated record"))
}

fn read_u32(data: &[u8], at: usize) -> Result<u32, ArchiveError> {
    data.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| ArchiveError::malformed("truncated record"))
}

fn read_u64(data: &[u8], at: usize) -> Result<u64, ArchiveError> {
    data.get(at..at + 8)
        .map(|b| u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .ok_or_else(|| ArchiveError::malformed("truncated record"))
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(entries: Vec<ZipEntry>) -> Vec<u8> {
        ZipArchive {
            entries,
            comment: String::new(),
        }
        .write()
        .unwrap()
    }

    #[test]
    fn round_trips_stored_entries() {
        let bytes = build(vec![
            ZipEntry::new("a.txt", b"alpha".to_vec()),
            ZipEntry::new("dir/", Vec::new()),
            ZipEntry::new("b.txt", b"beta".to_vec()),
        ]);
        let mut arc = ZipArchive::parse(&bytes).unwrap();
        assert_eq!(arc.entries.len(), 3);
        assert_eq!(arc.entries[0].name, "a.txt");
        assert_eq!(arc.entries[0].body().unwrap(), b"alpha");
        assert!(arc.entries[1].is_dir());
        assert_eq!(arc.entries[2].body().unwrap(), b"beta");
    }

    #[test]
    fn round_trips_deflate() {
        let mut e = ZipEntry::new("big", vec![7u8; 4096]);
        e.method = METHOD_DEFLATE;
        let bytes = build(vec![e]);
        let mut arc = ZipArchive::parse(&bytes).unwrap();
        assert_eq!(arc.entries[0].method, METHOD_DEFLATE);
        assert_eq!(arc.entries[0].body().unwrap(), vec![7u8; 4096]);
    }

    #[test]
    fn write_is_deterministic() {
        let mk = || {
            vec![
                ZipEntry::new("x", b"1".to_vec()),
                ZipEntry::new("y", b"2".to_vec()),
            ]
        };
        assert_eq!(build(mk()), build(mk()));
    }

    #[test]
    fn crc_and_sizes_recompute_after_set_body() {
        let mut e = ZipEntry::new("f", b"old".to_vec());
        e.crc32 = 0xDEAD_BEEF;
        e.set_body(b"new-body".to_vec());
        let bytes = build(vec![e]);
        let mut arc = ZipArchive::parse(&bytes).unwrap();
        assert_eq!(arc.entries[0].uncompressed_size, 8);
        assert_eq!(arc.entries[0].crc32, crc32fast::hash(b"new-body"));
        assert_eq!(arc.entries[0].body().unwrap(), b"new-body");
    }

    #[test]
    fn data_descriptor_flag_moves_sizes_after_data() {
        let mut e = ZipEntry::new("f", b"payload".to_vec());
        e.flags = FLAG_DATA_DESCRIPTOR;
        let bytes = build(vec![e]);
        // Local header CRC field (offset 14) must be zero.
        assert_eq!(&bytes[14..18], &[0, 0, 0, 0]);
        let mut arc = ZipArchive::parse(&bytes).unwrap();
        assert_eq!(arc.entries[0].flags & FLAG_DATA_DESCRIPTOR, FLAG_DATA_DESCRIPTOR);
        assert_eq!(arc.entries[0].body().unwrap(), b"payload");
    }

    #[test]
    fn archive_comment_survives() {
        let mut arc = ZipArchive {
            entries: vec![ZipEntry::new("f", Vec::new())],
            comment: "hello".into(),
        };
        let bytes = arc.write().unwrap();
        assert_eq!(ZipArchive::parse(&bytes).unwrap().comment, "hello");
    }

    #[test]
    fn modified_round_trips_through_dos_fields() {
        let mut e = ZipEntry::new("f", Vec::new());
        e.set_modified(1_600_000_000); // 2020-09-13T12:26:40Z
        let bytes = build(vec![e]);
        let arc = ZipArchive::parse(&bytes).unwrap();
        // DOS time has 2-second resolution.
        assert_eq!(arc.entries[0].modified, 1_600_000_000);
    }

    #[test]
    fn zeroed_dos_fields_decode_to_epoch() {
        assert_eq!(dos_to_unix(0, 0), 0);
        assert_eq!(unix_to_dos(0), (0, 0));
    }

    #[test]
    fn rejects_garbage() {
        assert!(ZipArchive::parse(b"not a zip at all").is_err());
        assert!(ZipArchive::parse(&[]).is_err());
    }
}
