//! GZIP member codec.
//!
//! The underlying gzip writer cannot change its compression level after
//! construction, so the mutable view carries the level alongside the header
//! fields and the final writer is built from the settled view.

use std::io::{Read, Write};

use flate2::{Compression, GzBuilder};

use crate::error::ArchiveError;

/// Operating-system byte meaning "unknown" (RFC 1952 §2.3.1).
pub const OS_UNKNOWN: u8 = 255;

/// Mutable view of a gzip member header plus the writer's compression level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GzipMeta {
    pub name: Option<Vec<u8>>,
    pub comment: Option<Vec<u8>>,
    pub extra: Option<Vec<u8>>,
    /// RFC 1952 MTIME; zero means "no timestamp available" and so
    /// round-trips without special handling.
    pub mtime: u32,
    pub os: u8,
    /// 0 = no compression .. 9 = best.
    pub level: u32,
}

impl Default for GzipMeta {
    fn default() -> Self {
        GzipMeta {
            name: None,
            comment: None,
            extra: None,
            mtime: 0,
            os: OS_UNKNOWN,
            level: 6,
        }
    }
}

/// Decompresses a gzip member, returning its header view and payload.
pub fn read_gzip(data: &[u8]) -> Result<(GzipMeta, Vec<u8>), ArchiveError> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut payload = Vec::new();
    decoder
        .read_to_end(&mut payload)
        .map_err(|e| ArchiveError::malformed(format!("bad gzip stream: {e}")))?;
    let header = decoder
        .header()
        .ok_or_else(|| ArchiveError::malformed("missing gzip header"))?;
    let meta = GzipMeta {
        name: header.filename().map(<[u8]>::to_vec),
        comment: header.comment().map(<[u8]>::to_vec),
        extra: header.extra().map(<[u8]>::to_vec),
        mtime: header.mtime(),
        os: header.operating_system(),
        level: GzipMeta::default().level,
    };
    Ok((meta, payload))
}

/// Compresses a payload under the settled header view.
pub fn write_gzip(meta: &GzipMeta, payload: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    let mut builder = GzBuilder::new()
        .mtime(meta.mtime)
        .operating_system(meta.os);
    if let Some(name) = &meta.name {
        builder = builder.filename(name.clone());
    }
    if let Some(comment) = &meta.comment {
        builder = builder.comment(comment.clone());
    }
    if let Some(extra) = &meta.extra {
        builder = builder.extra(extra.clone());
    }
    let mut encoder = builder.write(Vec::new(), Compression::new(meta.level));
    encoder.write_all(payload)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_fields() {
        let meta = GzipMeta {
            name: Some(b"file.tar".to_vec()),
            comment: Some(b"a comment".to_vec()),
            extra: Some(vec![1, 2, 3, 4]),
            mtime: 1_600_000_000,
            os: 3,
            level: 6,
        };
        let bytes = write_gzip(&meta, b"payload").unwrap();
        let (back, payload) = read_gzip(&bytes).unwrap();
        assert_eq!(payload, b"payload");
        assert_eq!(back.name, meta.name);
        assert_eq!(back.comment, meta.comment);
        assert_eq!(back.extra, meta.extra);
        assert_eq!(back.mtime, meta.mtime);
        assert_eq!(back.os, meta.os);
    }

    #[test]
    fn bare_header_round_trips() {
        let bytes = write_gzip(&GzipMeta::default(), b"x").unwrap();
        let (back, _) = read_gzip(&bytes).unwrap();
        assert_eq!(back, GzipMeta::default());
    }

    #[test]
    fn level_zero_still_decodes() {
        let meta = GzipMeta {
            level: 0,
            ..GzipMeta::default()
        };
        let bytes = write_gzip(&meta, b"uncompressed payload").unwrap();
        let (_, payload) = read_gzip(&bytes).unwrap();
        assert_eq!(payload, b"uncompressed payload");
    }

    #[test]
    fn corrupt_stream_is_malformed() {
        let mut bytes = write_gzip(&GzipMeta::default(), b"payload-payload").unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        assert!(read_gzip(&bytes).is_err());
    }
}
