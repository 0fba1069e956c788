//! GZIP member-header normalization rules.

use rebuild_archive::gzip::OS_UNKNOWN;

use crate::stabilizer::{Stabilizer, StabilizerFn};

/// The member is re-encoded without compression.
pub fn gzip_compression() -> Stabilizer {
    Stabilizer::new(
        "gzip-compression",
        StabilizerFn::Gzip(Box::new(|m| {
            m.level = 0;
        })),
    )
}

/// The stored file name is dropped.
pub fn gzip_name() -> Stabilizer {
    Stabilizer::new(
        "gzip-name",
        StabilizerFn::Gzip(Box::new(|m| {
            m.name = None;
        })),
    )
}

/// MTIME becomes zero, which RFC 1952 defines as "no timestamp available",
/// so the value round-trips without special handling.
pub fn gzip_time() -> Stabilizer {
    Stabilizer::new(
        "gzip-time",
        StabilizerFn::Gzip(Box::new(|m| {
            m.mtime = 0;
        })),
    )
}

/// Comment and extra are dropped; the OS byte becomes "unknown".
pub fn gzip_misc() -> Stabilizer {
    Stabilizer::new(
        "gzip-misc",
        StabilizerFn::Gzip(Box::new(|m| {
            m.comment = None;
            m.extra = None;
            m.os = OS_UNKNOWN;
        })),
    )
}
