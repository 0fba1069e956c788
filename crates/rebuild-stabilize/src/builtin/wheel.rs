//! Python wheel normalization. Wheels are ZIP archives carrying a
//! `*.dist-info/` directory with build-tool fingerprints.

use tracing::warn;

use crate::stabilizer::{Stabilizer, StabilizerFn};

/// Drops the `Generator:` header from `*.dist-info/WHEEL`.
pub fn wheel_metadata() -> Stabilizer {
    Stabilizer::new(
        "wheel-metadata",
        StabilizerFn::ZipEntry(Box::new(|e| {
            if !e.name.ends_with(".dist-info/WHEEL") {
                return;
            }
            let body = match e.body() {
                Ok(b) => b.to_vec(),
                Err(err) => {
                    warn!(entry = %e.name, error = %err, "skipping unreadable WHEEL entry");
                    return;
                }
            };
            let kept: Vec<&[u8]> = body
                .split_inclusive(|&b| b == b'\n')
                .filter(|line| !line.starts_with(b"Generator:"))
                .collect();
            e.set_body(kept.concat());
        })),
    )
}

/// Sorts the install-record lines of `*.dist-info/RECORD` so the archive
/// iteration order of the build no longer shows through.
pub fn wheel_record() -> Stabilizer {
    Stabilizer::new(
        "wheel-record",
        StabilizerFn::ZipEntry(Box::new(|e| {
            if !e.name.ends_with(".dist-info/RECORD") {
                return;
            }
            let body = match e.body() {
                Ok(b) => b.to_vec(),
                Err(err) => {
                    warn!(entry = %e.name, error = %err, "skipping unreadable RECORD entry");
                    return;
                }
            };
            if body.is_empty() {
                return;
            }
            let mut lines: Vec<&[u8]> = body
                .split(|&b| b == b'\n')
                .filter(|line| !line.is_empty())
                .collect();
            lines.sort();
            let mut out = lines.join(&b'\n');
            out.push(b'\n');
            e.set_body(out);
        })),
    )
}
