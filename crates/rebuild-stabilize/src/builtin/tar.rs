//! TAR normalization rules.

use rebuild_archive::TarFormat;

use crate::stabilizer::{Stabilizer, StabilizerFn};

/// Sorts entries by ascending name.
pub fn tar_file_order() -> Stabilizer {
    Stabilizer::new(
        "tar-file-order",
        StabilizerFn::TarArchive(Box::new(|a| {
            a.entries.sort_by(|x, y| x.name.cmp(&y.name));
        })),
    )
}

/// Mod and access times become the epoch, change time is dropped, and the
/// entry is forced to PAX via the `atime=0` record the writer emits.
pub fn tar_time() -> Stabilizer {
    Stabilizer::new(
        "tar-time",
        StabilizerFn::TarEntry(Box::new(|e| {
            e.mtime = 0;
            e.atime = Some(0);
            e.ctime = None;
            e.format = TarFormat::Pax;
            e.pax_records.insert("atime".into(), "0".into());
            e.pax_records.remove("mtime");
            e.pax_records.remove("ctime");
        })),
    )
}

/// Mode becomes 0o777.
pub fn tar_file_mode() -> Stabilizer {
    Stabilizer::new(
        "tar-file-mode",
        StabilizerFn::TarEntry(Box::new(|e| {
            e.mode = 0o777;
        })),
    )
}

/// Numeric and symbolic ownership are cleared.
pub fn tar_owners() -> Stabilizer {
    Stabilizer::new(
        "tar-owners",
        StabilizerFn::TarEntry(Box::new(|e| {
            e.uid = 0;
            e.gid = 0;
            e.uname.clear();
            e.gname.clear();
        })),
    )
}

/// Extended attributes and leftover PAX records are cleared.
pub fn tar_xattrs() -> Stabilizer {
    Stabilizer::new(
        "tar-xattrs",
        StabilizerFn::TarEntry(Box::new(|e| {
            e.xattrs.clear();
            e.pax_records.clear();
        })),
    )
}

/// Device numbers are zeroed.
pub fn tar_device_number() -> Stabilizer {
    Stabilizer::new(
        "tar-device-number",
        StabilizerFn::TarEntry(Box::new(|e| {
            e.devmajor = 0;
            e.devminor = 0;
        })),
    )
}
