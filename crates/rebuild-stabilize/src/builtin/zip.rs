//! ZIP normalization rules.

use rebuild_archive::zip::{FLAG_DATA_DESCRIPTOR, METHOD_STORE};

use crate::stabilizer::{Stabilizer, StabilizerFn};

/// Sorts entries by ascending name (byte-wise lexicographic).
pub fn zip_file_order() -> Stabilizer {
    Stabilizer::new(
        "zip-file-order",
        StabilizerFn::ZipArchive(Box::new(|a| {
            a.entries.sort_by(|x, y| x.name.cmp(&y.name));
        })),
    )
}

/// Modified time becomes the Unix epoch; the raw DOS fields are zeroed.
pub fn zip_modified_time() -> Stabilizer {
    Stabilizer::new(
        "zip-modified-time",
        StabilizerFn::ZipEntry(Box::new(|e| {
            e.modified = 0;
            e.dos_time = 0;
            e.dos_date = 0;
        })),
    )
}

/// Every entry is stored uncompressed.
pub fn zip_compression() -> Stabilizer {
    Stabilizer::new(
        "zip-compression",
        StabilizerFn::ZipEntry(Box::new(|e| {
            e.method = METHOD_STORE;
        })),
    )
}

/// Clears the data-descriptor flag and zeroes CRC and both size widths, so
/// the writer records real values in the local header.
pub fn zip_data_descriptor() -> Stabilizer {
    Stabilizer::new(
        "zip-data-descriptor",
        StabilizerFn::ZipEntry(Box::new(|e| {
            e.flags &= !FLAG_DATA_DESCRIPTOR;
            e.crc32 = 0;
            e.compressed_size = 0;
            e.compressed_size64 = 0;
            e.uncompressed_size = 0;
            e.uncompressed_size64 = 0;
        })),
    )
}

/// Drops the non-UTF-8 declaration.
pub fn zip_file_encoding() -> Stabilizer {
    Stabilizer::new(
        "zip-file-encoding",
        StabilizerFn::ZipEntry(Box::new(|e| {
            e.non_utf8 = false;
        })),
    )
}

/// Zeroes the creator version and external attributes (permission bits).
pub fn zip_file_mode() -> Stabilizer {
    Stabilizer::new(
        "zip-file-mode",
        StabilizerFn::ZipEntry(Box::new(|e| {
            e.creator_version = 0;
            e.external_attrs = 0;
        })),
    )
}

/// Clears comment, reader version, and extra fields, and retains only the
/// data-descriptor bit of the flags. Must run after [`zip_data_descriptor`]
/// so that bit is already clear.
pub fn zip_misc() -> Stabilizer {
    Stabilizer::new(
        "zip-misc",
        StabilizerFn::ZipEntry(Box::new(|e| {
            e.comment.clear();
            e.reader_version = 0;
            e.extra.clear();
            e.flags &= FLAG_DATA_DESCRIPTOR;
        })),
    )
}
