//! # rebuild-archive
//!
//! Format detection and ZIP/TAR/GZIP codecs for canonical archive
//! rewriting. Every codec exposes a *mutable* intermediate representation:
//! the archive owns its entries, entry metadata is plain data, and bodies
//! are materialized lazily (ZIP) or eagerly (TAR) so stabilization passes
//! can rewrite them in place before a deterministic re-encode.
//!
//! Whole archives are buffered in memory by design: the ZIP central
//! directory needs random access and TAR entries must all be present before
//! they can be reordered.

mod error;
mod format;

pub mod gzip;
pub mod tar;
pub mod zip;

pub use error::ArchiveError;
pub use format::Format;
pub use gzip::{read_gzip, write_gzip, GzipMeta};
pub use tar::{TarArchive, TarEntry, TarFormat};
pub use zip::{ZipArchive, ZipEntry};
