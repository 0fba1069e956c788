//! # rebuild-stabilize
//!
//! Rewrites package archives so that byte-identical inputs up to volatile
//! metadata (timestamps, ownership, entry order, compression parameters,
//! build-tool fingerprints) produce byte-identical outputs.
//!
//! Stabilizers are named, constrained functions dispatched over a parsed
//! archive in caller order; see [`Stabilizer`]. Built-in rule sets cover
//! ZIP/JAR/wheel and TAR/Cargo archives plus gzip member headers, and
//! user-declared rules ([`custom`]) add regex substitution and path
//! exclusion. [`ContentSummary`] digests stabilized output for comparison.

mod context;
mod error;
mod stabilizer;
mod summary;

pub mod builtin;
pub mod custom;

pub use context::StabilizationContext;
pub use error::StabilizeError;
pub use stabilizer::{apply_gzip, apply_tar, apply_zip, Constraint, Stabilizer, StabilizerFn};
pub use summary::{ContentSummary, DiffResult};

use rebuild_archive::{read_gzip, write_gzip, Format, TarArchive, ZipArchive};

/// The default rule set for ZIP archives, JARs and wheels included.
/// `zip-misc` is ordered after `zip-data-descriptor` so the descriptor bit
/// is already clear when the flag mask is applied.
pub fn default_zip_stabilizers() -> Vec<Stabilizer> {
    vec![
        builtin::zip::zip_file_order(),
        builtin::zip::zip_modified_time(),
        builtin::zip::zip_compression(),
        builtin::zip::zip_data_descriptor(),
        builtin::zip::zip_file_encoding(),
        builtin::zip::zip_file_mode(),
        builtin::zip::zip_misc(),
        builtin::jar::jar_build_metadata(),
        builtin::jar::jar_attribute_value_order(),
        builtin::jar::jar_git_properties(),
        builtin::wheel::wheel_metadata(),
        builtin::wheel::wheel_record(),
    ]
}

/// The default rule set for tar archives, Cargo crates included.
/// `tar-xattrs` runs before `tar-time` so the forced `atime=0` record
/// survives the PAX map clearing.
pub fn default_tar_stabilizers() -> Vec<Stabilizer> {
    vec![
        builtin::tar::tar_file_order(),
        builtin::tar::tar_xattrs(),
        builtin::tar::tar_time(),
        builtin::tar::tar_file_mode(),
        builtin::tar::tar_owners(),
        builtin::tar::tar_device_number(),
        builtin::cargo::cargo_vcs_hash(),
    ]
}

/// The default rule set for gzip member headers.
pub fn default_gzip_stabilizers() -> Vec<Stabilizer> {
    vec![
        builtin::gzip::gzip_compression(),
        builtin::gzip::gzip_name(),
        builtin::gzip::gzip_time(),
        builtin::gzip::gzip_misc(),
    ]
}

/// Every built-in rule. Constraint dispatch keeps each rule on the formats
/// it was built for, so the combined list is safe for any input.
pub fn default_stabilizers() -> Vec<Stabilizer> {
    let mut all = default_tar_stabilizers();
    all.extend(default_gzip_stabilizers());
    all.extend(default_zip_stabilizers());
    all
}

/// Stabilizes archive bytes of a known format with the given rules.
///
/// `Raw` passes bytes through untouched; `Unknown` is an error. A `TarGz`
/// input runs the tar rules over the inner archive and the gzip rules over
/// the member header, then re-encodes both layers.
pub fn stabilize(
    data: &[u8],
    format: Format,
    stabilizers: &[Stabilizer],
) -> Result<Vec<u8>, StabilizeError> {
    let ctx = StabilizationContext::root(format);
    match format {
        Format::Zip => {
            let mut archive = ZipArchive::parse(data)?;
            apply_zip(&mut archive, &ctx, stabilizers);
            Ok(archive.write()?)
        }
        Format::Tar => {
            let mut archive = TarArchive::parse(data)?;
            apply_tar(&mut archive, &ctx, stabilizers);
            Ok(archive.write()?)
        }
        Format::TarGz => {
            let (mut meta, payload) = read_gzip(data)?;
            let mut archive = TarArchive::parse(&payload)?;
            apply_tar(&mut archive, &ctx, stabilizers);
            apply_gzip(&mut meta, &ctx, stabilizers);
            Ok(write_gzip(&meta, &archive.write()?)?)
        }
        Format::Gzip => {
            let (mut meta, payload) = read_gzip(data)?;
            apply_gzip(&mut meta, &ctx, stabilizers);
            Ok(write_gzip(&meta, &payload)?)
        }
        Format::Raw => Ok(data.to_vec()),
        Format::Unknown => Err(StabilizeError::UnsupportedFormat(
            "cannot stabilize an archive of unknown format".into(),
        )),
    }
}
