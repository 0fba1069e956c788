//! JAR-specific normalization: manifest attribute stripping and sorting,
//! and git metadata blanking.
//!
//! These rules match ZIP entries by name. A manifest that fails to parse is
//! passed through unchanged by the rule that hit the error; other rules
//! still run.

use rebuild_manifest::Manifest;
use tracing::warn;

use crate::stabilizer::{Stabilizer, StabilizerFn};

const MANIFEST_SUFFIX: &str = "META-INF/MANIFEST.MF";

/// Main-section attributes that record the build environment rather than
/// the artifact. Deleted wholesale by [`jar_build_metadata`].
pub const VOLATILE_ATTRIBUTES: &[&str] = &[
    "Archiver-Version",
    "Bnd-LastModified",
    "Build-Date",
    "Build-Date-UTC",
    "Build-Host",
    "Build-Id",
    "Build-Java-Version",
    "Build-Jdk",
    "Build-Jdk-Spec",
    "Build-Job",
    "Build-Number",
    "Build-OS",
    "Build-Status",
    "Build-Time",
    "Build-Timestamp",
    "Build-Tool",
    "Build-Url",
    "Built-By",
    "Built-Date",
    "Built-Host",
    "Built-JDK",
    "Built-On",
    "Built-OS",
    "Built-Status",
    "Created-By",
    "DSTAMP",
    "Eclipse-SourceReferences",
    "Git-Commit-Id-Describe",
    "Git-Remote-Origin-Url",
    "Git-SHA",
    "Git-Descriptor",
    "git-describe",
    "git-tags",
    "hash",
    "Hudson-Build-Number",
    "Implementation-Build-Date",
    "Implementation-Build-Java-Vendor",
    "Implementation-Build-Java-Version",
    "Implementation-Build",
    "Ion-Java-Build-Time",
    "Java-Vendor",
    "Java-Version",
    "JCabi-Date",
    "Jenkins-Build-Number",
    "Maven-Version",
    "Module-Origin",
    "Originally-Created-By",
    "Os-Arch",
    "Os-Name",
    "Os-Version",
    "SCM-Git-Branch",
    "SCM-Git-Commit-Dirty",
    "SCM-Git-Commit-ID",
    "SCM-Git-Commit-Abbrev",
    "SCM-Git-Commit-Description",
    "SCM-Git-Commit-Timestamp",
    "SCM-Revision",
    "SHA-256-Digest",
    "Source-Date-Epoch",
    "Sunset-BuiltOn",
    "TODAY",
    "Tool",
    "TSTAMP",
    "url",
];

/// Main-section attributes whose values are order-insensitive lists that
/// build tools emit in varying orders.
const SORTED_VALUE_ATTRIBUTES: &[&str] = &[
    "Export-Package",
    "Include-Resource",
    "Private-Package",
    "Provide-Capability",
];

/// Deletes volatile build-environment attributes from the manifest's main
/// section. Entry sections are left alone.
pub fn jar_build_metadata() -> Stabilizer {
    Stabilizer::new(
        "jar-build-metadata",
        StabilizerFn::ZipEntry(Box::new(|e| {
            if !e.name.ends_with(MANIFEST_SUFFIX) {
                return;
            }
            with_manifest(e, |m| {
                for attr in VOLATILE_ATTRIBUTES {
                    m.main.remove(attr);
                }
            });
        })),
    )
}

/// Sorts the comma-separated values of known order-insensitive attributes,
/// respecting double-quoted regions, and sorts each item's
/// semicolon-separated sub-parts.
pub fn jar_attribute_value_order() -> Stabilizer {
    Stabilizer::new(
        "jar-attribute-value-order",
        StabilizerFn::ZipEntry(Box::new(|e| {
            if !e.name.ends_with(MANIFEST_SUFFIX) {
                return;
            }
            with_manifest(e, |m| {
                for attr in SORTED_VALUE_ATTRIBUTES {
                    let Some(value) = m.main.get(attr) else { continue };
                    if value.is_empty() {
                        continue;
                    }
                    let sorted = sort_attribute_value(value);
                    m.main.replace(attr, &sorted);
                }
            });
        })),
    )
}

/// Blanks embedded git metadata files: `git.json` becomes `{}`,
/// `git.properties` becomes empty.
pub fn jar_git_properties() -> Stabilizer {
    Stabilizer::new(
        "jar-git-properties",
        StabilizerFn::ZipEntry(Box::new(|e| {
            match e.name.rsplit('/').next() {
                Some("git.json") => e.set_body(b"{}".to_vec()),
                Some("git.properties") => e.set_body(Vec::new()),
                _ => {}
            }
        })),
    )
}

/// Parses the entry as a manifest, applies `f`, and writes it back. On a
/// read or parse failure the entry is left untouched for this rule only.
fn with_manifest(e: &mut rebuild_archive::ZipEntry, f: impl FnOnce(&mut Manifest)) {
    let body = match e.body() {
        Ok(b) => b.to_vec(),
        Err(err) => {
            warn!(entry = %e.name, error = %err, "skipping unreadable manifest entry");
            return;
        }
    };
    let mut manifest = match Manifest::parse(&body) {
        Ok(m) => m,
        Err(err) => {
            warn!(entry = %e.name, error = %err, "skipping malformed manifest");
            return;
        }
    };
    f(&mut manifest);
    e.set_body(manifest.write());
}

/// Splits on `sep` outside double quotes.
fn split_quoted(value: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in value.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
        }
        if c == sep && !in_quotes {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

/// Sorts top-level comma items, each with its semicolon sub-parts sorted.
fn sort_attribute_value(value: &str) -> String {
    let mut items: Vec<String> = split_quoted(value, ',')
        .into_iter()
        .map(|item| {
            let mut parts = split_quoted(&item, ';');
            parts.sort();
            parts.join(";")
        })
        .collect();
    items.sort();
    items.join(",")
}
