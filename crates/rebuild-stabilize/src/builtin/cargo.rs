//! Cargo crate normalization. A `.crate` file is a tar+gzip archive; the
//! packaged `.cargo_vcs_info.json` pins the git commit the build ran from.

use tracing::warn;

use crate::stabilizer::{Stabilizer, StabilizerFn};

const VCS_INFO_SUFFIX: &str = ".cargo_vcs_info.json";

/// Replaces `git.sha1` in `.cargo_vcs_info.json` with forty `x` characters,
/// preserving every other field and the key order.
pub fn cargo_vcs_hash() -> Stabilizer {
    Stabilizer::new(
        "cargo-vcs-hash",
        StabilizerFn::TarEntry(Box::new(|e| {
            if !e.name.ends_with(VCS_INFO_SUFFIX) {
                return;
            }
            let mut value: serde_json::Value = match serde_json::from_slice(e.body()) {
                Ok(v) => v,
                Err(err) => {
                    warn!(entry = %e.name, error = %err, "skipping malformed vcs info");
                    return;
                }
            };
            let Some(sha1) = value
                .get_mut("git")
                .and_then(|git| git.get_mut("sha1"))
                .filter(|s| s.is_string())
            else {
                return;
            };
            *sha1 = serde_json::Value::String("x".repeat(40));
            match serde_json::to_vec(&value) {
                Ok(body) => e.set_body(body),
                Err(err) => warn!(entry = %e.name, error = %err, "vcs info reserialize failed"),
            }
        })),
    )
}
