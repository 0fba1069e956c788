//! Container trust-store patches and the per-container patch registry.
//!
//! A [`Patch`] is a value object: path, full before-bytes, full
//! after-bytes. The registry maps container id to its [`PatchSet`]; the
//! outer std mutex guards only map access, while each set's own async
//! mutex serializes patch application per container — unrelated containers
//! proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::containerfs::ContainerFile;
use crate::error::DockerError;

/// In-container locations of distro trust stores, keyed by the
/// `/etc/os-release` `ID=` value.
pub const DISTRO_TRUSTSTORES: &[(&str, &str)] = &[
    ("alpine", "/etc/ssl/cert.pem"),
    ("arch", "/etc/ssl/cert.pem"),
    ("openwrt", "/etc/ssl/cert.pem"),
    ("rhel", "/etc/pki/tls/cert.pem"),
    ("fedora", "/etc/pki/tls/cert.pem"),
    ("centos", "/etc/pki/tls/cert.pem"),
    ("debian", "/etc/ssl/certs/ca-certificates.crt"),
    ("ubuntu", "/etc/ssl/certs/ca-certificates.crt"),
    ("gentoo", "/etc/ssl/certs/ca-certificates.crt"),
    ("linuxmint", "/etc/ssl/certs/ca-certificates.crt"),
    ("opensuse-leap", "/var/lib/ca-certificates/ca-bundle.pem"),
    ("opensuse-tumbleweed", "/var/lib/ca-certificates/ca-bundle.pem"),
];

/// Trust store used when the `/kaniko` marker directory is present.
pub const KANIKO_TRUSTSTORE: &str = "/kaniko/ssl/certs/ca-certificates.crt";

/// Maps an `/etc/os-release` document to the distro's trust-store path.
pub fn truststore_for_os_release(os_release: &str) -> Option<&'static str> {
    let id = os_release.lines().find_map(|line| {
        line.strip_prefix("ID=")
            .map(|v| v.trim().trim_matches('"').trim_matches('\''))
    })?;
    DISTRO_TRUSTSTORES
        .iter()
        .find(|(distro, _)| *distro == id)
        .map(|(_, path)| *path)
}

/// One reversible file mutation applied to a running container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub path: String,
    pub before: ContainerFile,
    pub after: ContainerFile,
}

impl Patch {
    /// Builds a patch, enforcing the invariants: the path is absolute, the
    /// file exists on both sides (creation and deletion are not patches),
    /// and its type does not change.
    pub fn new(
        path: impl Into<String>,
        before: ContainerFile,
        after: ContainerFile,
    ) -> Result<Self, DockerError> {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(DockerError::InvalidPatch(format!(
                "patch path {path:?} is not absolute"
            )));
        }
        if before.typeflag != after.typeflag {
            return Err(DockerError::InvalidPatch(format!(
                "patch for {path:?} changes the file type"
            )));
        }
        Ok(Patch {
            path,
            before,
            after,
        })
    }
}

/// The ordered patches currently applied to one container, serialized by
/// their own async mutex (the "lease").
pub type PatchSet = tokio::sync::Mutex<Vec<Patch>>;

/// Process-wide map from container id to its patch set.
#[derive(Default)]
pub struct PatchRegistry {
    inner: Mutex<HashMap<String, Arc<PatchSet>>>,
}

impl PatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the container's patch set, creating it on first use. The
    /// caller locks the returned set to lease it.
    pub fn get(&self, container_id: &str) -> Arc<PatchSet> {
        self.inner
            .lock()
            .expect("patch registry mutex poisoned")
            .entry(container_id.to_string())
            .or_default()
            .clone()
    }
}

/// Aborts the process. Reserved for reconciliation failures that would
/// otherwise leak proxy artifacts into an exported or committed image, or
/// leave a container carrying stale patches.
pub fn fatal(err: &DockerError) -> ! {
    tracing::error!(error = %err, "unrecoverable patch failure");
    std::process::exit(1);
}
