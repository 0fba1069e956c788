use thiserror::Error;

/// Errors surfaced by the Docker proxy and the container filesystem view.
#[derive(Debug, Error)]
pub enum DockerError {
    /// The referenced container does not exist; maps to HTTP 404.
    #[error("no such container: {0}")]
    ContainerNotFound(String),

    /// The Docker daemon misbehaved; maps to HTTP 500.
    #[error("docker upstream error: {0}")]
    Upstream(String),

    /// A patch violated its construction invariants.
    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    /// A patched file changed out-of-band, or re-application failed in a
    /// way that cannot be recovered. Callers treat this as fatal.
    #[error("patch reconciliation failed: {0}")]
    PatchReconciliation(String),

    #[error(transparent)]
    Archive(#[from] rebuild_archive::ArchiveError),

    #[error(transparent)]
    Hyper(#[from] hyper::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
}
