use thiserror::Error;

/// Errors surfaced by the proxy engine.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The first record on a TLS connection did not look like a usable
    /// ClientHello, or its SNI was missing or malformed.
    #[error("tls peek failed: {0}")]
    TlsPeek(String),

    /// A policy document failed to load: unknown or missing `ruleType`,
    /// or malformed JSON.
    #[error("policy configuration rejected: {0}")]
    PolicyConfig(String),

    /// The MITM handshake with the client failed.
    #[error("tls handshake failed: {0}")]
    Tls(String),

    #[error(transparent)]
    Ca(#[from] rebuild_ca::CaError),

    #[error(transparent)]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error(transparent)]
    Hyper(#[from] hyper::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
