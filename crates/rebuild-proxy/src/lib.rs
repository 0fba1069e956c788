//! # rebuild-proxy
//!
//! A transparent HTTP/HTTPS interception proxy run alongside containerized
//! builds. It terminates TLS on the fly with an ephemeral CA
//! ([`rebuild_ca`]), records every outbound request, enforces an
//! allow/deny policy, and exposes an admin endpoint for certificates,
//! the activity summary, and live policy replacement.

mod admin;
mod engine;
mod error;
mod meta;
mod netlog;
mod peek;
mod policy;

pub use engine::{Proxy, ProxyConfig};
pub use error::ProxyError;
pub use meta::RequestMeta;
pub use netlog::NetworkActivity;
pub use peek::{peek_client_hello, PeekedStream};
pub use policy::{HostMatch, PathMatch, Policy, PolicyMode, Rule, UrlMatchRule};
