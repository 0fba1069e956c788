//! Docker API request classification.
//!
//! Only a handful of endpoints need interception; everything else proxies
//! untouched. Patterns tolerate the optional `/vN` API version prefix every
//! Docker client may send.

use std::sync::OnceLock;

use hyper::{Method, Uri};
use regex::Regex;

/// What the proxy must do around a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// `POST /containers/create`: rewrite the body before forwarding.
    PatchEnvDuring,
    /// `POST /containers/{id}/(start|restart|unpause)`: patch the
    /// container filesystem before forwarding.
    PatchBefore { id: String },
    /// `GET /containers/{id}/export`: revert patches for the duration of
    /// the response, then re-apply.
    UnpatchDuring { id: String },
    /// `POST /commit?container={id}`: like export, plus environment
    /// scrubbing of the committed config.
    UnpatchAndUnpatchEnvDuring { id: String },
    /// Anything else: forward untouched.
    None,
}

struct Patterns {
    create: Regex,
    lifecycle: Regex,
    export: Regex,
    commit: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        create: Regex::new(r"^(?:/v[0-9][^/]*)?/containers/create$").expect("static regex"),
        lifecycle: Regex::new(r"^(?:/v[0-9][^/]*)?/containers/([^/]+)/(start|restart|unpause)$")
            .expect("static regex"),
        export: Regex::new(r"^(?:/v[0-9][^/]*)?/containers/([^/]+)/export$")
            .expect("static regex"),
        commit: Regex::new(r"^(?:/v[0-9][^/]*)?/commit$").expect("static regex"),
    })
}

pub fn classify(method: &Method, uri: &Uri) -> Action {
    let path = uri.path();
    let p = patterns();
    match *method {
        Method::POST => {
            if p.create.is_match(path) {
                return Action::PatchEnvDuring;
            }
            if let Some(caps) = p.lifecycle.captures(path) {
                return Action::PatchBefore {
                    id: caps[1].to_string(),
                };
            }
            if p.commit.is_match(path) {
                if let Some(id) = query_param(uri, "container") {
                    return Action::UnpatchAndUnpatchEnvDuring { id };
                }
            }
            Action::None
        }
        Method::GET => {
            if let Some(caps) = p.export.captures(path) {
                return Action::UnpatchDuring {
                    id: caps[1].to_string(),
                };
            }
            Action::None
        }
        _ => Action::None,
    }
}

pub fn query_param(uri: &Uri, key: &str) -> Option<String> {
    uri.query()?.split('&').find_map(|kv| {
        let (k, v) = kv.split_once('=')?;
        (k == key && !v.is_empty()).then(|| v.to_string())
    })
}
