//! The append-only record of every request the proxy observed.

use serde::{Deserialize, Serialize};

use crate::meta::RequestMeta;

/// One observed request. Schemeless requests log as `http`; hosts keep
/// their port only when it is not the scheme's well-known one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkActivity {
    pub method: String,
    pub scheme: String,
    pub host: String,
    pub path: String,
}

impl From<&RequestMeta> for NetworkActivity {
    fn from(meta: &RequestMeta) -> Self {
        NetworkActivity {
            method: meta.method.clone(),
            scheme: if meta.scheme.is_empty() {
                "http".to_string()
            } else {
                meta.scheme.clone()
            },
            host: meta.log_host(),
            path: meta.path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_normalize_in_the_logged_host() {
        let meta = RequestMeta {
            method: "GET".into(),
            scheme: "http".into(),
            host: "registry.local".into(),
            port: Some(8081),
            path: "/index".into(),
        };
        let a = NetworkActivity::from(&meta);
        assert_eq!(a.host, "registry.local:8081");

        let std_port = RequestMeta { port: Some(80), ..meta };
        assert_eq!(NetworkActivity::from(&std_port).host, "registry.local");
    }

    #[test]
    fn empty_scheme_logs_as_http() {
        let meta = RequestMeta {
            method: "GET".into(),
            scheme: String::new(),
            host: "h".into(),
            port: None,
            path: "/".into(),
        };
        assert_eq!(NetworkActivity::from(&meta).scheme, "http");
    }
}
