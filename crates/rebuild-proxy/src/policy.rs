//! Network egress policy: rule lists evaluated per request.
//!
//! The rule language is closed-world — `URLMatchRule` is the only rule type
//! — and loading rejects unknown or missing `ruleType` tags so a typo can
//! never silently fail open. With no rules at all the policy fails closed.

use hyper::{Body, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::meta::RequestMeta;

/// Whether the proxy consults the policy at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Every request passes through unchecked.
    Disabled,
    /// Every request is checked; denials short-circuit with 403.
    #[default]
    Enforce,
}

impl std::str::FromStr for PolicyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(PolicyMode::Disabled),
            "enforce" => Ok(PolicyMode::Enforce),
            other => Err(format!("unknown policy mode {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostMatch {
    #[default]
    Full,
    Suffix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathMatch {
    #[default]
    Full,
    Prefix,
}

/// Allows requests by hostname and path match. An empty `host` with
/// `full` matches only empty hostnames; an empty `host` with `suffix`
/// matches every hostname.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlMatchRule {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub host_match: HostMatch,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub path_match: PathMatch,
}

impl UrlMatchRule {
    fn allows(&self, meta: &RequestMeta) -> bool {
        let host_ok = match self.host_match {
            HostMatch::Full => meta.host == self.host,
            HostMatch::Suffix => meta.host.ends_with(&self.host),
        };
        let path_ok = match self.path_match {
            PathMatch::Full => meta.path == self.path,
            PathMatch::Prefix => meta.path.starts_with(&self.path),
        };
        host_ok && path_ok
    }
}

/// A policy rule, tagged by `ruleType` on the wire. Deserialization of an
/// unknown or missing tag fails, which is the load-time rejection the
/// policy error taxonomy requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "ruleType")]
pub enum Rule {
    #[serde(rename = "URLMatchRule")]
    UrlMatch(UrlMatchRule),
}

impl Rule {
    fn allows(&self, meta: &RequestMeta) -> bool {
        match self {
            Rule::UrlMatch(rule) => rule.allows(meta),
        }
    }
}

/// The egress policy: a request is allowed when `allOf` (if non-empty) is
/// unanimous, otherwise when any `anyOf` rule allows. Empty policy denies.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default)]
    pub any_of: Vec<Rule>,
    #[serde(default)]
    pub all_of: Vec<Rule>,
}

impl Policy {
    /// Parses a policy document, surfacing serde's message for unknown or
    /// missing `ruleType` and malformed JSON alike.
    pub fn from_json(data: &[u8]) -> Result<Self, crate::ProxyError> {
        serde_json::from_slice(data)
            .map_err(|e| crate::ProxyError::PolicyConfig(e.to_string()))
    }

    fn decide(&self, meta: &RequestMeta) -> bool {
        if self.all_of.is_empty() && self.any_of.is_empty() {
            return false; // fail closed
        }
        if !self.all_of.is_empty() {
            // allOf takes precedence over anyOf.
            return self.all_of.iter().all(|r| r.allows(meta));
        }
        self.any_of.iter().any(|r| r.allows(meta))
    }

    /// `None` means allow; a synthesized 403 means deny and short-circuit.
    pub fn apply(&self, meta: &RequestMeta) -> Option<Response<Body>> {
        if self.decide(meta) {
            return None;
        }
        let body = format!(
            "Access to {} is blocked by the proxy's network policy",
            meta.url()
        );
        Some(
            Response::builder()
                .status(StatusCode::FORBIDDEN)
                .header(hyper::header::CONTENT_TYPE, "text/plain")
                .body(Body::from(body))
                .unwrap_or_default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(scheme: &str, host: &str, path: &str) -> RequestMeta {
        RequestMeta {
            method: "GET".into(),
            scheme: scheme.into(),
            host: host.into(),
            port: None,
            path: path.into(),
        }
    }

    fn url_rule(host: &str, hm: HostMatch, path: &str, pm: PathMatch) -> Rule {
        Rule::UrlMatch(UrlMatchRule {
            host: host.into(),
            host_match: hm,
            path: path.into(),
            path_match: pm,
        })
    }

    #[test]
    fn empty_policy_fails_closed() {
        let p = Policy::default();
        assert!(p.apply(&meta("https", "example.com", "/")).is_some());
    }

    #[test]
    fn any_of_allows_prefix_paths() {
        let p = Policy {
            any_of: vec![url_rule(
                "host.com",
                HostMatch::Full,
                "/path",
                PathMatch::Prefix,
            )],
            all_of: vec![],
        };
        assert!(p.apply(&meta("https", "host.com", "/path/with/suffix")).is_none());
        let denied = p.apply(&meta("https", "host.com", "/other")).unwrap();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn denial_body_names_the_url() {
        let p = Policy::default();
        let resp = p.apply(&meta("https", "host.com", "/other")).unwrap();
        let body = futures_body(resp);
        assert_eq!(
            body,
            "Access to https://host.com/other is blocked by the proxy's network policy"
        );
    }

    fn futures_body(resp: Response<Body>) -> String {
        let bytes = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(hyper::body::to_bytes(resp.into_body()))
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn all_of_takes_precedence_over_any_of() {
        let allow_everything = url_rule("", HostMatch::Suffix, "", PathMatch::Prefix);
        let deny_other = url_rule("host.com", HostMatch::Full, "/path", PathMatch::Full);
        let p = Policy {
            any_of: vec![allow_everything],
            all_of: vec![deny_other],
        };
        // anyOf would allow, but allOf does not match this path.
        assert!(p.apply(&meta("https", "host.com", "/other")).is_some());
        assert!(p.apply(&meta("https", "host.com", "/path")).is_none());
    }

    #[test]
    fn suffix_match_includes_tld_only_suffixes() {
        let p = Policy {
            any_of: vec![url_rule(".com", HostMatch::Suffix, "", PathMatch::Prefix)],
            all_of: vec![],
        };
        assert!(p.apply(&meta("https", "anything.com", "/x")).is_none());
        assert!(p.apply(&meta("https", "anything.org", "/x")).is_some());
    }

    #[test]
    fn empty_host_full_matches_only_empty_hostnames() {
        let p = Policy {
            any_of: vec![url_rule("", HostMatch::Full, "", PathMatch::Prefix)],
            all_of: vec![],
        };
        assert!(p.apply(&meta("http", "", "/x")).is_none());
        assert!(p.apply(&meta("http", "h", "/x")).is_some());
    }

    #[test]
    fn policy_json_round_trips() {
        let json = r#"{"anyOf":[{"ruleType":"URLMatchRule","host":"host.com","hostMatch":"full","path":"/path","pathMatch":"prefix"}],"allOf":[]}"#;
        let p = Policy::from_json(json.as_bytes()).unwrap();
        assert_eq!(p.any_of.len(), 1);
        let back = serde_json::to_string(&p).unwrap();
        assert_eq!(Policy::from_json(back.as_bytes()).unwrap(), p);
    }

    #[test]
    fn unknown_or_missing_rule_type_is_rejected() {
        assert!(Policy::from_json(br#"{"anyOf":[{"ruleType":"Nope","host":"h"}]}"#).is_err());
        assert!(Policy::from_json(br#"{"anyOf":[{"host":"h"}]}"#).is_err());
        assert!(Policy::from_json(b"{not json").is_err());
    }
}
