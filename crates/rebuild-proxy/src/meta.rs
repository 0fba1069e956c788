//! The request coordinates the policy and the activity log care about.

use hyper::http::uri::Scheme;
use hyper::{Body, Request};

/// Method, scheme, host, optional port, and path of one proxied request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMeta {
    pub method: String,
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
}

impl RequestMeta {
    /// Derives coordinates from a request, with `fallback_scheme` and
    /// `fallback_host` supplying what origin-form requests omit (the
    /// connection already knows whether it was decrypted, and for whom).
    pub fn from_request(
        req: &Request<Body>,
        fallback_scheme: &str,
        fallback_host: &str,
    ) -> RequestMeta {
        let scheme = req
            .uri()
            .scheme()
            .map(Scheme::to_string)
            .unwrap_or_else(|| fallback_scheme.to_string());
        let authority = req
            .uri()
            .authority()
            .map(|a| a.to_string())
            .or_else(|| {
                req.headers()
                    .get(hyper::header::HOST)
                    .and_then(|h| h.to_str().ok())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| fallback_host.to_string());
        let (host, port) = split_authority(&authority);
        RequestMeta {
            method: req.method().to_string(),
            scheme,
            host,
            port,
            path: req.uri().path().to_string(),
        }
    }

    /// True when the port is the well-known one for the scheme (or absent).
    pub fn standard_port(&self) -> bool {
        match (self.scheme.as_str(), self.port) {
            (_, None) => true,
            ("http", Some(80)) | ("https", Some(443)) => true,
            _ => false,
        }
    }

    /// Host for logging: non-standard ports stay, standard ports strip.
    pub fn log_host(&self) -> String {
        match self.port {
            Some(port) if !self.standard_port() => format!("{}:{port}", self.host),
            _ => self.host.clone(),
        }
    }

    /// The full URL, with the port shown only when non-standard.
    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.log_host(), self.path)
    }
}

fn split_authority(authority: &str) -> (String, Option<u16>) {
    match authority.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host.to_string(), Some(port)),
            Err(_) => (authority.to_string(), None),
        },
        None => (authority.to_string(), None),
    }
}
