//! The admin endpoint: certificate download, activity summary, and live
//! policy inspection/replacement.

use std::sync::Arc;

use hyper::{Body, Method, Request, Response, StatusCode};
use tracing::info;

use crate::engine::ProxyCore;
use crate::policy::Policy;

pub(crate) async fn handle(core: Arc<ProxyCore>, req: Request<Body>) -> Response<Body> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/cert") => cert(&core, req.uri().query()),
        (&Method::GET, "/summary") => summary(&core),
        (&Method::GET, "/policy") => policy(&core),
        (&Method::PUT, "/policy") => put_policy(core, req).await,
        (_, "/cert" | "/summary" | "/policy") => status(StatusCode::METHOD_NOT_ALLOWED, ""),
        _ => status(StatusCode::NOT_FOUND, ""),
    }
}

/// `GET /cert` — the CA certificate, PEM by default, JKS on
/// `?format=jks`.
fn cert(core: &ProxyCore, query: Option<&str>) -> Response<Body> {
    let wants_jks = query
        .map(|q| q.split('&').any(|kv| kv == "format=jks"))
        .unwrap_or(false);
    let result = if wants_jks {
        core.ca.to_jks().map(|b| (b, "application/x-java-keystore"))
    } else {
        core.ca.to_pem().map(|b| (b, "application/x-pem-file"))
    };
    match result {
        Ok((bytes, content_type)) => Response::builder()
            .header(hyper::header::CONTENT_TYPE, content_type)
            .body(Body::from(bytes))
            .unwrap_or_default(),
        Err(e) => status(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("certificate serialization failed: {e}"),
        ),
    }
}

/// `GET /summary` — the activity log as two-space-indented JSON.
fn summary(core: &ProxyCore) -> Response<Body> {
    let log = core.state().log.clone();
    json_response(&log)
}

/// `GET /policy` — the live policy as JSON.
fn policy(core: &ProxyCore) -> Response<Body> {
    let policy = core.state().policy.clone();
    json_response(&policy)
}

/// `PUT /policy` — atomically replaces the policy. A malformed document or
/// wrong content type leaves the previous policy in place and yields 400.
async fn put_policy(core: Arc<ProxyCore>, req: Request<Body>) -> Response<Body> {
    let is_json = req
        .headers()
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "application/json");
    if !is_json {
        return status(
            StatusCode::BAD_REQUEST,
            "policy updates must be Content-Type: application/json",
        );
    }
    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(b) => b,
        Err(e) => return status(StatusCode::BAD_REQUEST, &format!("unreadable body: {e}")),
    };
    match Policy::from_json(&body) {
        Ok(new_policy) => {
            core.state().policy = new_policy;
            info!("network policy replaced via admin endpoint");
            status(StatusCode::OK, "")
        }
        Err(e) => status(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

fn json_response<T: serde::Serialize>(value: &T) -> Response<Body> {
    match serde_json::to_string_pretty(value) {
        Ok(json) => Response::builder()
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(Body::from(json))
            .unwrap_or_default(),
        Err(e) => status(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("serialization failed: {e}"),
        ),
    }
}

fn status(code: StatusCode, message: &str) -> Response<Body> {
    Response::builder()
        .status(code)
        .body(Body::from(message.to_string()))
        .unwrap_or_default()
}
