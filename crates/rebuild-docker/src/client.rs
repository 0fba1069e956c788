//! A thin Docker HTTP client over the daemon's Unix socket.

use std::path::PathBuf;

use hyper::{Body, Client, Method, Request, Response, StatusCode};
use hyperlocal::{UnixClientExt, UnixConnector};

use crate::error::DockerError;

#[derive(Clone)]
pub struct DockerClient {
    socket: PathBuf,
    client: Client<UnixConnector, Body>,
}

impl DockerClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        DockerClient {
            socket: socket.into(),
            client: Client::unix(),
        }
    }

    fn uri(&self, path_and_query: &str) -> hyper::Uri {
        hyperlocal::Uri::new(&self.socket, path_and_query).into()
    }

    /// Re-targets a proxied request onto the daemon socket, keeping its
    /// method, headers, and body.
    pub async fn forward(&self, mut req: Request<Body>) -> Result<Response<Body>, DockerError> {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        *req.uri_mut() = self.uri(&path_and_query);
        Ok(self.client.request(req).await?)
    }

    pub async fn request(
        &self,
        method: Method,
        path_and_query: &str,
        body: Body,
    ) -> Result<Response<Body>, DockerError> {
        let req = Request::builder()
            .method(method)
            .uri(self.uri(path_and_query))
            .body(body)
            .map_err(|e| DockerError::Upstream(e.to_string()))?;
        Ok(self.client.request(req).await?)
    }

    /// GET returning the status and, on success, the parsed JSON body.
    pub async fn get_json(
        &self,
        path_and_query: &str,
    ) -> Result<(StatusCode, Option<serde_json::Value>), DockerError> {
        let resp = self.request(Method::GET, path_and_query, Body::empty()).await?;
        let status = resp.status();
        if !status.is_success() {
            return Ok((status, None));
        }
        let bytes = hyper::body::to_bytes(resp.into_body()).await?;
        Ok((status, Some(serde_json::from_slice(&bytes)?)))
    }

    /// POST with a JSON body, returning the status and parsed response.
    pub async fn post_json(
        &self,
        path_and_query: &str,
        body: &serde_json::Value,
    ) -> Result<(StatusCode, Option<serde_json::Value>), DockerError> {
        let req = Request::builder()
            .method(Method::POST)
            .uri(self.uri(path_and_query))
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(body)?))
            .map_err(|e| DockerError::Upstream(e.to_string()))?;
        let resp = self.client.request(req).await?;
        let status = resp.status();
        let bytes = hyper::body::to_bytes(resp.into_body()).await?;
        let value = if bytes.is_empty() {
            None
        } else {
            serde_json::from_slice(&bytes).ok()
        };
        Ok((status, value))
    }
}
