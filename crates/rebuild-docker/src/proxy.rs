//! The Docker API proxy.
//!
//! Sits in front of the daemon socket, forwarding everything while
//! intercepting the handful of endpoints where container trust must be
//! injected (create/start) or scrubbed back out (export/commit), so that
//! the image a build produces is indistinguishable from an unproxied one.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hyper::body::HttpBody;
use hyper::server::conn::Http;
use hyper::service::service_fn;
use hyper::{Body, Request, Response, StatusCode};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use rebuild_archive::tar::TYPE_REG;
use rebuild_ca::Ca;

use crate::classify::{classify, Action};
use crate::client::DockerClient;
use crate::containerfs::{ContainerFile, ContainerFs};
use crate::error::DockerError;
use crate::patch::{fatal, truststore_for_os_release, Patch, PatchRegistry, KANIKO_TRUSTSTORE};

/// In-container path of the materialized CA certificate (PEM).
pub const CONTAINER_CERT: &str = "/var/cache/proxy.crt";
/// In-container path of the Java keystore serialization.
pub const CONTAINER_JKS: &str = "/var/cache/proxy.crt.jks";
/// In-container path of the recursive proxy socket.
pub const CONTAINER_SOCK: &str = "/var/cache/proxy.sock";

const JAVA_TOOL_OPTIONS: &str = "JAVA_TOOL_OPTIONS";
const JAVA_TRUSTSTORE_FLAG: &str = "-Djavax.net.ssl.trustStore=/var/cache/proxy.crt.jks";

/// Where the Docker proxy accepts client connections.
#[derive(Debug, Clone)]
pub enum DockerListen {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

/// Docker proxy configuration; see the `rebuild proxy` flags.
#[derive(Debug, Clone)]
pub struct DockerConfig {
    pub listen: DockerListen,
    /// The real daemon socket requests are forwarded to.
    pub docker_socket: PathBuf,
    /// Host path of the side-channel socket mounted into containers, when
    /// recursive proxying is enabled.
    pub recursive_proxy_socket: Option<PathBuf>,
    /// Extra `K=V` environment entries appended verbatim on create.
    pub env_vars: Vec<String>,
    /// Environment variable names set to the in-container CA path.
    pub truststore_env_vars: Vec<String>,
    pub java_truststore: bool,
    pub bazel_truststore: bool,
    /// Overrides `HostConfig.NetworkMode` on create when set.
    pub network_override: Option<String>,
}

struct DockerCore {
    config: DockerConfig,
    client: DockerClient,
    registry: PatchRegistry,
    /// Monotonic counter behind the `proxy-volN` overlay binds.
    volume_counter: AtomicU64,
    ca_pem: Vec<u8>,
    ca_jks: Vec<u8>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

/// A running Docker proxy. Call [`DockerProxy::shutdown`] to stop it.
pub struct DockerProxy {
    cancel: CancellationToken,
    tracker: TaskTracker,
    /// Bound TCP address, when listening on TCP.
    pub addr: Option<SocketAddr>,
}

impl DockerProxy {
    pub async fn start(ca: Arc<Ca>, config: DockerConfig) -> Result<DockerProxy, DockerError> {
        let ca_pem = ca
            .to_pem()
            .map_err(|e| DockerError::Upstream(format!("ca serialization failed: {e}")))?;
        let ca_jks = ca
            .to_jks()
            .map_err(|e| DockerError::Upstream(format!("ca serialization failed: {e}")))?;

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let core = Arc::new(DockerCore {
            client: DockerClient::new(&config.docker_socket),
            config: config.clone(),
            registry: PatchRegistry::new(),
            volume_counter: AtomicU64::new(0),
            ca_pem,
            ca_jks,
            tracker: tracker.clone(),
            cancel: cancel.clone(),
        });

        let mut addr = None;
        match &config.listen {
            DockerListen::Tcp(bind) => {
                let listener = TcpListener::bind(bind).await?;
                addr = Some(listener.local_addr()?);
                spawn_tcp_listener(&tracker, &cancel, listener, core.clone());
            }
            DockerListen::Unix(path) => {
                let _ = std::fs::remove_file(path);
                let listener = UnixListener::bind(path)?;
                spawn_unix_listener(&tracker, &cancel, listener, core.clone());
            }
        }
        if let Some(path) = &config.recursive_proxy_socket {
            let _ = std::fs::remove_file(path);
            let listener = UnixListener::bind(path)?;
            spawn_unix_listener(&tracker, &cancel, listener, core.clone());
        }

        info!(?addr, "docker proxy listening");
        Ok(DockerProxy {
            cancel,
            tracker,
            addr,
        })
    }

    pub async fn shutdown(self, deadline: Duration) -> Result<(), DockerError> {
        self.cancel.cancel();
        self.tracker.close();
        tokio::time::timeout(deadline, self.tracker.wait())
            .await
            .map_err(|_| {
                DockerError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "docker proxy shutdown deadline exceeded",
                ))
            })
    }
}

fn spawn_tcp_listener(
    tracker: &TaskTracker,
    cancel: &CancellationToken,
    listener: TcpListener,
    core: Arc<DockerCore>,
) {
    let conn_tracker = tracker.clone();
    let cancel = cancel.clone();
    tracker.spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let core = core.clone();
                        conn_tracker.spawn(async move { serve_conn(core, stream).await });
                    }
                    Err(e) => warn!(error = %e, "docker tcp accept failed"),
                },
            }
        }
    });
}

fn spawn_unix_listener(
    tracker: &TaskTracker,
    cancel: &CancellationToken,
    listener: UnixListener,
    core: Arc<DockerCore>,
) {
    let conn_tracker = tracker.clone();
    let cancel = cancel.clone();
    tracker.spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let core = core.clone();
                        conn_tracker.spawn(async move { serve_conn(core, stream).await });
                    }
                    Err(e) => warn!(error = %e, "docker unix accept failed"),
                },
            }
        }
    });
}

async fn serve_conn<S>(core: Arc<DockerCore>, stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let cancel = core.cancel.clone();
    let service = {
        let core = core.clone();
        service_fn(move |req| {
            let core = core.clone();
            async move { Ok::<_, Infallible>(handle(core, req).await) }
        })
    };
    let conn = Http::new().serve_connection(stream, service).with_upgrades();
    tokio::pin!(conn);
    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!(error = %e, "docker connection ended with error");
            }
        }
        _ = cancel.cancelled() => {
            conn.as_mut().graceful_shutdown();
            let _ = conn.await;
        }
    }
}

async fn handle(core: Arc<DockerCore>, req: Request<Body>) -> Response<Body> {
    let action = classify(req.method(), req.uri());
    debug!(method = %req.method(), uri = %req.uri(), ?action, "docker request");
    let result = match action {
        Action::PatchEnvDuring => create_flow(core, req).await,
        Action::PatchBefore { id } => patch_before_flow(core, id, req).await,
        Action::UnpatchDuring { id } => unpatch_flow(core, id, req, false).await,
        Action::UnpatchAndUnpatchEnvDuring { id } => unpatch_flow(core, id, req, true).await,
        Action::None => forward_flow(core, req).await,
    };
    let mut resp = result.unwrap_or_else(error_response);
    // Keep-alive is deliberately unsupported; the exception is 101, where
    // the upgraded byte stream owns the connection.
    if resp.status() != StatusCode::SWITCHING_PROTOCOLS {
        resp.headers_mut().insert(
            hyper::header::CONNECTION,
            hyper::header::HeaderValue::from_static("close"),
        );
    }
    resp
}

fn error_response(e: DockerError) -> Response<Body> {
    let status = match &e {
        DockerError::ContainerNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(error = %e, "docker proxy request failed");
    Response::builder()
        .status(status)
        .body(Body::from(e.to_string()))
        .unwrap_or_default()
}

/// Plain forwarding, with protocol-upgrade support: after a 101 the raw
/// byte pump runs until the *server* side closes; a client close alone
/// keeps draining the server.
async fn forward_flow(
    core: Arc<DockerCore>,
    mut req: Request<Body>,
) -> Result<Response<Body>, DockerError> {
    let wants_upgrade = req.headers().contains_key(hyper::header::UPGRADE);
    let client_upgrade = wants_upgrade.then(|| hyper::upgrade::on(&mut req));
    let mut resp = core.client.forward(req).await?;
    if resp.status() == StatusCode::SWITCHING_PROTOCOLS {
        if let Some(client_upgrade) = client_upgrade {
            let server_upgrade = hyper::upgrade::on(&mut resp);
            core.tracker.spawn(async move {
                let (client, server) = match tokio::join!(client_upgrade, server_upgrade) {
                    (Ok(c), Ok(s)) => (c, s),
                    (c, s) => {
                        debug!(client_err = c.is_err(), server_err = s.is_err(), "upgrade failed");
                        return;
                    }
                };
                let (mut client_read, mut client_write) = tokio::io::split(client);
                let (mut server_read, mut server_write) = tokio::io::split(server);
                let client_to_server = tokio::spawn(async move {
                    let _ = tokio::io::copy(&mut client_read, &mut server_write).await;
                });
                // Termination is dictated by the server side.
                let _ = tokio::io::copy(&mut server_read, &mut client_write).await;
                let _ = client_write.shutdown().await;
                client_to_server.abort();
            });
        }
    }
    Ok(resp)
}

/// `POST /containers/create`: decode the body, splice in the overlay
/// bind, environment, and network mutations, and forward.
async fn create_flow(
    core: Arc<DockerCore>,
    req: Request<Body>,
) -> Result<Response<Body>, DockerError> {
    let (mut parts, body) = req.into_parts();
    let bytes = hyper::body::to_bytes(body).await?;
    let body = match serde_json::from_slice::<Value>(&bytes) {
        Ok(mut value) => {
            mutate_create_body(&core.config, &core.volume_counter, &mut value);
            let encoded = serde_json::to_vec(&value)?;
            parts.headers.insert(
                hyper::header::CONTENT_LENGTH,
                hyper::header::HeaderValue::from(encoded.len()),
            );
            Body::from(encoded)
        }
        Err(e) => {
            warn!(error = %e, "create body is not JSON; forwarding unmodified");
            Body::from(bytes)
        }
    };
    core.client.forward(Request::from_parts(parts, body)).await
}

/// The `/containers/create` body mutations, in order: overlay bind,
/// verbatim env vars, trust-store env vars, `JAVA_TOOL_OPTIONS`, the
/// recursive-proxy socket, and the network override.
fn mutate_create_body(config: &DockerConfig, counter: &AtomicU64, body: &mut Value) {
    let volume = counter.fetch_add(1, Ordering::SeqCst) + 1;

    // Overlay trick: files the proxy writes under /var/cache land in a
    // volume, so they never appear in export or commit output.
    let mut binds = vec![format!("proxy-vol{volume}:/var/cache:rw")];
    if let Some(host_sock) = &config.recursive_proxy_socket {
        // The container-side path is fixed; the host side is wherever the
        // recursive listener was bound.
        binds.push(format!("{}:{CONTAINER_SOCK}:rw", host_sock.display()));
    }
    let host_config = ensure_object(body, "HostConfig");
    let bind_array = ensure_array(host_config, "Binds");
    for bind in binds {
        bind_array.push(json!(bind));
    }
    if let Some(network) = &config.network_override {
        host_config["NetworkMode"] = json!(network);
    }

    let env = ensure_array(body, "Env");
    for var in &config.env_vars {
        env.push(json!(var));
    }
    for key in &config.truststore_env_vars {
        env.push(json!(format!("{key}={CONTAINER_CERT}")));
    }
    if config.recursive_proxy_socket.is_some() {
        env.push(json!(format!("DOCKER_HOST=unix://{CONTAINER_SOCK}")));
    }
    if config.java_truststore {
        splice_java_tool_options(env);
    }
}

/// Concatenates the truststore flag onto any existing `JAVA_TOOL_OPTIONS`,
/// trimming one pair of matching enclosing quotes first.
fn splice_java_tool_options(env: &mut Vec<Value>) {
    let prefix = format!("{JAVA_TOOL_OPTIONS}=");
    let existing = env.iter().position(|v| {
        v.as_str().is_some_and(|s| s.starts_with(&prefix))
    });
    let value = match existing {
        Some(i) => {
            let current = env[i].as_str().unwrap_or_default()[prefix.len()..].to_string();
            let trimmed = trim_matching_quotes(&current);
            if trimmed.is_empty() {
                JAVA_TRUSTSTORE_FLAG.to_string()
            } else {
                format!("{trimmed} {JAVA_TRUSTSTORE_FLAG}")
            }
        }
        None => JAVA_TRUSTSTORE_FLAG.to_string(),
    };
    let entry = json!(format!("{prefix}{value}"));
    match existing {
        Some(i) => env[i] = entry,
        None => env.push(entry),
    }
}

fn trim_matching_quotes(s: &str) -> &str {
    let b = s.as_bytes();
    if b.len() >= 2 && (b[0] == b'"' || b[0] == b'\'') && b[b.len() - 1] == b[0] {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn ensure_object<'a>(value: &'a mut Value, key: &str) -> &'a mut Value {
    if !value.is_object() {
        *value = json!({});
    }
    let obj = value.as_object_mut().expect("just ensured object");
    obj.entry(key.to_string()).or_insert_with(|| json!({}))
}

fn ensure_array<'a>(value: &'a mut Value, key: &str) -> &'a mut Vec<Value> {
    if !value.is_object() {
        *value = json!({});
    }
    let obj = value.as_object_mut().expect("just ensured object");
    let entry = obj.entry(key.to_string()).or_insert_with(|| json!([]));
    if !entry.is_array() {
        *entry = json!([]);
    }
    entry.as_array_mut().expect("just ensured array")
}

/// Inspects a container, mapping daemon 404s and other failures onto the
/// responses the client expects.
async fn inspect_container(core: &DockerCore, id: &str) -> Result<Value, DockerError> {
    let (status, value) = core
        .client
        .get_json(&format!("/containers/{id}/json"))
        .await?;
    if status == StatusCode::NOT_FOUND {
        return Err(DockerError::ContainerNotFound(id.to_string()));
    }
    if !status.is_success() {
        return Err(DockerError::Upstream(format!(
            "container inspect failed with {status}"
        )));
    }
    value.ok_or_else(|| DockerError::Upstream("container inspect returned no body".into()))
}

fn full_id(inspect: &Value) -> Result<String, DockerError> {
    inspect["Id"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| DockerError::Upstream("container inspect carries no Id".into()))
}

/// `start`/`restart`/`unpause`: materialize the CA files and patch the
/// distro trust store before the container (re)gains execution.
async fn patch_before_flow(
    core: Arc<DockerCore>,
    id: String,
    req: Request<Body>,
) -> Result<Response<Body>, DockerError> {
    let inspect = inspect_container(&core, &id).await?;
    let container = full_id(&inspect)?;
    let fs = ContainerFs::new(&core.client, &container);

    ensure_file(&fs, CONTAINER_CERT, core.ca_pem.clone()).await?;
    if core.config.java_truststore || core.config.bazel_truststore {
        ensure_file(&fs, CONTAINER_JKS, core.ca_jks.clone()).await?;
    }

    match detect_truststore(&fs).await? {
        None => {
            // Best-effort: an unknown distro is left unpatched but the
            // container still starts.
            warn!(container = %container, "unrecognized distro; trust store left unpatched");
        }
        Some(truststore) => {
            let set = core.registry.get(&container);
            let mut lease = set.lock().await;
            if lease.is_empty() {
                let before = fs.open_and_resolve(truststore).await?;
                let mut after = before.clone();
                after.contents.extend_from_slice(&core.ca_pem);
                fs.write_file(&after).await?;
                let path = before.path.clone();
                lease.push(Patch::new(path, before, after)?);
                info!(container = %container, truststore, "trust store patched");
            }
        }
    }
    core.client.forward(req).await
}

/// Creates a file only when the path does not exist yet; an existing file
/// is a conflict and is skipped silently.
async fn ensure_file(
    fs: &ContainerFs<'_>,
    path: &str,
    contents: Vec<u8>,
) -> Result<(), DockerError> {
    if fs.stat(path).await?.is_some() {
        return Ok(());
    }
    fs.write_file(&ContainerFile {
        path: path.to_string(),
        mode: 0o644,
        typeflag: TYPE_REG,
        contents,
    })
    .await
}

/// Finds the distro trust store: `/etc/os-release` `ID=` mapping first,
/// the `/kaniko` marker as fallback.
async fn detect_truststore(fs: &ContainerFs<'_>) -> Result<Option<&'static str>, DockerError> {
    if fs.stat("/etc/os-release").await?.is_some() {
        let os_release = fs.open_and_resolve("/etc/os-release").await?;
        let text = String::from_utf8_lossy(&os_release.contents).into_owned();
        if let Some(path) = truststore_for_os_release(&text) {
            return Ok(Some(path));
        }
    }
    if fs.stat("/kaniko").await?.is_some() {
        return Ok(Some(KANIKO_TRUSTSTORE));
    }
    Ok(None)
}

/// `export` and `commit`: restore every patched file to its pristine
/// bytes, stream the response, then re-apply. The patch lease is held for
/// the whole window so a concurrent start cannot interleave.
async fn unpatch_flow(
    core: Arc<DockerCore>,
    id: String,
    req: Request<Body>,
    scrub_env: bool,
) -> Result<Response<Body>, DockerError> {
    let inspect = inspect_container(&core, &id).await?;
    let container = full_id(&inspect)?;

    let req = if scrub_env {
        scrub_commit_request(&core, req, &container, &inspect).await?
    } else {
        req
    };

    let set = core.registry.get(&container);
    let lease = set.lock_owned().await;

    let fs = ContainerFs::new(&core.client, &container);
    for patch in lease.iter() {
        let current = fs.open_and_resolve(&patch.path).await?;
        if current.contents != patch.after.contents {
            fatal(&DockerError::PatchReconciliation(format!(
                "{} was modified out of band",
                patch.path
            )));
        }
        fs.write_file(&patch.before).await?;
    }

    let upstream = core.client.forward(req).await?;
    let (parts, mut upstream_body) = upstream.into_parts();
    let (mut tx, proxied_body) = Body::channel();
    let task_core = core.clone();
    core.tracker.spawn(async move {
        while let Some(chunk) = upstream_body.data().await {
            match chunk {
                Ok(data) => {
                    if tx.send_data(data).await.is_err() {
                        // Client went away; the container must still be
                        // restored to its patched state.
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "upstream body ended with error");
                    break;
                }
            }
        }
        drop(tx);
        reapply(task_core, container, lease).await;
    });
    Ok(Response::from_parts(parts, proxied_body))
}

/// Deferred re-application after export/commit has fully streamed. A
/// failure mid-way reverts the patches already re-applied; failing even
/// that is unrecoverable.
async fn reapply(core: Arc<DockerCore>, container: String, mut lease: OwnedMutexGuard<Vec<Patch>>) {
    let fs = ContainerFs::new(&core.client, &container);
    let mut failed_at = None;
    for i in 0..lease.len() {
        let after = lease[i].after.clone();
        if let Err(e) = fs.write_file(&after).await {
            warn!(container = %container, path = %after.path, error = %e,
                "patch re-application failed; reverting");
            failed_at = Some(i);
            break;
        }
    }
    let Some(stop) = failed_at else { return };
    for i in 0..stop {
        let before = lease[i].before.clone();
        if let Err(e) = fs.write_file(&before).await {
            fatal(&DockerError::PatchReconciliation(format!(
                "revert of {} failed after partial re-application: {e}",
                before.path
            )));
        }
    }
    // Patches are no longer applied; the record must agree.
    lease.clear();
}

/// Commit-specific environment scrubbing. A literal `null\n` body makes
/// Docker commit the container's own config, so a cleaned twin container
/// is synthesized and committed instead.
async fn scrub_commit_request(
    core: &Arc<DockerCore>,
    req: Request<Body>,
    container: &str,
    inspect: &Value,
) -> Result<Request<Body>, DockerError> {
    let (mut parts, body) = req.into_parts();
    let bytes = hyper::body::to_bytes(body).await?;

    if bytes.as_ref() == b"null\n" {
        let mut config = inspect["Config"].clone();
        if config.is_null() {
            return Err(DockerError::Upstream("container inspect carries no Config".into()));
        }
        scrub_env(&core.config, &mut config["Env"]);

        let (status, commit) = core
            .client
            .post_json(&format!("/commit?container={container}"), &config)
            .await?;
        let image = commit
            .as_ref()
            .and_then(|v| v["Id"].as_str())
            .filter(|_| status.is_success())
            .ok_or_else(|| {
                DockerError::Upstream(format!("temporary commit failed with {status}"))
            })?
            .to_string();

        let mut create = config.clone();
        create["Image"] = json!(image);
        let (status, created) = core.client.post_json("/containers/create", &create).await?;
        let twin = created
            .as_ref()
            .and_then(|v| v["Id"].as_str())
            .filter(|_| status.is_success())
            .ok_or_else(|| {
                DockerError::Upstream(format!("twin container create failed with {status}"))
            })?
            .to_string();

        parts.uri = replace_query_param(&parts.uri, "container", &twin)?;
        info!(original = container, twin = %twin, "commit retargeted to cleaned twin");
        return Ok(Request::from_parts(parts, Body::from("null\n")));
    }

    let mut value: Value = serde_json::from_slice(&bytes)?;
    scrub_env(&core.config, &mut value["Env"]);
    let encoded = serde_json::to_vec(&value)?;
    parts.headers.insert(
        hyper::header::CONTENT_LENGTH,
        hyper::header::HeaderValue::from(encoded.len()),
    );
    Ok(Request::from_parts(parts, Body::from(encoded)))
}

/// Removes every proxy-introduced variable: the trust-store vars,
/// `JAVA_TOOL_OPTIONS` when Java support injected it, `DOCKER_HOST` when
/// the recursive proxy did.
fn scrub_env(config: &DockerConfig, env: &mut Value) {
    let Some(array) = env.as_array_mut() else { return };
    let mut keys: Vec<&str> = config.truststore_env_vars.iter().map(String::as_str).collect();
    if config.java_truststore {
        keys.push(JAVA_TOOL_OPTIONS);
    }
    if config.recursive_proxy_socket.is_some() {
        keys.push("DOCKER_HOST");
    }
    array.retain(|entry| {
        entry.as_str().map_or(true, |s| {
            let key = s.split('=').next().unwrap_or(s);
            !keys.contains(&key)
        })
    });
}

fn replace_query_param(
    uri: &hyper::Uri,
    key: &str,
    value: &str,
) -> Result<hyper::Uri, DockerError> {
    let query = uri.query().unwrap_or_default();
    let rewritten: Vec<String> = query
        .split('&')
        .filter(|kv| !kv.is_empty())
        .map(|kv| {
            if kv.split('=').next() == Some(key) {
                format!("{key}={value}")
            } else {
                kv.to_string()
            }
        })
        .collect();
    format!("{}?{}", uri.path(), rewritten.join("&"))
        .parse()
        .map_err(|e| DockerError::Upstream(format!("unbuildable commit uri: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DockerConfig {
        DockerConfig {
            listen: DockerListen::Tcp("127.0.0.1:0".parse().unwrap()),
            docker_socket: "/var/run/docker.sock".into(),
            recursive_proxy_socket: None,
            env_vars: vec![],
            truststore_env_vars: vec![],
            java_truststore: false,
            bazel_truststore: false,
            network_override: None,
        }
    }

    #[test]
    fn create_body_gains_bind_and_env() {
        let cfg = DockerConfig {
            env_vars: vec!["FOO=1".into()],
            truststore_env_vars: vec!["SSL_CERT_FILE".into()],
            ..config()
        };
        let counter = AtomicU64::new(0);
        let mut body = json!({"HostConfig": {}});
        mutate_create_body(&cfg, &counter, &mut body);
        assert_eq!(
            body["HostConfig"]["Binds"],
            json!(["proxy-vol1:/var/cache:rw"])
        );
        assert_eq!(
            body["Env"],
            json!(["FOO=1", "SSL_CERT_FILE=/var/cache/proxy.crt"])
        );
    }

    #[test]
    fn volume_counter_is_monotonic() {
        let cfg = config();
        let counter = AtomicU64::new(0);
        let mut first = json!({});
        let mut second = json!({});
        mutate_create_body(&cfg, &counter, &mut first);
        mutate_create_body(&cfg, &counter, &mut second);
        assert_eq!(first["HostConfig"]["Binds"], json!(["proxy-vol1:/var/cache:rw"]));
        assert_eq!(second["HostConfig"]["Binds"], json!(["proxy-vol2:/var/cache:rw"]));
    }

    #[test]
    fn java_tool_options_concatenates_and_trims_quotes() {
        let cfg = DockerConfig {
            java_truststore: true,
            ..config()
        };
        let counter = AtomicU64::new(0);
        let mut body = json!({"Env": ["JAVA_TOOL_OPTIONS=\"-Xmx1g\""]});
        mutate_create_body(&cfg, &counter, &mut body);
        assert_eq!(
            body["Env"],
            json!([format!("JAVA_TOOL_OPTIONS=-Xmx1g {JAVA_TRUSTSTORE_FLAG}")])
        );

        let mut fresh = json!({});
        mutate_create_body(&cfg, &counter, &mut fresh);
        assert_eq!(
            fresh["Env"],
            json!([format!("JAVA_TOOL_OPTIONS={JAVA_TRUSTSTORE_FLAG}")])
        );
    }

    #[test]
    fn mismatched_quotes_are_left_alone() {
        assert_eq!(trim_matching_quotes("\"-Xmx1g\""), "-Xmx1g");
        assert_eq!(trim_matching_quotes("'-Xmx1g'"), "-Xmx1g");
        assert_eq!(trim_matching_quotes("\"-Xmx1g'"), "\"-Xmx1g'");
        assert_eq!(trim_matching_quotes("-Xmx1g"), "-Xmx1g");
        assert_eq!(trim_matching_quotes("\""), "\"");
    }

    #[test]
    fn recursive_proxy_adds_socket_bind_and_docker_host() {
        let cfg = DockerConfig {
            recursive_proxy_socket: Some("/tmp/rebuild-proxy.sock".into()),
            ..config()
        };
        let counter = AtomicU64::new(0);
        let mut body = json!({});
        mutate_create_body(&cfg, &counter, &mut body);
        assert_eq!(
            body["HostConfig"]["Binds"],
            json!([
                "proxy-vol1:/var/cache:rw",
                "/tmp/rebuild-proxy.sock:/var/cache/proxy.sock:rw"
            ])
        );
        assert_eq!(body["Env"], json!(["DOCKER_HOST=unix:///var/cache/proxy.sock"]));
    }

    #[test]
    fn network_override_sets_network_mode() {
        let cfg = DockerConfig {
            network_override: Some("none".into()),
            ..config()
        };
        let counter = AtomicU64::new(0);
        let mut body = json!({});
        mutate_create_body(&cfg, &counter, &mut body);
        assert_eq!(body["HostConfig"]["NetworkMode"], json!("none"));
    }

    #[test]
    fn scrub_env_strips_only_proxy_vars() {
        let cfg = DockerConfig {
            truststore_env_vars: vec!["SSL_CERT_FILE".into(), "NODE_EXTRA_CA_CERTS".into()],
            java_truststore: true,
            recursive_proxy_socket: Some("/tmp/s.sock".into()),
            ..config()
        };
        let mut env = json!([
            "PATH=/usr/bin",
            "SSL_CERT_FILE=/var/cache/proxy.crt",
            "NODE_EXTRA_CA_CERTS=/var/cache/proxy.crt",
            "JAVA_TOOL_OPTIONS=-Djavax.net.ssl.trustStore=/var/cache/proxy.crt.jks",
            "DOCKER_HOST=unix:///var/cache/proxy.sock",
            "FOO=1"
        ]);
        scrub_env(&cfg, &mut env);
        assert_eq!(env, json!(["PATH=/usr/bin", "FOO=1"]));
    }

    #[test]
    fn query_rewrite_replaces_only_the_container_param() {
        let uri: hyper::Uri = "/v1.41/commit?container=old&repo=r&tag=t".parse().unwrap();
        let out = replace_query_param(&uri, "container", "new").unwrap();
        assert_eq!(out.to_string(), "/v1.41/commit?container=new&repo=r&tag=t");
    }
}
