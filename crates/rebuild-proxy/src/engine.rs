//! The transparent proxy engine: three listeners (plain HTTP proxy,
//! transparent TLS, admin) sharing one policy, one activity log, and one
//! CA.
//!
//! Each listener runs an accept loop task; each accepted connection runs
//! its own task, tracked so shutdown can wait for in-flight work. The TLS
//! path peeks the ClientHello without consuming it, synthesizes the
//! internal `host:<tls_port>` MITM authority, and serves decrypted HTTP
//! with a leaf certificate minted by the shared CA. Environment proxy
//! settings are deliberately never consulted, and upstream TLS verifies
//! normally.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use hyper::client::HttpConnector;
use hyper::server::conn::Http;
use hyper::service::service_fn;
use hyper::{Body, Client, Method, Request, Response, StatusCode};
use hyper_openssl::HttpsConnector;
use openssl::ssl::{Ssl, SslConnector, SslContext, SslMethod};
use regex::Regex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_openssl::SslStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use rebuild_ca::Ca;

use crate::error::ProxyError;
use crate::meta::RequestMeta;
use crate::netlog::NetworkActivity;
use crate::peek;
use crate::policy::{Policy, PolicyMode};

/// Bound on queued, not-yet-appended activity records.
const LOG_CHANNEL_CAPACITY: usize = 10;
/// Upstream connect (TLS handshake included) timeout.
const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Idle upstream connections are dropped from the pool after this long.
const UPSTREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Listener addresses and initial policy for a proxy instance.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub http_addr: SocketAddr,
    pub tls_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub mode: PolicyMode,
    pub policy: Policy,
}

/// Policy and activity log live under one mutex: the admin endpoint reads
/// and replaces the policy while request tasks consult it and append log
/// entries.
pub(crate) struct SharedState {
    pub policy: Policy,
    pub log: Vec<NetworkActivity>,
}

pub(crate) struct ProxyCore {
    pub ca: Arc<Ca>,
    pub tls_port: u16,
    pub mode: PolicyMode,
    state: Mutex<SharedState>,
    log_tx: mpsc::Sender<NetworkActivity>,
    client: Client<HttpsConnector<HttpConnector>, Body>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    /// `host` or `host:80`: treat the decrypted stream as plain HTTP.
    http_mitm: Regex,
    /// `host:<tls_port>`: terminate TLS before serving.
    tls_mitm: Regex,
}

impl ProxyCore {
    pub(crate) fn state(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock().expect("proxy state mutex poisoned")
    }
}

/// A running proxy. Dropping it does not stop the listeners; call
/// [`Proxy::shutdown`].
pub struct Proxy {
    core: Arc<ProxyCore>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    pub http_addr: SocketAddr,
    pub tls_addr: SocketAddr,
    pub admin_addr: SocketAddr,
}

impl Proxy {
    /// Binds the three listeners and starts serving.
    pub async fn start(ca: Arc<Ca>, config: ProxyConfig) -> Result<Proxy, ProxyError> {
        let http_listener = TcpListener::bind(config.http_addr).await?;
        let tls_listener = TcpListener::bind(config.tls_addr).await?;
        let admin_listener = TcpListener::bind(config.admin_addr).await?;
        let http_addr = http_listener.local_addr()?;
        let tls_addr = tls_listener.local_addr()?;
        let admin_addr = admin_listener.local_addr()?;

        let mut connector = HttpConnector::new();
        connector.enforce_http(false);
        connector.set_connect_timeout(Some(UPSTREAM_CONNECT_TIMEOUT));
        let tls = SslConnector::builder(SslMethod::tls())?;
        let https = HttpsConnector::with_connector(connector, tls)?;
        let client = Client::builder()
            .pool_idle_timeout(UPSTREAM_IDLE_TIMEOUT)
            .build::<_, Body>(https);

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let (log_tx, mut log_rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);

        let core = Arc::new(ProxyCore {
            ca,
            tls_port: tls_addr.port(),
            mode: config.mode,
            state: Mutex::new(SharedState {
                policy: config.policy,
                log: Vec::new(),
            }),
            log_tx,
            client,
            tracker: tracker.clone(),
            cancel: cancel.clone(),
            http_mitm: Regex::new("^[^:]*(:80)?$").expect("static regex"),
            tls_mitm: Regex::new(&format!("^.*:{}$", tls_addr.port())).expect("static regex"),
        });

        // Single writer task serializes log appends under the shared mutex.
        let log_core = core.clone();
        let log_cancel = cancel.clone();
        tracker.spawn(async move {
            loop {
                tokio::select! {
                    _ = log_cancel.cancelled() => break,
                    activity = log_rx.recv() => match activity {
                        Some(a) => log_core.state().log.push(a),
                        None => break,
                    },
                }
            }
            while let Ok(a) = log_rx.try_recv() {
                log_core.state().log.push(a);
            }
        });

        spawn_listener(&tracker, &cancel, http_listener, "http", {
            let core = core.clone();
            move |stream| serve_plain(core.clone(), stream)
        });
        spawn_listener(&tracker, &cancel, tls_listener, "tls", {
            let core = core.clone();
            move |stream| serve_tls(core.clone(), stream)
        });
        spawn_listener(&tracker, &cancel, admin_listener, "admin", {
            let core = core.clone();
            move |stream| serve_admin(core.clone(), stream)
        });

        info!(%http_addr, %tls_addr, %admin_addr, "proxy listening");
        Ok(Proxy {
            core,
            cancel,
            tracker,
            http_addr,
            tls_addr,
            admin_addr,
        })
    }

    /// PEM serialization of the intercepting CA, for container trust.
    pub fn ca_pem(&self) -> Result<Vec<u8>, ProxyError> {
        Ok(self.core.ca.to_pem()?)
    }

    /// A snapshot of the activity log.
    pub fn activity(&self) -> Vec<NetworkActivity> {
        self.core.state().log.clone()
    }

    /// Stops accepting on all listeners, then waits for in-flight
    /// connections to finish or the deadline to expire, whichever first.
    pub async fn shutdown(self, deadline: Duration) -> Result<(), ProxyError> {
        self.cancel.cancel();
        self.tracker.close();
        tokio::time::timeout(deadline, self.tracker.wait())
            .await
            .map_err(|_| {
                ProxyError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "proxy shutdown deadline exceeded",
                ))
            })
    }
}

/// Accept loop: one task per listener, one tracked task per connection.
/// Cancellation ends the loop cleanly, which is the closed-listener path.
fn spawn_listener<F, Fut>(
    tracker: &TaskTracker,
    cancel: &CancellationToken,
    listener: TcpListener,
    name: &'static str,
    handle: F,
) where
    F: Fn(TcpStream) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let conn_tracker = tracker.clone();
    let cancel = cancel.clone();
    tracker.spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(listener = name, %peer, "accepted connection");
                        let handle = handle.clone();
                        conn_tracker.spawn(async move { handle(stream).await });
                    }
                    Err(e) => warn!(listener = name, error = %e, "accept failed"),
                },
            }
        }
    });
}

/// Serves one HTTP connection, honoring cancellation with a graceful
/// connection shutdown.
async fn serve_conn<S>(core: Arc<ProxyCore>, stream: S, service_scheme: ServiceKind)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let cancel = core.cancel.clone();
    let service = {
        let core = core.clone();
        service_fn(move |req| {
            let core = core.clone();
            let kind = service_scheme.clone();
            async move { Ok::<_, Infallible>(dispatch(core, kind, req).await) }
        })
    };
    let conn = Http::new().serve_connection(stream, service).with_upgrades();
    tokio::pin!(conn);
    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!(error = %e, "connection ended with error");
            }
        }
        _ = cancel.cancelled() => {
            conn.as_mut().graceful_shutdown();
            let _ = conn.await;
        }
    }
}

/// What kind of connection a request arrived on.
#[derive(Debug, Clone)]
enum ServiceKind {
    /// The plain proxy endpoint: absolute-form or transparent requests.
    Plain,
    /// Decrypted MITM traffic for this host.
    Mitm(String),
    /// The admin endpoint.
    Admin,
}

async fn dispatch(core: Arc<ProxyCore>, kind: ServiceKind, req: Request<Body>) -> Response<Body> {
    match kind {
        ServiceKind::Admin => crate::admin::handle(core, req).await,
        ServiceKind::Mitm(host) => {
            let mut meta = RequestMeta::from_request(&req, "https", &host);
            // The client was redirected to the TLS port; upstream is 443.
            if meta.port == Some(core.tls_port) {
                meta.port = None;
            }
            process(core, meta, req).await
        }
        ServiceKind::Plain => {
            if req.method() == Method::CONNECT {
                return handle_connect(core, req);
            }
            // Requests without a scheme are rewritten to http://<Host>/...
            let meta = RequestMeta::from_request(&req, "http", "");
            process(core, meta, req).await
        }
    }
}

async fn serve_plain(core: Arc<ProxyCore>, stream: TcpStream) {
    serve_conn(core, stream, ServiceKind::Plain).await;
}

async fn serve_admin(core: Arc<ProxyCore>, stream: TcpStream) {
    serve_conn(core, stream, ServiceKind::Admin).await;
}

/// The transparent TLS endpoint: peek the ClientHello, then dispatch the
/// synthesized `CONNECT host:<tls_port>` authority through the same MITM
/// selection the proxy applies everywhere. No CONNECT response is written
/// back — the client only ever sees TLS.
async fn serve_tls(core: Arc<ProxyCore>, stream: TcpStream) {
    let (host, replay) = match peek::peek_client_hello(stream).await {
        Ok(peeked) => peeked,
        Err(e) => {
            debug!(error = %e, "closing tls connection");
            return;
        }
    };
    let authority = format!("{host}:{}", core.tls_port);
    if let Err(e) = mitm_authority(core, &authority, replay).await {
        debug!(error = %e, "tls mitm failed");
    }
}

/// Explicit CONNECT on the plain endpoint: answer 200, then MITM the
/// tunneled bytes exactly as the transparent path would.
fn handle_connect(core: Arc<ProxyCore>, req: Request<Body>) -> Response<Body> {
    let Some(authority) = req.uri().authority().map(|a| a.to_string()) else {
        return Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .body(Body::from("CONNECT requires an authority"))
            .unwrap_or_default();
    };
    let tunnel_core = core.clone();
    core.tracker.spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                if let Err(e) = mitm_authority(tunnel_core, &authority, upgraded).await {
                    debug!(error = %e, authority, "tunnel mitm failed");
                }
            }
            Err(e) => debug!(error = %e, "connect upgrade failed"),
        }
    });
    Response::new(Body::empty())
}

/// MITM selection: `host`/`host:80` speaks plain HTTP, `host:<tls_port>`
/// terminates TLS; anything else (a raw 443 CONNECT included) is treated
/// as TLS, which is the only other thing a build should be sending.
async fn mitm_authority<S>(
    core: Arc<ProxyCore>,
    authority: &str,
    stream: S,
) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let host = authority.split(':').next().unwrap_or(authority).to_string();
    if core.http_mitm.is_match(authority) {
        serve_conn(core, stream, ServiceKind::Plain).await;
        return Ok(());
    }
    if !core.tls_mitm.is_match(authority) {
        debug!(authority, "authority matches no MITM rule; assuming tls");
    }
    // When this stream is a fresh tunnel (not the transparent listener's
    // replay) the ClientHello has not been read yet; peeking is idempotent
    // either way because the wrapper replays what it consumed.
    let (sni, replay) = peek::peek_client_hello(stream).await?;
    let host = if sni.is_empty() { host } else { sni };
    tls_serve(core, host, replay).await
}

/// Terminates TLS with a CA-minted leaf for `host` and serves the
/// decrypted connection.
async fn tls_serve<S>(core: Arc<ProxyCore>, host: String, stream: S) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let leaf = core.ca.leaf_for_host(&host)?;
    let mut ctx = SslContext::builder(SslMethod::tls_server())?;
    ctx.set_certificate(&leaf.cert)?;
    ctx.set_private_key(&leaf.key)?;
    ctx.check_private_key()?;
    let ssl = Ssl::new(&ctx.build())?;
    let mut tls = SslStream::new(ssl, stream)?;
    Pin::new(&mut tls)
        .accept()
        .await
        .map_err(|e| ProxyError::Tls(e.to_string()))?;
    serve_conn(core, tls, ServiceKind::Mitm(host)).await;
    Ok(())
}

/// request → log → policy → upstream → response, strictly in that order.
async fn process(core: Arc<ProxyCore>, meta: RequestMeta, req: Request<Body>) -> Response<Body> {
    // Observation order is the order requests enter the policy check.
    if core.log_tx.send(NetworkActivity::from(&meta)).await.is_err() {
        debug!("activity log writer is gone");
    }
    if core.mode == PolicyMode::Enforce {
        let denial = core.state().policy.apply(&meta);
        if let Some(resp) = denial {
            debug!(url = meta.url(), "request denied by policy");
            return resp;
        }
    }
    forward(core, &meta, req).await
}

/// Rewrites the request to absolute form and forwards it upstream with
/// strict TLS. Hop-by-hop headers are stripped both ways.
async fn forward(
    core: Arc<ProxyCore>,
    meta: &RequestMeta,
    mut req: Request<Body>,
) -> Response<Body> {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let authority = if meta.standard_port() {
        meta.host.clone()
    } else {
        meta.log_host()
    };
    let target = format!("{}://{}{}", meta.scheme, authority, path_and_query);
    match target.parse::<hyper::Uri>() {
        Ok(uri) => *req.uri_mut() = uri,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("unroutable request target {target:?}: {e}"),
            )
        }
    }
    strip_hop_headers(req.headers_mut());
    match core.client.request(req).await {
        Ok(mut resp) => {
            strip_hop_headers(resp.headers_mut());
            resp
        }
        Err(e) => {
            warn!(url = meta.url(), error = %e, "upstream request failed");
            error_response(StatusCode::BAD_GATEWAY, format!("upstream request failed: {e}"))
        }
    }
}

fn strip_hop_headers(headers: &mut hyper::HeaderMap) {
    for name in [
        "connection",
        "proxy-connection",
        "keep-alive",
        "te",
        "trailer",
        "transfer-encoding",
        "upgrade",
    ] {
        headers.remove(name);
    }
}

fn error_response(status: StatusCode, body: String) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "text/plain")
        .body(Body::from(body))
        .unwrap_or_default()
}
