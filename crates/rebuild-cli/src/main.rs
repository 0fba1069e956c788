//! The `rebuild` binary: run the transparent build proxy alongside a
//! containerized build, rewrite archives into their canonical form, or
//! compare two archives by content.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

use rebuild_archive::Format;
use rebuild_ca::Ca;
use rebuild_docker::{DockerConfig, DockerListen, DockerProxy};
use rebuild_proxy::{Policy, PolicyMode, Proxy, ProxyConfig};
use rebuild_stabilize::{custom, default_stabilizers, stabilize, ContentSummary};

/// How long shutdown waits for in-flight work after SIGINT/SIGTERM.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "rebuild", version)]
#[command(about = "Reproduce and compare software package builds")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the transparent HTTP/HTTPS (and optionally Docker) build proxy.
    Proxy(ProxyArgs),
    /// Rewrite an archive so volatile metadata no longer shows in its bytes.
    Stabilize(StabilizeArgs),
    /// Stabilized-content comparison of two archives.
    Diff(DiffArgs),
}

#[derive(Args, Debug)]
struct ProxyArgs {
    /// Plain HTTP proxy listener.
    #[arg(long = "http_addr", default_value = "localhost:3128")]
    http_addr: String,

    /// Transparent TLS interception listener.
    #[arg(long = "tls_addr", default_value = "localhost:3129")]
    tls_addr: String,

    /// Admin endpoint (certificate download, summary, policy).
    #[arg(long = "ctrl_addr", default_value = "localhost:3127")]
    ctrl_addr: String,

    /// Docker proxy listener: `host:port` or `unix:///path`. The Docker
    /// proxy only runs when this is set.
    #[arg(long = "docker_addr")]
    docker_addr: Option<String>,

    /// The real Docker daemon socket.
    #[arg(long = "docker_socket", default_value = "/var/run/docker.sock")]
    docker_socket: PathBuf,

    /// Override HostConfig.NetworkMode on container creation.
    #[arg(long = "docker_network")]
    docker_network: Option<String>,

    /// Extra K=V environment entries appended to created containers.
    #[arg(long = "docker_env_vars", value_delimiter = ',')]
    docker_env_vars: Vec<String>,

    /// Environment variable names pointed at the in-container CA cert.
    #[arg(long = "docker_truststore_env_vars", value_delimiter = ',')]
    docker_truststore_env_vars: Vec<String>,

    /// Materialize a JKS trust store and splice it into JAVA_TOOL_OPTIONS.
    #[arg(long = "docker_java_truststore")]
    docker_java_truststore: bool,

    /// Materialize a JKS trust store for Bazel builds.
    #[arg(long = "docker_bazel_truststore")]
    docker_bazel_truststore: bool,

    /// Mount a side-channel Docker socket into containers so nested
    /// builds also go through this proxy.
    #[arg(long = "docker_recursive_proxy")]
    docker_recursive_proxy: bool,

    /// `disabled` passes everything; `enforce` applies the policy.
    #[arg(long = "policy_mode", default_value = "enforce")]
    policy_mode: PolicyMode,

    /// Policy document (JSON). Without one, enforce mode denies everything.
    #[arg(long = "policy_file")]
    policy_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct StabilizeArgs {
    /// Archive to stabilize.
    #[arg(long)]
    input: PathBuf,

    /// Where to write the canonical bytes.
    #[arg(long)]
    output: PathBuf,

    /// Archive format; sniffed from the input when omitted.
    #[arg(long)]
    format: Option<Format>,

    /// JSON file of user-declared replace/exclude rules.
    #[arg(long = "custom-stabilizers")]
    custom_stabilizers: Option<PathBuf>,

    /// Run only these built-in passes (comma-separated names).
    #[arg(long = "enable-passes", value_delimiter = ',')]
    enable_passes: Vec<String>,

    /// Skip these built-in passes (comma-separated names).
    #[arg(long = "disable-passes", value_delimiter = ',')]
    disable_passes: Vec<String>,
}

#[derive(Args, Debug)]
struct DiffArgs {
    left: PathBuf,
    right: PathBuf,

    /// Format of both archives; sniffed per file when omitted.
    #[arg(long)]
    format: Option<Format>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Commands::Proxy(args) => run_proxy(args),
        Commands::Stabilize(args) => run_stabilize(args),
        Commands::Diff(args) => run_diff(args),
    }
}

fn run_proxy(args: ProxyArgs) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    runtime.block_on(run_proxy_async(args))
}

async fn run_proxy_async(args: ProxyArgs) -> Result<()> {
    let policy = match &args.policy_file {
        Some(path) => {
            let data = std::fs::read(path)
                .with_context(|| format!("reading policy file {}", path.display()))?;
            Policy::from_json(&data).context("loading policy")?
        }
        None => Policy::default(),
    };

    let ca = Arc::new(Ca::generate().context("generating the intercepting CA")?);

    let proxy = Proxy::start(
        ca.clone(),
        ProxyConfig {
            http_addr: resolve_addr(&args.http_addr)?,
            tls_addr: resolve_addr(&args.tls_addr)?,
            admin_addr: resolve_addr(&args.ctrl_addr)?,
            mode: args.policy_mode,
            policy,
        },
    )
    .await
    .context("starting proxy")?;

    let docker = match &args.docker_addr {
        Some(addr) => {
            let recursive_proxy_socket = args.docker_recursive_proxy.then(|| {
                std::env::temp_dir().join(format!("rebuild-proxy-{}.sock", std::process::id()))
            });
            let proxy = DockerProxy::start(
                ca.clone(),
                DockerConfig {
                    listen: parse_docker_listen(addr)?,
                    docker_socket: args.docker_socket.clone(),
                    recursive_proxy_socket,
                    env_vars: args.docker_env_vars.clone(),
                    truststore_env_vars: args.docker_truststore_env_vars.clone(),
                    java_truststore: args.docker_java_truststore,
                    bazel_truststore: args.docker_bazel_truststore,
                    network_override: args.docker_network.clone(),
                },
            )
            .await
            .context("starting docker proxy")?;
            Some(proxy)
        }
        None => None,
    };

    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }

    proxy
        .shutdown(SHUTDOWN_DEADLINE)
        .await
        .context("shutting down proxy")?;
    if let Some(docker) = docker {
        docker
            .shutdown(SHUTDOWN_DEADLINE)
            .await
            .context("shutting down docker proxy")?;
    }
    Ok(())
}

fn resolve_addr(addr: &str) -> Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = addr
        .to_socket_addrs()
        .with_context(|| format!("resolving {addr:?}"))?
        .collect();
    // IPv4 preferred; the proxy does not speak IPv6.
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .with_context(|| format!("{addr:?} resolves to no address"))
}

fn parse_docker_listen(addr: &str) -> Result<DockerListen> {
    if let Some(path) = addr.strip_prefix("unix://") {
        if path.is_empty() {
            bail!("unix docker_addr needs a path");
        }
        return Ok(DockerListen::Unix(path.into()));
    }
    Ok(DockerListen::Tcp(resolve_addr(addr)?))
}

fn run_stabilize(args: StabilizeArgs) -> Result<()> {
    let data = std::fs::read(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let format = args.format.unwrap_or_else(|| Format::detect(&data));

    let mut stabilizers = default_stabilizers();
    if !args.enable_passes.is_empty() {
        stabilizers.retain(|s| args.enable_passes.iter().any(|n| n == s.name()));
    }
    stabilizers.retain(|s| !args.disable_passes.iter().any(|n| n == s.name()));

    if let Some(path) = &args.custom_stabilizers {
        let config = std::fs::read(path)
            .with_context(|| format!("reading custom stabilizers {}", path.display()))?;
        let entries: Vec<custom::CustomStabilizerEntry> =
            serde_json::from_slice(&config).context("parsing custom stabilizers")?;
        stabilizers.extend(custom::create(&entries, format)?);
    }

    let out = stabilize(&data, format, &stabilizers)
        .with_context(|| format!("stabilizing {} as {format}", args.input.display()))?;
    std::fs::write(&args.output, out)
        .with_context(|| format!("writing {}", args.output.display()))?;
    info!(
        input = %args.input.display(),
        output = %args.output.display(),
        %format,
        "stabilized"
    );
    Ok(())
}

fn run_diff(args: DiffArgs) -> Result<()> {
    let summarize = |path: &PathBuf| -> Result<ContentSummary> {
        let data =
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let format = args.format.unwrap_or_else(|| Format::detect(&data));
        ContentSummary::from_bytes(&data, format)
            .with_context(|| format!("summarizing {}", path.display()))
    };
    let left = summarize(&args.left)?;
    let right = summarize(&args.right)?;

    let result = left.diff(&right);
    if result.is_empty() {
        println!("archives match: {} files compared", left.files.len());
        return Ok(());
    }
    for name in &result.left_only {
        println!("- {name}");
    }
    for name in &result.diffs {
        println!("~ {name}");
    }
    for name in &result.right_only {
        println!("+ {name}");
    }
    std::process::exit(1);
}
