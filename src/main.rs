use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sandbox_dns::{DnsServer, Endpoint, ExtDnsEntry, Network, NetworkRegistry, ResolverConfig, Sandbox};

const STATIC_NETWORK_ID: &str = "static";

#[derive(Parser)]
#[command(name = "sandbox-dns")]
#[command(about = "Embedded DNS resolver for a container sandbox", long_about = None)]
struct Args {
    /// Address to listen on (UDP and TCP)
    #[arg(short, long, default_value = "127.0.0.11:53")]
    listen: SocketAddr,

    /// External DNS server: IP, IP:PORT, or host:IP[:PORT] for a server on
    /// the host's loopback. Repeat to add fallbacks, tried in order.
    #[arg(short, long = "server")]
    servers: Vec<ExtDnsEntry>,

    /// Answer local names only; misses get SERVFAIL
    #[arg(long)]
    no_proxy: bool,

    /// Per-server timeout in milliseconds
    #[arg(long, default_value = "4000")]
    timeout_ms: u64,

    /// Static record NAME=IP. Repeat a name for several addresses.
    #[arg(short, long = "record")]
    records: Vec<StaticRecord>,

    /// Sandbox identifier used in logs
    #[arg(long, default_value = "default")]
    sandbox: String,

    /// Log filter (trace, debug, info, warn, error), overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Clone)]
struct StaticRecord {
    name: String,
    ip: IpAddr,
}

impl FromStr for StaticRecord {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, ip) = s
            .split_once('=')
            .ok_or_else(|| format!("expected NAME=IP, got {s}"))?;
        if name.is_empty() {
            return Err(format!("empty name in {s}"));
        }
        let ip = ip.parse().map_err(|e| format!("invalid address in {s}: {e}"))?;
        Ok(Self {
            name: name.to_string(),
            ip,
        })
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_sandbox(args: &Args) -> anyhow::Result<Sandbox> {
    let registry = Arc::new(NetworkRegistry::new());
    registry.add_network(Arc::new(Network::new(STATIC_NETWORK_ID, STATIC_NETWORK_ID, "null")));

    let config = ResolverConfig {
        proxy_dns: !args.no_proxy,
        ext_servers: args.servers.clone(),
        timeout: Duration::from_millis(args.timeout_ms),
        ..ResolverConfig::default()
    };
    let sandbox = Sandbox::new(args.sandbox.clone(), registry, config);

    for (i, record) in args.records.iter().enumerate() {
        let endpoint = Endpoint::new(format!("static-{i}"), record.name.clone(), STATIC_NETWORK_ID);
        let endpoint = match record.ip {
            IpAddr::V4(v4) => endpoint.with_ipv4(v4),
            IpAddr::V6(v6) => endpoint.with_ipv6(v6),
        };
        sandbox
            .join(endpoint)
            .with_context(|| format!("registering {}", record.name))?;
    }

    Ok(sandbox)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    if args.no_proxy && !args.servers.is_empty() {
        warn!("--no-proxy set, external servers will not be used");
    }

    let sandbox = build_sandbox(&args)?;
    let server = DnsServer::bind(args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;

    info!(
        sandbox = %sandbox.id(),
        records = args.records.len(),
        "starting resolver"
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
        }
        signal_token.cancel();
    });

    server.run(Arc::clone(sandbox.resolver()), shutdown).await;
    Ok(())
}
