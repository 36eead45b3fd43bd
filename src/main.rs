//! hopgate: forwarding proxy
//!
//! # Usage
//!
//! ```bash
//! # Run with the default configuration path
//! hopgate
//!
//! # Run with a custom configuration
//! hopgate -c /etc/hopgate/config.json
//!
//! # Validate a configuration and exit
//! hopgate -c config.json --check
//! ```

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use hopgate::config::{load_config, EgressConfig};
use hopgate::endpoint::Endpoint;
use hopgate::error::HttpError;
use hopgate::http::{HttpEgress, HttpIngress};
use hopgate::net::{Dial, StaticRegistry, TcpDial};
use hopgate::relay::{shuttle, RawReader, RawWriter};
use hopgate::router::{AdapterKind, CountryDb, GeoReader, NoGeo, Router};

/// Time allowed for head exchange and egress establishment
const SETUP_TIMEOUT: Duration = Duration::from_secs(30);

struct Args {
    config_path: PathBuf,
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("hopgate.json");
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "--check" => check_config = true,
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("hopgate v{}", hopgate::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"hopgate v{}

Forwarding proxy: HTTP ingress, policy routing, HTTP/direct/reject egress.

USAGE:
    hopgate [OPTIONS]

OPTIONS:
    -c, --config <PATH>   Configuration file path [default: hopgate.json]
    --check               Validate configuration and exit
    -h, --help            Print help information
    -v, --version         Print version information"#,
        hopgate::VERSION
    );
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config_path)
        .with_context(|| format!("loading {}", args.config_path.display()))?;
    init_tracing(&config.log.level);

    if args.check_config {
        println!("configuration OK: {}", args.config_path.display());
        return Ok(());
    }

    let geo: Arc<dyn GeoReader> = match &config.geo_db {
        Some(path) => Arc::new(CountryDb::load(path)?),
        None => Arc::new(NoGeo),
    };
    let registry = Arc::new(StaticRegistry::new(config.egresses.keys().cloned()));
    let router = Arc::new(Router::new(geo, registry));
    for (name, rule) in &config.rules {
        router.update(name, rule.clone())?;
    }
    router.set_route(config.route.clone())?;

    let egresses = Arc::new(config.egresses.clone());

    for (name, ingress) in &config.ingresses {
        let listener = TcpListener::bind(ingress.listen)
            .await
            .with_context(|| format!("binding ingress '{name}' to {}", ingress.listen))?;
        info!(ingress = %name, addr = %ingress.listen, "listening");

        let name: Arc<str> = name.as_str().into();
        let router = Arc::clone(&router);
        let egresses = Arc::clone(&egresses);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let name = Arc::clone(&name);
                        let router = Arc::clone(&router);
                        let egresses = Arc::clone(&egresses);
                        tokio::spawn(async move {
                            if let Err(err) =
                                handle_connection(stream, &name, &router, &egresses).await
                            {
                                debug!(%peer, error = %err, "connection ended with error");
                            }
                        });
                    }
                    Err(err) => warn!(error = %err, "accept failed"),
                }
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}

enum Upstream {
    Http(HttpEgress<TcpStream>),
    Direct(TcpStream),
    Reject,
}

async fn handle_connection(
    stream: TcpStream,
    ingress_name: &str,
    router: &Router,
    egresses: &HashMap<String, EgressConfig>,
) -> hopgate::Result<()> {
    let mut ingress = HttpIngress::new(stream);

    let remote = match timeout(SETUP_TIMEOUT, ingress.read_remote()).await {
        Ok(Ok(remote)) => remote,
        Ok(Err(err)) => {
            ingress.abort().await;
            return Err(err.into());
        }
        Err(_) => {
            ingress.abort().await;
            return Err(HttpError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "head exchange timed out",
            ))
            .into());
        }
    };

    let (host, port) = (remote.host().to_string(), remote.port());
    let resolve = move || async move {
        match tokio::net::lookup_host((host, port)).await {
            Ok(addrs) => addrs.map(|a| a.ip()).collect(),
            Err(_) => Vec::new(),
        }
    };
    let egress_name = router
        .route(&remote, ingress_name, AdapterKind::Http, resolve)
        .await;
    info!(ingress = %ingress_name, remote = %remote, egress = %egress_name, "routed");

    let upstream = match timeout(SETUP_TIMEOUT, connect_egress(&remote, &egress_name, egresses))
        .await
    {
        Ok(Ok(upstream)) => upstream,
        Ok(Err(err)) => {
            ingress.abort().await;
            return Err(err.into());
        }
        Err(_) => {
            ingress.abort().await;
            return Err(HttpError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "egress setup timed out",
            ))
            .into());
        }
    };

    match upstream {
        Upstream::Reject => {
            info!(remote = %remote, "rejected");
            ingress.close().await;
            Ok(())
        }
        Upstream::Direct(stream) => {
            ingress.confirm().await?;
            let (ingress_reader, ingress_writer) = ingress.into_split();
            let (upstream_reader, upstream_writer) = stream.into_split();
            let stats = shuttle(
                ingress_reader,
                ingress_writer,
                RawReader(upstream_reader),
                RawWriter(upstream_writer),
            )
            .await?;
            debug!(up = stats.client_to_server, down = stats.server_to_client, "relay finished");
            Ok(())
        }
        Upstream::Http(egress) => {
            ingress.confirm().await?;
            let (ingress_reader, ingress_writer) = ingress.into_split();
            let (egress_reader, egress_writer) = egress.into_split();
            let stats = shuttle(ingress_reader, ingress_writer, egress_reader, egress_writer)
                .await?;
            debug!(up = stats.client_to_server, down = stats.server_to_client, "relay finished");
            Ok(())
        }
    }
}

async fn connect_egress(
    remote: &Endpoint,
    name: &str,
    egresses: &HashMap<String, EgressConfig>,
) -> Result<Upstream, HttpError> {
    match egresses.get(name) {
        Some(EgressConfig {
            kind: AdapterKind::Http,
            host: Some(host),
            port: Some(port),
        }) => {
            let next = Endpoint::new(host.clone(), *port);
            let egress = HttpEgress::connect(&TcpDial, remote, &next).await?;
            Ok(Upstream::Http(egress))
        }
        Some(EgressConfig {
            kind: AdapterKind::Reject,
            ..
        }) => Ok(Upstream::Reject),
        Some(_) => {
            // Validation rejects other kinds and http without an address.
            Err(HttpError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("egress '{name}' is not connectable"),
            )))
        }
        None if name == "reject" => Ok(Upstream::Reject),
        // Built-in direct; the registry guarantees unknown names never get here.
        None => Ok(Upstream::Direct(TcpDial.dial(remote).await?)),
    }
}
