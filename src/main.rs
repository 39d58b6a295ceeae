//! lb-proxy
//!
//! A TCP load balancer over health-checked upstreams.
//!
//! ```text
//!   client ──tcp|tls|stcp──▶ listener ──▶ relay ──▶ parent dialer ──tcp|tls|stcp──▶ upstream
//!                                           │
//!                                           └── load balancer over active upstreams
//!                                                (one probe loop per upstream)
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use lb_proxy::config::loader::load_config;
use lb_proxy::config::validation::validate_config;
use lb_proxy::config::watcher::ConfigWatcher;
use lb_proxy::config::ProxyConfig;
use lb_proxy::lifecycle::signals::shutdown_on_signal;
use lb_proxy::lifecycle::App;
use lb_proxy::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "lb-proxy")]
#[command(about = "TCP load balancer with health-checked upstreams", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload the upstream set when the configuration file changes
    #[arg(long, requires = "config")]
    watch: bool,

    /// Local listen address, overrides server.bind_address
    #[arg(short = 'p', long = "local")]
    local: Option<String>,

    /// Local protocol <tcp|tls|stcp|kcp>
    #[arg(short = 't', long = "local-type")]
    local_type: Option<String>,

    /// Parent protocol <tcp|tls|stcp|kcp>
    #[arg(short = 'T', long = "parent-type")]
    parent_type: Option<String>,

    /// Compress traffic on both sides
    #[arg(long)]
    compress: bool,

    /// Upstream address, repeatable; added to the configured ones
    #[arg(short = 'P', long = "upstream")]
    upstreams: Vec<String>,
}

impl Cli {
    fn apply(&self, config: &mut ProxyConfig) {
        if let Some(local) = &self.local {
            config.server.bind_address = local.clone();
        }
        if let Some(t) = &self.local_type {
            config.server.protocol = t.clone();
        }
        if let Some(t) = &self.parent_type {
            config.parent.protocol = t.clone();
        }
        if self.compress {
            config.server.compress = true;
            config.parent.compress = true;
        }
        config.upstreams.extend(
            self.upstreams
                .iter()
                .map(|a| lb_proxy::config::UpstreamConfig::new(a.clone())),
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    cli.apply(&mut config);
    if let Err(errors) = validate_config(&config) {
        for e in &errors {
            eprintln!("invalid configuration: {e}");
        }
        return Err(format!("{} configuration error(s)", errors.len()).into());
    }

    logging::init_logging(&config.observability);
    tracing::info!("lb-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let app = App::build(config).await?;

    // Keep the watcher alive for the whole run.
    let _watcher = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            app.watch_updates(updates);
            Some(watcher.run()?)
        }
        _ => None,
    };

    tokio::spawn(shutdown_on_signal(app.shutdown_handle()));
    app.run().await;
    Ok(())
}
