//! Vault route engine CLI entry point.
//!
//! Loads and validates a route configuration, and can dry-run a request
//! against it to show which route handles it.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vault_route_engine::{EngineConfig, ProxyRequest, RouteEngine};

#[derive(Parser, Debug)]
#[command(name = "vault-route-engine")]
#[command(
    author,
    version,
    about = "Route selection and transformation for a multi-tenant proxy"
)]
struct Args {
    /// Configuration file path (YAML or JSON)
    #[arg(short, long, env = "ROUTE_ENGINE_CONFIG")]
    config: Option<PathBuf>,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit.
    #[arg(long)]
    example_config: bool,

    /// Validate configuration and exit.
    #[arg(long)]
    validate: bool,

    /// Vault to dry-run a request against
    #[arg(long, requires = "target")]
    vault: Option<String>,

    /// Method of the dry-run request
    #[arg(long, default_value = "GET")]
    method: String,

    /// Target of the dry-run request, e.g. "http://inbound/tokenize"
    #[arg(long, requires = "vault")]
    target: Option<String>,
}

fn print_example_config() {
    let example = r#"# Route Engine Configuration Example
version: "1"

settings:
  # Deadline for one transformation chain (ms, 0 disables)
  timeout_ms: 5000
  # Largest body a transformation chain will buffer (bytes)
  max_body_size: 10485760  # 10MB

transformers:
  strip-debug:
    type: header
    remove: ["X-Debug"]
    set:
      - name: "X-Forwarded-Method"
        value: "${request.method}"

  mask-card:
    type: json
    operations:
      - mask:
          path: "$.card.number"
          keep_last: 4

vaults:
  - id: "vlt_1"
    upstream: "https://example.com"
    routes:
      # Requests addressed to the proxy itself
      - name: "tokenize"
        method: "POST"
        path: "/tokenize"
        upstream: "https://tokens.example.com"
        request_transformations: ["strip-debug"]

      # Traffic tunnelled through the proxy (":443" is dropped for https)
      - name: "payments"
        method: "*"
        path: "https://api.payments.example.com/*"
        response_transformations: ["mask-card"]
"#;
    println!("{}", example);
}

fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = if path.extension().is_some_and(|e| e == "yaml" || e == "yml") {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid YAML in {}", path.display()))?
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }

    if args.example_config {
        print_example_config();
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };

    let engine = RouteEngine::new(config).context("Failed to build route engine")?;
    let report = engine.reload_from_config()?;

    if args.validate {
        for rejected in &report.rejected {
            eprintln!(
                "vault {}: route '{}': {}",
                rejected.vault_id, rejected.route, rejected.error
            );
        }
        anyhow::ensure!(
            report.is_clean(),
            "{} route(s) failed validation",
            report.rejected.len()
        );
        info!(routes = report.accepted, "Configuration is valid");
        return Ok(());
    }

    if let (Some(vault), Some(target)) = (&args.vault, &args.target) {
        let request = ProxyRequest::from_uri(args.method.as_str(), target)
            .with_context(|| format!("Invalid target: {}", target))?;

        match engine.select_route(vault, &request) {
            Some(route) => {
                println!("{:#?}", route);
                let routed = engine.process_request(vault, request).await?;
                if let Some(upstream) = &routed.upstream {
                    println!("upstream: {}", upstream);
                }
            }
            None => anyhow::bail!("No route in vault {} matches {} {}", vault, args.method, target),
        }
        return Ok(());
    }

    let snapshot = engine.snapshot();
    info!(
        config = ?args.config,
        vaults = snapshot.vault_count(),
        routes = snapshot.route_count(),
        "Route engine loaded"
    );

    Ok(())
}
