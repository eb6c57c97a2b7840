//! dappgate - background mediation layer between dApps, the keyring and chain backends.

use clap::Parser;
use color_eyre::Result;
use dappgate::{Dispatcher, HttpDenyList, Services};
use dappgate_core::config::{load_config, load_config_from};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// dappgate - mediates wallet requests from web pages.
#[derive(Parser, Debug)]
#[command(name = "dappgate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on for channels, e.g. 127.0.0.1:7545
    #[arg(short, long)]
    listen: Option<String>,

    /// Log as JSON lines instead of text
    #[arg(long)]
    log_json: bool,

    /// Endpoint override as <chain>=<url>; may be repeated
    #[arg(long = "endpoint", value_parser = parse_endpoint)]
    endpoints: Vec<(String, String)>,
}

fn parse_endpoint(raw: &str) -> Result<(String, String), String> {
    let (chain, url) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected <chain>=<url>, got '{}'", raw))?;
    if chain.is_empty() || url.is_empty() {
        return Err(format!("expected <chain>=<url>, got '{}'", raw));
    }
    Ok((chain.to_string(), url.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    color_eyre::install()?;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("dappgate=info".parse()?)
        .add_directive("dappgate_chain=info".parse()?)
        .add_directive("dappgate_core=info".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let mut config = match &args.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    for (chain, url) in args.endpoints {
        config.endpoints.insert(chain, url);
    }

    let listen = config.listen.clone();
    let phishing = config.phishing.clone();

    let services = Arc::new(Services::builder(config).build()?);
    services.start();

    let shutdown = CancellationToken::new();
    if let Some(url) = phishing.deny_list_url {
        let source = Arc::new(HttpDenyList::new(reqwest::Client::new(), url));
        services.phishing.spawn_refresh(
            source,
            Duration::from_secs(phishing.refresh_secs.max(60)),
            shutdown.child_token(),
        );
    }

    let dispatcher = Arc::new(Dispatcher::new(services.clone()));
    let listener = TcpListener::bind(&listen).await?;

    let server = tokio::spawn(dappgate::serve(listener, dispatcher, shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    shutdown.cancel();
    services.shutdown().await;
    server.await??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            parse_endpoint("polkadot=wss://rpc.example").unwrap(),
            ("polkadot".to_string(), "wss://rpc.example".to_string())
        );
        assert_eq!(
            parse_endpoint("cardano=https://x.example/?a=b").unwrap(),
            ("cardano".to_string(), "https://x.example/?a=b".to_string())
        );
        assert!(parse_endpoint("polkadot").is_err());
        assert!(parse_endpoint("=wss://x").is_err());
    }
}
