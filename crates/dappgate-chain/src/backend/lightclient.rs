//! Light client connection support using smoldot.
//!
//! Provides trustless connections to Polkadot-SDK chains without relying on
//! centralized RPC endpoints. Light clients sync from the network, so the
//! first connection can take tens of seconds.

use super::SubxtRpcBackend;
use crate::error::ChainError;
use subxt::backend::rpc::RpcClient;
use subxt::lightclient::LightClient;

/// Fetch a chain spec from a URL.
pub async fn fetch_chain_spec(client: &reqwest::Client, url: &str) -> Result<String, ChainError> {
    tracing::debug!("Fetching chain spec from {}", url);

    let start = std::time::Instant::now();
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ChainError::LightClient(format!("Failed to fetch chain spec: {}", e)))?;

    if !response.status().is_success() {
        return Err(ChainError::LightClient(format!(
            "Failed to fetch chain spec from {}: HTTP {}",
            url,
            response.status()
        )));
    }

    let spec = response
        .text()
        .await
        .map_err(|e| ChainError::LightClient(format!("Failed to read chain spec: {}", e)))?;

    tracing::debug!(
        "Fetched chain spec ({} bytes) in {:?}",
        spec.len(),
        start.elapsed()
    );

    Ok(spec)
}

/// Start an embedded light client for the chain described by the spec at `chain_spec_url`.
pub async fn connect_light_client(
    client: &reqwest::Client,
    chain_spec_url: &str,
) -> Result<SubxtRpcBackend, ChainError> {
    let total_start = std::time::Instant::now();
    tracing::info!("Connecting via light client (smoldot) using {}", chain_spec_url);

    let spec = fetch_chain_spec(client, chain_spec_url).await?;

    tracing::info!("Starting smoldot light client...");
    let (light_client, rpc) = LightClient::relay_chain(spec.as_str()).map_err(|e| {
        ChainError::LightClient(format!("Failed to start light client: {}", e))
    })?;

    let rpc_client = RpcClient::new(rpc);
    tracing::info!("Light client started in {:?}", total_start.elapsed());

    Ok(SubxtRpcBackend::from_light_client(rpc_client, light_client))
}
