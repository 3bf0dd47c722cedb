use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use anyhow::Error;
use tracing::debug;

/// Read-only provider for the target chain; no wallet is attached because
/// all signing goes through the DER signer.
pub async fn create_alloy_provider_without_wallet(url: &str) -> Result<DynProvider, Error> {
    debug!("Creating alloy provider for {}", url);
    if url.starts_with("ws://") || url.starts_with("wss://") {
        let ws = WsConnect::new(url);
        Ok(ProviderBuilder::new()
            .connect_ws(ws)
            .await
            .map_err(|e| Error::msg(format!("Execution layer: Failed to connect to WS: {e}")))?
            .erased())
    } else if url.starts_with("http://") || url.starts_with("https://") {
        Ok(ProviderBuilder::new()
            .connect_http(url.parse::<reqwest::Url>()?)
            .erased())
    } else {
        Err(anyhow::anyhow!(
            "Invalid URL, only websocket and http are supported: {}",
            url
        ))
    }
}
