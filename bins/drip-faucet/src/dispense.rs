//! Fund delivery. The faucet only needs "send `amount` to `address`".

use anyhow::{Context, Result};
use async_trait::async_trait;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};

/// Sends faucet funds to a wallet and returns the transaction id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Dispenser: Send + Sync {
    async fn dispense(&self, address: &str, amount: u64) -> Result<String>;
}

/// [`Dispenser`] backed by a node's JSON-RPC endpoint.
pub struct RpcDispenser {
    client: HttpClient,
    method: String,
}

impl RpcDispenser {
    pub fn new(endpoint: &str, method: &str) -> Result<Self> {
        let client = HttpClientBuilder::default()
            .build(endpoint)
            .context("Failed to build RPC client")?;
        Ok(Self {
            client,
            method: method.to_string(),
        })
    }
}

#[async_trait]
impl Dispenser for RpcDispenser {
    async fn dispense(&self, address: &str, amount: u64) -> Result<String> {
        let mut params = ArrayParams::new();
        params.insert(address).context("Failed to encode address")?;
        params.insert(amount).context("Failed to encode amount")?;

        let txid: String = self
            .client
            .request(self.method.as_str(), params)
            .await
            .with_context(|| format!("RPC {} failed", self.method))?;
        Ok(txid)
    }
}
