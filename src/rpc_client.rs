//! JSON-RPC and DAS helpers over plain HTTP.
//!
//! These calls are discovery/fallback only. Nothing here is allowed on the
//! hot path - if a build or a strike ends up in this module, a cache has a
//! gap.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::constants::{METADATA_TIMEOUT, RPC_TIMEOUT};

pub struct RpcHttpClient {
    http: Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcHttpClient {
    pub fn new(url: &str) -> Self {
        Self {
            http: Client::new(),
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });
        let resp = self
            .http
            .post(&self.url)
            .timeout(RPC_TIMEOUT)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("rpc {} request failed", method))?;
        let value: Value = resp
            .json()
            .await
            .with_context(|| format!("rpc {} returned non-json", method))?;
        if let Some(err) = value.get("error") {
            return Err(anyhow!("rpc {} error: {}", method, err));
        }
        Ok(value.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Raw account data via `getAccountInfo` (base64). `None` when the
    /// account does not exist.
    pub async fn get_account_data(&self, address: &str) -> Result<Option<Vec<u8>>> {
        let result = self
            .call(
                "getAccountInfo",
                json!([address, {"encoding": "base64", "commitment": "confirmed"}]),
            )
            .await?;
        let Some(data_b64) = result
            .get("value")
            .and_then(|v| v.get("data"))
            .and_then(|d| d.get(0))
            .and_then(|s| s.as_str())
        else {
            return Ok(None);
        };
        Ok(Some(BASE64.decode(data_b64).context("account data b64")?))
    }

    /// SPL token account balance (raw units). Missing accounts read as 0.
    pub async fn get_token_balance(&self, token_account: &str) -> Result<u64> {
        let result = self
            .call("getTokenAccountBalance", json!([token_account]))
            .await?;
        Ok(result
            .get("value")
            .and_then(|v| v.get("amount"))
            .and_then(|a| a.as_str())
            .and_then(|a| a.parse::<u64>().ok())
            .unwrap_or(0))
    }

    /// Raw balance of `owner`'s largest token account for `mint`.
    pub async fn get_owner_token_balance(&self, owner: &str, mint: &str) -> Result<u64> {
        let result = self
            .call(
                "getTokenAccountsByOwner",
                json!([owner, {"mint": mint}, {"encoding": "jsonParsed"}]),
            )
            .await?;
        let mut best = 0u64;
        if let Some(accounts) = result.get("value").and_then(|v| v.as_array()) {
            for acc in accounts {
                let amount = acc
                    .pointer("/account/data/parsed/info/tokenAmount/amount")
                    .and_then(|a| a.as_str())
                    .and_then(|a| a.parse::<u64>().ok())
                    .unwrap_or(0);
                best = best.max(amount);
            }
        }
        Ok(best)
    }

    /// Most recent signatures touching an address, newest first.
    pub async fn get_signatures_for_address(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<String>> {
        let result = self
            .call(
                "getSignaturesForAddress",
                json!([address, {"limit": limit, "commitment": "confirmed"}]),
            )
            .await?;
        let mut sigs = Vec::new();
        if let Some(entries) = result.as_array() {
            for e in entries {
                if let Some(sig) = e.get("signature").and_then(|s| s.as_str()) {
                    sigs.push(sig.to_string());
                }
            }
        }
        Ok(sigs)
    }

    /// Full transaction in `jsonParsed` encoding, or `None` if unknown.
    pub async fn get_transaction_json(&self, signature: &str) -> Result<Option<Value>> {
        let result = self
            .call(
                "getTransaction",
                json!([signature, {
                    "encoding": "jsonParsed",
                    "commitment": "confirmed",
                    "maxSupportedTransactionVersion": 0,
                }]),
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(result))
    }

    /// DAS asset lookup (token metadata, authorities, links).
    pub async fn get_asset(&self, mint: &str) -> Result<Option<Value>> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": "getAsset",
            "params": {"id": mint},
        });
        let resp = self
            .http
            .post(&self.url)
            .timeout(METADATA_TIMEOUT)
            .json(&body)
            .send()
            .await
            .context("getAsset request failed")?;
        let value: Value = resp.json().await.context("getAsset returned non-json")?;
        if value.get("error").is_some() {
            return Ok(None);
        }
        Ok(value.get("result").cloned().filter(|r| !r.is_null()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_holds_url() {
        let c = RpcHttpClient::new("http://localhost:8899");
        assert_eq!(c.url(), "http://localhost:8899");
    }
}
