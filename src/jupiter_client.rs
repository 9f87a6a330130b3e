//! Aggregator client (Jupiter-family) - the last rung of the routing ladder.
//!
//! Also serves the arb scanner's per-venue quote fan-out and the short-TTL
//! price lookups the HFT monitor falls back to.

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::constants::{AGGREGATOR_QUOTE_TIMEOUT, AGGREGATOR_SWAP_TIMEOUT, QUOTE_TIMEOUT};

/// A venue quote from the scan fan-out; the raw quote is kept opaque so it
/// can be posted back verbatim for a swap build.
#[derive(Debug, Clone)]
pub struct VenueQuote {
    pub venue: String,
    pub out_amount: u64,
    pub quote: Value,
}

pub struct JupiterClient {
    http: reqwest::Client,
    quote_url: String,
    swap_url: String,
    price_url: String,
    api_key: Option<String>,
}

impl JupiterClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            quote_url: config.jupiter_quote_api.clone(),
            swap_url: config.jupiter_swap_api.clone(),
            price_url: config.jupiter_price_api.clone(),
            api_key: config.jupiter_api_key.clone(),
        }
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.get(url);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }
        req
    }

    /// One quote for the price-matrix fan-out. Failures return `None`; the
    /// scanner drops them and works with whatever venues answered.
    pub async fn fetch_venue_quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        venue: &str,
    ) -> Option<VenueQuote> {
        let url = format!(
            "{}?inputMint={}&outputMint={}&amount={}&dexes={}",
            self.quote_url, input_mint, output_mint, amount, venue
        );
        let resp = self.get(&url).timeout(QUOTE_TIMEOUT).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let quote: Value = resp.json().await.ok()?;
        let out_amount = parse_out_amount(&quote)?;
        Some(VenueQuote {
            venue: venue.to_string(),
            out_amount,
            quote,
        })
    }

    /// Routing-ladder quote. With a venue, routes are pinned to that DEX and
    /// restricted to direct routes; without one the aggregator routes freely
    /// (generic trades such as position exits).
    pub async fn quote_direct(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        venue: Option<&str>,
        slippage_bps: u16,
    ) -> Result<Value> {
        let mut url = format!(
            "{}?inputMint={}&outputMint={}&amount={}&slippageBps={}",
            self.quote_url, input_mint, output_mint, amount, slippage_bps
        );
        if let Some(venue) = venue {
            url.push_str(&format!("&dexes={}&onlyDirectRoutes=true", venue));
        }
        let venue = venue.unwrap_or("any");
        let resp = self
            .get(&url)
            .timeout(AGGREGATOR_QUOTE_TIMEOUT)
            .send()
            .await
            .context("aggregator quote request")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            error!(
                "Aggregator quote failed for {}: {} {}",
                venue,
                status,
                body.get(..200).unwrap_or(&body)
            );
            return Err(anyhow!("aggregator quote returned {}", status));
        }
        resp.json().await.context("aggregator quote parse")
    }

    /// Build a swap transaction from a previously fetched quote. Returns
    /// `(tx_base64, estimated_out)`.
    pub async fn build_swap(&self, quote: &Value, user_pubkey: &str) -> Result<(String, u64)> {
        let estimated_out = parse_out_amount(quote).unwrap_or(0);
        let body = json!({
            "quoteResponse": quote,
            "userPublicKey": user_pubkey,
            "wrapAndUnwrapSol": true,
            "dynamicComputeUnitLimit": true,
            "prioritizationFeeLamports": 10_000,
        });
        let mut req = self.http.post(&self.swap_url);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }
        let resp = req
            .timeout(AGGREGATOR_SWAP_TIMEOUT)
            .json(&body)
            .send()
            .await
            .context("aggregator swap request")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            error!(
                "Aggregator swap build failed: {} {}",
                status,
                text.get(..200).unwrap_or(&text)
            );
            return Err(anyhow!("aggregator swap returned {}", status));
        }
        let value: Value = resp.json().await.context("aggregator swap parse")?;
        let tx = value
            .get("swapTransaction")
            .and_then(|t| t.as_str())
            .ok_or_else(|| anyhow!("aggregator swap response missing transaction"))?
            .to_string();
        info!("🪐 Built aggregator swap: ~{} out", estimated_out);
        Ok((tx, estimated_out))
    }

    /// Spot USD price for a mint via the price endpoint.
    pub async fn price_usd(&self, mint: &str) -> Result<f64> {
        let url = format!("{}?ids={}", self.price_url, mint);
        let resp = self
            .get(&url)
            .timeout(QUOTE_TIMEOUT + std::time::Duration::from_secs(1))
            .send()
            .await
            .context("price request")?;
        if !resp.status().is_success() {
            return Err(anyhow!("price endpoint returned {}", resp.status()));
        }
        let body: Value = resp.json().await.context("price parse")?;
        let price = body
            .pointer(&format!("/data/{}/price", mint))
            .and_then(|p| match p {
                Value::String(s) => s.parse::<f64>().ok(),
                Value::Number(n) => n.as_f64(),
                _ => None,
            })
            .unwrap_or(0.0);
        debug!("price lookup {} = {} USD", mint, price);
        Ok(price)
    }
}

/// Quotes report `outAmount` as a decimal string.
pub fn parse_out_amount(quote: &Value) -> Option<u64> {
    match quote.get("outAmount")? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_out_amount_string_and_number() {
        assert_eq!(
            parse_out_amount(&json!({"outAmount": "151000000"})),
            Some(151_000_000)
        );
        assert_eq!(parse_out_amount(&json!({"outAmount": 42})), Some(42));
        assert_eq!(parse_out_amount(&json!({"inAmount": "1"})), None);
        assert_eq!(parse_out_amount(&json!({"outAmount": null})), None);
    }
}
