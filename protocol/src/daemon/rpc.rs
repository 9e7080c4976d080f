//! bitcoind-compatible JSON-RPC client.
//!
//! Speaks JSON-RPC 1.0 over HTTP with basic auth, which is what bitcoind and
//! its forks expose. Only four methods are used: `getblockcount`,
//! `getblockhash`, `getblock <hash> 1` and `getrawtransaction <txid> 1`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::trace;

use super::error::DaemonError;
use super::types::{Block, Transaction, TxIn, TxOut};
use super::ChainDaemon;
use crate::config::BASE_UNITS_PER_COIN;

/// `RPC_INVALID_ADDRESS_OR_KEY`: unknown block or transaction.
const RPC_NOT_FOUND: i64 = -5;
/// `RPC_INVALID_PARAMETER`: block height out of range.
const RPC_OUT_OF_RANGE: i64 = -8;

/// Connection settings for [`RpcDaemon`].
#[derive(Debug, Clone)]
pub struct RpcDaemonConfig {
    pub url: String,
    pub user: String,
    pub password: Option<String>,
    pub timeout: Duration,
}

impl RpcDaemonConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: String::new(),
            password: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = Some(password.into());
        self
    }
}

/// Client for a bitcoind-style JSON-RPC endpoint.
pub struct RpcDaemon {
    client: Client,
    config: RpcDaemonConfig,
}

impl RpcDaemon {
    pub fn new(config: RpcDaemonConfig) -> Result<Self, DaemonError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    /// Issues one JSON-RPC call and deserializes its `result`.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, DaemonError> {
        trace!(method, %params, "daemon call");

        let body = json!({
            "jsonrpc": "1.0",
            "id": "chainreg",
            "method": method,
            "params": params,
        });

        let mut request = self.client.post(&self.config.url).json(&body);
        if !self.config.user.is_empty() {
            request = request.basic_auth(&self.config.user, self.config.password.as_deref());
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        // bitcoind answers RPC errors with HTTP 500 and a JSON body, so the
        // envelope is parsed before the status is considered.
        let envelope: RpcEnvelope = serde_json::from_str(&text).map_err(|_| {
            DaemonError::MalformedResponse(format!("HTTP {status}: {}", text.trim()))
        })?;
        let result = envelope.into_result()?;
        Ok(serde_json::from_value(result)?)
    }
}

#[async_trait]
impl ChainDaemon for RpcDaemon {
    async fn get_block_count(&self) -> Result<u64, DaemonError> {
        self.call("getblockcount", json!([])).await
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, DaemonError> {
        self.call("getblockhash", json!([height])).await
    }

    async fn get_block(&self, hash: &str) -> Result<Block, DaemonError> {
        let raw: RawBlock = self.call("getblock", json!([hash, 1])).await?;
        Ok(raw.into())
    }

    async fn get_transaction(&self, txid: &str) -> Result<Transaction, DaemonError> {
        let raw: RawTransaction = self.call("getrawtransaction", json!([txid, 1])).await?;
        raw.try_into()
    }
}

// ---------------------------------------------------------------------------
// Wire Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl RpcEnvelope {
    fn into_result(self) -> Result<Value, DaemonError> {
        match self.error {
            Some(RpcErrorBody { code, message })
                if code == RPC_NOT_FOUND || code == RPC_OUT_OF_RANGE =>
            {
                Err(DaemonError::NotFound(message))
            }
            Some(RpcErrorBody { code, message }) => Err(DaemonError::Rpc { code, message }),
            None => Ok(self.result),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    hash: String,
    height: u64,
    tx: Vec<String>,
}

impl From<RawBlock> for Block {
    fn from(raw: RawBlock) -> Self {
        Block {
            height: raw.height,
            hash: raw.hash,
            txids: raw.tx,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    txid: String,
    vin: Vec<RawTxIn>,
    vout: Vec<RawTxOut>,
}

/// Coinbase inputs carry neither `txid` nor `vout`.
#[derive(Debug, Deserialize)]
struct RawTxIn {
    txid: Option<String>,
    vout: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawTxOut {
    value: f64,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: RawScript,
}

/// Older daemons list `addresses`, newer ones a single `address`.
#[derive(Debug, Deserialize)]
struct RawScript {
    hex: String,
    #[serde(default)]
    addresses: Vec<String>,
    #[serde(default)]
    address: Option<String>,
}

impl TryFrom<RawTransaction> for Transaction {
    type Error = DaemonError;

    fn try_from(raw: RawTransaction) -> Result<Self, Self::Error> {
        let inputs = raw
            .vin
            .into_iter()
            .filter_map(|input| match (input.txid, input.vout) {
                (Some(txid), Some(vout)) => Some(TxIn { txid, vout }),
                _ => None,
            })
            .collect();

        let outputs = raw
            .vout
            .into_iter()
            .map(|output| -> Result<TxOut, DaemonError> {
                let mut addresses = output.script_pub_key.addresses;
                if addresses.is_empty() {
                    addresses.extend(output.script_pub_key.address);
                }
                Ok(TxOut {
                    value: coins_to_base_units(output.value)?,
                    script_hex: output.script_pub_key.hex,
                    addresses,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Transaction {
            txid: raw.txid,
            inputs,
            outputs,
        })
    }
}

/// Converts a coin amount as reported by the daemon into base units.
pub fn coins_to_base_units(coins: f64) -> Result<u64, DaemonError> {
    if !coins.is_finite() || coins < 0.0 {
        return Err(DaemonError::MalformedResponse(format!(
            "invalid output value {coins}"
        )));
    }
    Ok((coins * BASE_UNITS_PER_COIN).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_tx(value: Value) -> Result<Transaction, DaemonError> {
        let raw: RawTransaction = serde_json::from_value(value)?;
        raw.try_into()
    }

    #[test]
    fn test_parse_transaction_skips_coinbase_input() {
        let tx = parse_tx(json!({
            "txid": "cb01",
            "vin": [{ "coinbase": "03a0bb0d", "sequence": 4294967295u64 }],
            "vout": [{
                "value": 12.5,
                "n": 0,
                "scriptPubKey": { "hex": "76a914aa88ac", "addresses": ["miner"] }
            }]
        }))
        .unwrap();

        assert!(tx.inputs.is_empty());
        assert_eq!(tx.outputs[0].value, 1_250_000_000);
        assert_eq!(tx.outputs[0].first_address(), Some("miner"));
    }

    #[test]
    fn test_parse_transaction_with_data_carrier() {
        let tx = parse_tx(json!({
            "txid": "ab01",
            "vin": [{ "txid": "prev", "vout": 1 }],
            "vout": [
                { "value": 0.001, "scriptPubKey": { "hex": "6a0bc6dc0101010101ab01020304" } },
                { "value": 0.5, "scriptPubKey": { "hex": "76a914bb88ac", "address": "bob" } }
            ]
        }))
        .unwrap();

        assert_eq!(tx.inputs, vec![TxIn { txid: "prev".into(), vout: 1 }]);
        assert_eq!(tx.outputs[0].value, 100_000);
        assert!(tx.outputs[0].is_data_carrier());
        assert!(tx.outputs[0].addresses.is_empty());
        assert_eq!(tx.first_spendable_output().and_then(TxOut::first_address), Some("bob"));
    }

    #[test]
    fn test_parse_block() {
        let raw: RawBlock = serde_json::from_value(json!({
            "hash": "00ff",
            "height": 42,
            "confirmations": 3,
            "tx": ["a", "b"]
        }))
        .unwrap();
        let block = Block::from(raw);
        assert_eq!(block.height, 42);
        assert_eq!(block.txids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_rpc_error_mapping() {
        let not_found: RpcEnvelope = serde_json::from_value(json!({
            "result": null,
            "error": { "code": -5, "message": "Block not found" },
            "id": "chainreg"
        }))
        .unwrap();
        assert!(matches!(not_found.into_result(), Err(DaemonError::NotFound(_))));

        let warming_up: RpcEnvelope = serde_json::from_value(json!({
            "result": null,
            "error": { "code": -28, "message": "Loading block index..." },
            "id": "chainreg"
        }))
        .unwrap();
        assert!(matches!(
            warming_up.into_result(),
            Err(DaemonError::Rpc { code: -28, .. })
        ));

        let ok: RpcEnvelope =
            serde_json::from_value(json!({ "result": 812, "error": null, "id": "chainreg" })).unwrap();
        assert_eq!(ok.into_result().unwrap(), json!(812));
    }

    #[test]
    fn test_coin_conversion_rounds() {
        assert_eq!(coins_to_base_units(0.1).unwrap(), 10_000_000);
        assert_eq!(coins_to_base_units(0.00000001).unwrap(), 1);
        assert!(coins_to_base_units(-1.0).is_err());
        assert!(coins_to_base_units(f64::NAN).is_err());
    }

    #[test]
    fn test_client_builds_with_auth() {
        let config = RpcDaemonConfig::new("http://127.0.0.1:8332").with_auth("user", "pass");
        let daemon = RpcDaemon::new(config).unwrap();
        assert_eq!(daemon.config.user, "user");
        assert_eq!(daemon.config.password.as_deref(), Some("pass"));
    }
}
