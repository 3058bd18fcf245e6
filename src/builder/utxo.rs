use crate::policy::UtxoEntry;
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum UtxoSourceError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

#[async_trait]
pub trait UtxoSource: Send + Sync {
    async fn fetch(&self, address: &str, network_id: &str) -> Result<Vec<RawUtxoRow>, UtxoSourceError>;
}

/// Shape of a single row as RPC reports it, before `normalize_and_validate`
/// turns it into a [`UtxoEntry`]. `spec.md` §4.D step 2: "reject rows
/// whose `txid` isn't 64-hex, whose `index` is negative, whose amount is
/// non-positive, or whose `scriptHex` fails validation."
#[derive(Debug, Clone, Deserialize)]
pub struct RawUtxoRow {
    pub txid: String,
    pub index: i64,
    pub amount: i128,
    pub script_hex: String,
    pub block_daa_score: u64,
}

/// Normalise raw RPC rows into [`UtxoEntry`], dropping (and counting) any
/// row that fails shape validation rather than failing the whole fetch.
pub fn normalize_and_validate(rows: Vec<RawUtxoRow>) -> (Vec<UtxoEntry>, usize) {
    let mut entries = Vec::with_capacity(rows.len());
    let mut rejected = 0usize;
    for row in rows {
        if !is_valid_txid(&row.txid) || row.index < 0 || row.amount <= 0 || !is_valid_script_hex(&row.script_hex) {
            rejected += 1;
            continue;
        }
        entries.push(UtxoEntry {
            txid: row.txid.to_lowercase(),
            index: row.index as u32,
            amount: crate::money::Sompi::new(row.amount as u128),
            script_hex: row.script_hex,
            block_daa_score: row.block_daa_score,
        });
    }
    (entries, rejected)
}

fn is_valid_txid(txid: &str) -> bool {
    txid.len() == 64 && txid.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_valid_script_hex(script_hex: &str) -> bool {
    !script_hex.is_empty() && script_hex.len() % 2 == 0 && script_hex.chars().all(|c| c.is_ascii_hexdigit())
}

/// Production source: live RPC over HTTPS, per `spec.md` §4.D step 1.
pub struct HttpUtxoSource {
    client: reqwest::Client,
    mainnet_base: Option<String>,
    testnet10_base: Option<String>,
    timeout: std::time::Duration,
}

impl HttpUtxoSource {
    pub fn new(
        mainnet_base: Option<String>,
        testnet10_base: Option<String>,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            mainnet_base,
            testnet10_base,
            timeout,
        }
    }
}

#[async_trait]
impl UtxoSource for HttpUtxoSource {
    async fn fetch(&self, address: &str, network_id: &str) -> Result<Vec<RawUtxoRow>, UtxoSourceError> {
        let base = match network_id {
            "mainnet" => self.mainnet_base.as_deref(),
            "testnet-10" => self.testnet10_base.as_deref(),
            _ => None,
        }
        .ok_or_else(|| UtxoSourceError::Request("no rpc base configured for network".to_string()))?;
        let url = format!("{base}/addresses/{address}/utxos");
        let response = tokio::time::timeout(self.timeout, self.client.get(&url).send())
            .await
            .map_err(|_| UtxoSourceError::Timeout(self.timeout))?
            .map_err(|e| UtxoSourceError::Request(e.to_string()))?;
        response
            .json::<Vec<RawUtxoRow>>()
            .await
            .map_err(|e| UtxoSourceError::Request(e.to_string()))
    }
}

#[cfg(test)]
pub mod fakes {
    use super::*;

    pub struct FakeUtxoSource {
        pub rows: Vec<RawUtxoRow>,
    }

    #[async_trait]
    impl UtxoSource for FakeUtxoSource {
        async fn fetch(&self, _address: &str, _network_id: &str) -> Result<Vec<RawUtxoRow>, UtxoSourceError> {
            Ok(self.rows.clone())
        }
    }
}
