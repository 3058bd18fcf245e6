use super::error::BuilderError;
use crate::money::{Sompi, json_amount};
use crate::policy::UtxoEntry;
use async_trait::async_trait;
use std::time::Duration;

pub struct TxBuildRequest<'a> {
    pub entries: &'a [UtxoEntry],
    pub change_address: &'a str,
    pub outputs: &'a [(String, Sompi)],
    pub priority_fee: Sompi,
    pub network_id: &'a str,
}

pub struct TxBuildResult {
    pub tx_json: serde_json::Value,
    pub txid: Option<String>,
}

/// The native transaction builder is, per `spec.md` §4.D, explicitly
/// out-of-core: "payload shape is defined by the native builder library
/// and relayed verbatim." There is no `kaspa-wasm`/`kaspa-ng` binding
/// available to a bare Rust crate, so [`NativeTxBuilder`] documents that
/// boundary by constructing the envelope directly as JSON rather than
/// pretending to call a real library.
#[async_trait]
pub trait TxBuilder: Send + Sync {
    async fn build(&self, request: &TxBuildRequest<'_>) -> Result<TxBuildResult, BuilderError>;
}

pub struct NativeTxBuilder;

#[async_trait]
impl TxBuilder for NativeTxBuilder {
    async fn build(&self, request: &TxBuildRequest<'_>) -> Result<TxBuildResult, BuilderError> {
        let inputs: Vec<serde_json::Value> = request
            .entries
            .iter()
            .map(|e| {
                serde_json::json!({
                    "txid": e.txid,
                    "index": e.index,
                    "amount": json_amount(e.amount.to_raw()),
                    "scriptHex": e.script_hex,
                })
            })
            .collect();
        let outputs: Vec<serde_json::Value> = request
            .outputs
            .iter()
            .map(|(addr, amount)| {
                serde_json::json!({
                    "address": addr,
                    "amount": json_amount(amount.to_raw()),
                })
            })
            .collect();
        let tx_json = serde_json::json!({
            "version": 0,
            "inputs": inputs,
            "outputs": outputs,
            "changeAddress": request.change_address,
            "priorityFee": json_amount(request.priority_fee.to_raw()),
            "networkId": request.network_id,
        });
        Ok(TxBuildResult { tx_json, txid: None })
    }
}

/// Invokes a configured external command, writing the build request as
/// JSON to its stdin and reading the built envelope from its stdout.
pub struct CommandTxBuilder {
    pub command_path: String,
    pub timeout: Duration,
}

#[async_trait]
impl TxBuilder for CommandTxBuilder {
    async fn build(&self, request: &TxBuildRequest<'_>) -> Result<TxBuildResult, BuilderError> {
        use tokio::io::AsyncWriteExt;
        use tokio::process::Command;

        let payload = serde_json::json!({
            "entries": request.entries,
            "changeAddress": request.change_address,
            "outputs": request.outputs.iter().map(|(a, v)| serde_json::json!({"address": a, "amount": json_amount(v.to_raw())})).collect::<Vec<_>>(),
            "priorityFee": json_amount(request.priority_fee.to_raw()),
            "networkId": request.network_id,
        });

        let mut child = Command::new(&self.command_path)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| BuilderError::NativeBuildFailed(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            let bytes = serde_json::to_vec(&payload).map_err(|e| BuilderError::Internal(e.to_string()))?;
            stdin
                .write_all(&bytes)
                .await
                .map_err(|e| BuilderError::NativeBuildFailed(e.to_string()))?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| BuilderError::Timeout(self.timeout))?
            .map_err(|e| BuilderError::NativeBuildFailed(e.to_string()))?;

        if !output.status.success() {
            return Err(BuilderError::NativeBuildFailed(format!(
                "command exited with {}",
                output.status
            )));
        }

        let tx_json: serde_json::Value =
            serde_json::from_slice(&output.stdout).map_err(|e| BuilderError::NativeBuildFailed(e.to_string()))?;
        Ok(TxBuildResult { tx_json, txid: None })
    }
}

/// Forwards the build request to a remote proxy over HTTP.
pub struct ProxyTxBuilder {
    pub client: reqwest::Client,
    pub proxy_url: String,
    pub timeout: Duration,
}

#[async_trait]
impl TxBuilder for ProxyTxBuilder {
    async fn build(&self, request: &TxBuildRequest<'_>) -> Result<TxBuildResult, BuilderError> {
        let payload = serde_json::json!({
            "entries": request.entries,
            "changeAddress": request.change_address,
            "outputs": request.outputs.iter().map(|(a, v)| serde_json::json!({"address": a, "amount": json_amount(v.to_raw())})).collect::<Vec<_>>(),
            "priorityFee": json_amount(request.priority_fee.to_raw()),
            "networkId": request.network_id,
        });
        let response = tokio::time::timeout(self.timeout, self.client.post(&self.proxy_url).json(&payload).send())
            .await
            .map_err(|_| BuilderError::Timeout(self.timeout))?
            .map_err(|e| BuilderError::NativeBuildFailed(e.to_string()))?;
        let tx_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BuilderError::NativeBuildFailed(e.to_string()))?;
        Ok(TxBuildResult { tx_json, txid: None })
    }
}

/// Manual pass-through: no network/UTXO fetch, no construction. Echoes a
/// draft envelope back to the caller describing exactly what they asked
/// for, for the caller's own client-side signer to build from.
pub struct ManualTxBuilder;

#[async_trait]
impl TxBuilder for ManualTxBuilder {
    async fn build(&self, request: &TxBuildRequest<'_>) -> Result<TxBuildResult, BuilderError> {
        let tx_json = serde_json::json!({
            "manual": true,
            "changeAddress": request.change_address,
            "outputs": request.outputs.iter().map(|(a, v)| serde_json::json!({"address": a, "amount": json_amount(v.to_raw())})).collect::<Vec<_>>(),
            "priorityFee": json_amount(request.priority_fee.to_raw()),
            "networkId": request.network_id,
        });
        Ok(TxBuildResult { tx_json, txid: None })
    }
}

#[cfg(test)]
pub mod fakes {
    use super::*;

    pub struct FakeTxBuilder {
        pub should_fail: bool,
    }

    #[async_trait]
    impl TxBuilder for FakeTxBuilder {
        async fn build(&self, request: &TxBuildRequest<'_>) -> Result<TxBuildResult, BuilderError> {
            if self.should_fail {
                return Err(BuilderError::NativeBuildFailed("mock failure".to_string()));
            }
            Ok(TxBuildResult {
                tx_json: serde_json::json!({"inputCount": request.entries.len()}),
                txid: Some("fake-txid".to_string()),
            })
        }
    }
}
