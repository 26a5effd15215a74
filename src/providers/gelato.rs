use crate::chain::ChainView;
use crate::config::{ChainProfile, ProviderConfig, ProviderKind};
use crate::encoding::{fmt_address, user_op_to_json};
use crate::error::{PipelineError, ProviderFailure};
use crate::rpc::JsonRpcClient;
use crate::types::{
    GasEstimates, GasFees, OperationReceipt, SponsorBundle, SubmissionId, UserOperation,
};
use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use serde_json::Value;

use super::parse_gas_estimates;

/// Gelato relay dialect. The JSON-RPC endpoint is derived from the relay
/// base URL, the chain id, and the sponsor API key; method names are the
/// standard ERC-4337 ones, but submission returns a relay task id rather
/// than a userOpHash, and inclusion is tracked through the relay's
/// task-status endpoint instead of `eth_getUserOperationReceipt`.
pub struct GelatoAdapter {
    client: JsonRpcClient,
    /// Relay base URL, for task-status GETs.
    base: String,
    entry_point: Address,
}

impl GelatoAdapter {
    pub fn new(config: &ProviderConfig, profile: &ChainProfile) -> Result<Self, PipelineError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            PipelineError::Configuration("gelato requires a sponsor API key".into())
        })?;
        let base = config.url.trim_end_matches('/').to_string();
        let rpc_url = format!(
            "{base}/bundlers/{}/rpc?sponsorApiKey={api_key}",
            profile.chain_id
        );
        Ok(Self {
            client: JsonRpcClient::new(ProviderKind::Gelato, rpc_url),
            base,
            entry_point: profile.entry_point,
        })
    }
}

/// Maps one task-status response onto the poller's vocabulary: `None` while
/// the relay is still working, a receipt once it has executed, an error when
/// the relay gave up on the task.
fn parse_task_status(body: &Value) -> Result<Option<OperationReceipt>, PipelineError> {
    let malformed = |detail: String| {
        PipelineError::provider(
            ProviderKind::Gelato,
            "tasks/status",
            ProviderFailure::MalformedResponse(detail),
        )
    };

    let task = body
        .get("task")
        .ok_or_else(|| malformed("missing task object".into()))?;
    let state = task
        .get("taskState")
        .and_then(|s| s.as_str())
        .ok_or_else(|| malformed("missing taskState".into()))?;

    let executed = match state {
        "CheckPending" | "ExecPending" | "WaitingForConfirmation" => return Ok(None),
        "ExecSuccess" => true,
        "ExecReverted" => false,
        "Cancelled" => {
            let message = task
                .get("lastCheckMessage")
                .and_then(|m| m.as_str())
                .unwrap_or("task cancelled by relay")
                .to_string();
            return Err(PipelineError::ValidationRejected {
                provider: ProviderKind::Gelato,
                message,
            });
        }
        other => return Err(malformed(format!("unknown taskState {other}"))),
    };

    let tx_hash = task
        .get("transactionHash")
        .and_then(|s| s.as_str())
        .ok_or_else(|| malformed(format!("taskState {state} without transactionHash")))
        .and_then(|s| {
            crate::encoding::parse_h256(s).map_err(|_| malformed(format!("invalid transactionHash {s}")))
        })?;

    // The relay reports no userOpHash or per-operation gas accounting; the
    // task id is the tracking key and those fields stay zero.
    Ok(Some(OperationReceipt {
        user_op_hash: H256::zero(),
        tx_hash,
        success: executed,
        actual_gas_used: U256::zero(),
        actual_gas_cost: U256::zero(),
        tx_gas_used: U256::zero(),
        logs: Vec::new(),
    }))
}

#[async_trait]
impl super::ProviderAdapter for GelatoAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gelato
    }

    fn sponsors_externally(&self) -> bool {
        true
    }

    async fn gas_fees(&self, chain: &dyn ChainView) -> Result<GasFees, PipelineError> {
        // The relay has no fee oracle; the bounds cap what the sponsor key
        // ends up paying.
        let gas_price = chain.gas_price().await?;
        Ok(GasFees {
            max_fee_per_gas: gas_price,
            max_priority_fee_per_gas: gas_price,
        })
    }

    async fn estimate_gas(&self, op: &UserOperation) -> Result<GasEstimates, PipelineError> {
        let params = serde_json::json!([user_op_to_json(op), fmt_address(self.entry_point)]);
        let res = self.client.call("eth_estimateUserOperationGas", params).await?;
        parse_gas_estimates(&self.client, "eth_estimateUserOperationGas", &res)
    }

    async fn sponsor(&self, _op: &UserOperation) -> Result<Option<SponsorBundle>, PipelineError> {
        // Sponsorship rides on the API key baked into the endpoint URL; the
        // operation carries no paymaster data.
        Ok(None)
    }

    async fn submit(&self, op: &UserOperation) -> Result<SubmissionId, PipelineError> {
        let params = serde_json::json!([user_op_to_json(op), fmt_address(self.entry_point)]);
        let res = self.client.call("eth_sendUserOperation", params).await?;
        match res.as_str() {
            Some(task_id) if !task_id.is_empty() => Ok(SubmissionId::TaskId(task_id.to_string())),
            _ => Err(self
                .client
                .malformed("eth_sendUserOperation", format!("expected task id, got {res}"))),
        }
    }

    async fn receipt(&self, id: &SubmissionId) -> Result<Option<OperationReceipt>, PipelineError> {
        let task_id = match id {
            SubmissionId::TaskId(t) => t,
            SubmissionId::UserOpHash(h) => {
                return Err(PipelineError::Configuration(format!(
                    "gelato tracks relay task ids, not userOpHash {h:#x}"
                )))
            }
        };

        let url = format!("{}/tasks/status/{task_id}", self.base);
        let transport = |e: reqwest::Error| {
            PipelineError::provider(
                ProviderKind::Gelato,
                "tasks/status",
                ProviderFailure::Transport(e),
            )
        };
        let body: Value = self
            .client
            .http()
            .get(&url)
            .send()
            .await
            .map_err(transport)?
            .json()
            .await
            .map_err(transport)?;

        parse_task_status(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TX: &str = "0x2222222222222222222222222222222222222222222222222222222222222222";

    #[test]
    fn pending_states_mean_not_yet_included() {
        for state in ["CheckPending", "ExecPending", "WaitingForConfirmation"] {
            let body = json!({ "task": { "taskState": state } });
            assert!(parse_task_status(&body).unwrap().is_none(), "{state}");
        }
    }

    #[test]
    fn executed_task_becomes_a_receipt() {
        let body = json!({ "task": { "taskState": "ExecSuccess", "transactionHash": TX } });
        let receipt = parse_task_status(&body).unwrap().unwrap();
        assert!(receipt.success);
        assert_eq!(format!("{:#x}", receipt.tx_hash), TX);
    }

    #[test]
    fn reverted_task_is_a_failed_receipt() {
        let body = json!({ "task": { "taskState": "ExecReverted", "transactionHash": TX } });
        let receipt = parse_task_status(&body).unwrap().unwrap();
        assert!(!receipt.success);
    }

    #[test]
    fn cancelled_task_is_a_validation_rejection() {
        let body = json!({
            "task": { "taskState": "Cancelled", "lastCheckMessage": "AA21 didn't pay prefund" }
        });
        let err = parse_task_status(&body).unwrap_err();
        assert!(matches!(err, PipelineError::ValidationRejected { .. }), "{err}");
    }

    #[test]
    fn unknown_state_is_malformed() {
        let body = json!({ "task": { "taskState": "Mystery" } });
        assert!(parse_task_status(&body).is_err());
    }

    #[test]
    fn endpoint_embeds_chain_and_sponsor_key() {
        use crate::config::{ChainProfile, ProviderConfig};
        use ethers::types::Bytes;
        use std::str::FromStr;

        let profile = ChainProfile {
            chain_id: 11155111,
            rpc_url: "http://localhost:8545".into(),
            entry_point: Address::from_str("0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789").unwrap(),
            factory: Address::zero(),
            singleton: Address::zero(),
            proxy_creation_code: Bytes::default(),
            module: Address::zero(),
            fallback_handler: Address::zero(),
        };
        let config = ProviderConfig {
            kind: ProviderKind::Gelato,
            url: "https://api.gelato.example/".into(),
            api_key: Some("sponsor-key".into()),
            policy_id: None,
            paymaster_url: None,
            erc20_paymaster: None,
        };
        let adapter = GelatoAdapter::new(&config, &profile).unwrap();
        assert_eq!(
            adapter.client.url(),
            "https://api.gelato.example/bundlers/11155111/rpc?sponsorApiKey=sponsor-key"
        );
    }
}
