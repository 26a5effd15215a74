use crate::chain::ChainView;
use crate::config::{ChainProfile, ProviderConfig, ProviderKind};
use crate::encoding::{fmt_address, fmt_h256, user_op_to_json};
use crate::error::PipelineError;
use crate::rpc::JsonRpcClient;
use crate::types::{
    GasEstimates, GasFees, OperationReceipt, SponsorBundle, SubmissionId, UserOperation,
};
use async_trait::async_trait;
use ethers::types::{Address, Bytes};
use serde_json::Value;

use super::{parse_gas_estimates, parse_quantity_field, parse_user_op_hash};

/// Pimlico bundler dialect: standard estimation/submission methods plus the
/// `pimlico_getUserOperationGasPrice` fee oracle. Sponsorship is the fixed
/// ERC-20 token paymaster, whose address must sit in `paymasterAndData`
/// before estimation so the simulation accounts for the token transfer.
pub struct PimlicoAdapter {
    client: JsonRpcClient,
    entry_point: Address,
    erc20_paymaster: Option<Address>,
}

impl PimlicoAdapter {
    pub fn new(config: &ProviderConfig, profile: &ChainProfile) -> Self {
        Self {
            client: JsonRpcClient::new(ProviderKind::Pimlico, config.url.clone()),
            entry_point: profile.entry_point,
            erc20_paymaster: config.erc20_paymaster,
        }
    }
}

/// Pulls one tier out of the `{slow, standard, fast}` oracle response.
fn parse_fee_tier(
    client: &JsonRpcClient,
    res: &Value,
    tier: &str,
) -> Result<GasFees, PipelineError> {
    const METHOD: &str = "pimlico_getUserOperationGasPrice";
    let tier_obj = res
        .get(tier)
        .ok_or_else(|| client.malformed(METHOD, format!("missing fee tier {tier}")))?;
    Ok(GasFees {
        max_fee_per_gas: parse_quantity_field(client, METHOD, tier_obj, "maxFeePerGas")?,
        max_priority_fee_per_gas: parse_quantity_field(
            client,
            METHOD,
            tier_obj,
            "maxPriorityFeePerGas",
        )?,
    })
}

#[async_trait]
impl super::ProviderAdapter for PimlicoAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Pimlico
    }

    async fn gas_fees(&self, _chain: &dyn ChainView) -> Result<GasFees, PipelineError> {
        let res = self
            .client
            .call("pimlico_getUserOperationGasPrice", serde_json::json!([]))
            .await?;
        parse_fee_tier(&self.client, &res, "fast")
    }

    async fn paymaster_stub(&self, _op: &UserOperation) -> Result<Option<Bytes>, PipelineError> {
        Ok(self
            .erc20_paymaster
            .map(|paymaster| Bytes::from(paymaster.as_bytes().to_vec())))
    }

    async fn estimate_gas(&self, op: &UserOperation) -> Result<GasEstimates, PipelineError> {
        let params = serde_json::json!([user_op_to_json(op), fmt_address(self.entry_point)]);
        let res = self.client.call("eth_estimateUserOperationGas", params).await?;
        parse_gas_estimates(&self.client, "eth_estimateUserOperationGas", &res)
    }

    async fn sponsor(&self, _op: &UserOperation) -> Result<Option<SponsorBundle>, PipelineError> {
        // The ERC-20 paymaster needs no per-operation payload beyond its
        // address, which is already in place from the stub step.
        Ok(None)
    }

    async fn submit(&self, op: &UserOperation) -> Result<SubmissionId, PipelineError> {
        let params = serde_json::json!([user_op_to_json(op), fmt_address(self.entry_point)]);
        let res = self.client.call("eth_sendUserOperation", params).await?;
        parse_user_op_hash(&self.client, "eth_sendUserOperation", &res)
    }

    async fn receipt(&self, id: &SubmissionId) -> Result<Option<OperationReceipt>, PipelineError> {
        let hash = match id {
            SubmissionId::UserOpHash(h) => h,
            SubmissionId::TaskId(task) => {
                return Err(PipelineError::Configuration(format!(
                    "pimlico cannot poll relay task {task}; task ids belong to gelato"
                )))
            }
        };
        let params = serde_json::json!([fmt_h256(*hash)]);
        let res = self.client.call("eth_getUserOperationReceipt", params).await?;
        if res.is_null() {
            return Ok(None);
        }
        OperationReceipt::from_json(&res)
            .map(Some)
            .map_err(|e| self.client.malformed("eth_getUserOperationReceipt", e))
    }
}
