use crate::chain::ChainView;
use crate::config::{ChainProfile, ProviderConfig, ProviderKind};
use crate::encoding::{fmt_address, fmt_h256, fmt_u256, user_op_to_json};
use crate::error::PipelineError;
use crate::rpc::JsonRpcClient;
use crate::types::{
    GasEstimates, GasFees, OperationReceipt, SponsorBundle, SubmissionId, UserOperation,
};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use serde_json::Value;

use super::{parse_gas_estimates, parse_paymaster_and_data, parse_user_op_hash};

/// The plain ERC-4337 dialect: standard `eth_*UserOperation*` methods against
/// any conforming bundler, optionally paired with an ERC-7677 paymaster web
/// service for sponsorship.
pub struct EntryPointRpcAdapter {
    client: JsonRpcClient,
    paymaster: Option<JsonRpcClient>,
    policy_id: Option<String>,
    entry_point: Address,
    chain_id: u64,
}

impl EntryPointRpcAdapter {
    pub fn new(config: &ProviderConfig, profile: &ChainProfile) -> Self {
        Self {
            client: JsonRpcClient::new(ProviderKind::EntryPointRpc, config.url.clone()),
            paymaster: config
                .paymaster_url
                .as_ref()
                .map(|url| JsonRpcClient::new(ProviderKind::EntryPointRpc, url.clone())),
            policy_id: config.policy_id.clone(),
            entry_point: profile.entry_point,
            chain_id: profile.chain_id,
        }
    }

    /// ERC-7677 request params: operation, entry point, chain id, and a
    /// free-form context object carrying the sponsorship policy.
    fn paymaster_params(&self, op: &UserOperation) -> Value {
        let mut ctx = serde_json::json!({});
        if let Some(policy) = self.policy_id.as_ref() {
            ctx["policyId"] = Value::String(policy.clone());
        }
        serde_json::json!([
            user_op_to_json(op),
            fmt_address(self.entry_point),
            fmt_u256(U256::from(self.chain_id)),
            ctx
        ])
    }
}

#[async_trait]
impl super::ProviderAdapter for EntryPointRpcAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::EntryPointRpc
    }

    async fn gas_fees(&self, chain: &dyn ChainView) -> Result<GasFees, PipelineError> {
        // No provider-side fee oracle in the standard dialect.
        let gas_price = chain.gas_price().await?;
        Ok(GasFees {
            max_fee_per_gas: gas_price,
            max_priority_fee_per_gas: gas_price,
        })
    }

    async fn paymaster_stub(&self, op: &UserOperation) -> Result<Option<Bytes>, PipelineError> {
        let Some(paymaster) = self.paymaster.as_ref() else {
            return Ok(None);
        };
        let res = paymaster
            .call("pm_getPaymasterStubData", self.paymaster_params(op))
            .await?;
        parse_paymaster_and_data(paymaster, "pm_getPaymasterStubData", &res).map(Some)
    }

    async fn estimate_gas(&self, op: &UserOperation) -> Result<GasEstimates, PipelineError> {
        let params = serde_json::json!([user_op_to_json(op), fmt_address(self.entry_point)]);
        let res = self.client.call("eth_estimateUserOperationGas", params).await?;
        parse_gas_estimates(&self.client, "eth_estimateUserOperationGas", &res)
    }

    async fn sponsor(&self, op: &UserOperation) -> Result<Option<SponsorBundle>, PipelineError> {
        let Some(paymaster) = self.paymaster.as_ref() else {
            return Ok(None);
        };
        let res = paymaster
            .call("pm_getPaymasterData", self.paymaster_params(op))
            .await?;
        let paymaster_and_data = parse_paymaster_and_data(paymaster, "pm_getPaymasterData", &res)?;
        Ok(Some(SponsorBundle {
            paymaster_and_data,
            gas: None,
            fees: None,
        }))
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
                    "entrypoint-rpc cannot poll relay task {task}; task ids belong to gelato"
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
