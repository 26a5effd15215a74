use crate::chain::ChainView;
use crate::config::{ChainProfile, ProviderConfig, ProviderKind};
use crate::encoding::{fmt_address, fmt_bytes, fmt_h256, user_op_to_json};
use crate::error::PipelineError;
use crate::rpc::JsonRpcClient;
use crate::types::{
    GasEstimates, GasFees, OperationReceipt, SponsorBundle, SubmissionId, UserOperation,
};
use async_trait::async_trait;
use ethers::types::{Address, U256};
use serde_json::Value;

use super::{parse_gas_estimates, parse_paymaster_and_data, parse_quantity_field, parse_user_op_hash};

/// Alchemy bundler + Gas Manager dialect. Fee bounds come from the rundler
/// priority-fee oracle; sponsorship uses the combined
/// `alchemy_requestGasAndPaymasterAndData` call, which simulates with the
/// dummy signature already on the operation and returns gas limits, fee
/// bounds and paymaster data in one envelope.
pub struct AlchemyAdapter {
    client: JsonRpcClient,
    policy_id: String,
    entry_point: Address,
}

impl AlchemyAdapter {
    pub fn new(config: &ProviderConfig, profile: &ChainProfile) -> Result<Self, PipelineError> {
        let policy_id = config.policy_id.clone().ok_or_else(|| {
            PipelineError::Configuration("alchemy requires a gas manager policy id".into())
        })?;
        Ok(Self {
            client: JsonRpcClient::new(ProviderKind::Alchemy, config.url.clone()),
            policy_id,
            entry_point: profile.entry_point,
        })
    }
}

/// Builds the sponsor bundle from the combined-call envelope.
fn parse_sponsor_bundle(
    client: &JsonRpcClient,
    res: &Value,
) -> Result<SponsorBundle, PipelineError> {
    const METHOD: &str = "alchemy_requestGasAndPaymasterAndData";
    let paymaster_and_data = parse_paymaster_and_data(client, METHOD, res)?;
    let gas = parse_gas_estimates(client, METHOD, res)?;
    let fees = GasFees {
        max_fee_per_gas: parse_quantity_field(client, METHOD, res, "maxFeePerGas")?,
        max_priority_fee_per_gas: parse_quantity_field(client, METHOD, res, "maxPriorityFeePerGas")?,
    };
    Ok(SponsorBundle {
        paymaster_and_data,
        gas: Some(gas),
        fees: Some(fees),
    })
}

#[async_trait]
impl super::ProviderAdapter for AlchemyAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Alchemy
    }

    fn sponsors_gas(&self) -> bool {
        true
    }

    async fn gas_fees(&self, chain: &dyn ChainView) -> Result<GasFees, PipelineError> {
        const METHOD: &str = "rundler_maxPriorityFeePerGas";
        let res = self.client.call(METHOD, serde_json::json!([])).await?;
        let oracle = res
            .as_str()
            .ok_or_else(|| self.client.malformed(METHOD, format!("expected quantity, got {res}")))
            .and_then(|s| {
                crate::encoding::parse_u256_quantity(s)
                    .map_err(|_| self.client.malformed(METHOD, format!("not a quantity: {s}")))
            })?;

        // Pad the oracle value by half so the bundler's own fee floor moving
        // between estimation and submission does not strand the operation.
        let max_priority_fee_per_gas = oracle.saturating_mul(U256::from(3)) / U256::from(2);
        let base_fee = chain.base_fee().await?;
        Ok(GasFees {
            max_fee_per_gas: base_fee.saturating_add(max_priority_fee_per_gas),
            max_priority_fee_per_gas,
        })
    }

    async fn estimate_gas(&self, op: &UserOperation) -> Result<GasEstimates, PipelineError> {
        let params = serde_json::json!([user_op_to_json(op), fmt_address(self.entry_point)]);
        let res = self.client.call("eth_estimateUserOperationGas", params).await?;
        parse_gas_estimates(&self.client, "eth_estimateUserOperationGas", &res)
    }

    async fn sponsor(&self, op: &UserOperation) -> Result<Option<SponsorBundle>, PipelineError> {
        let params = serde_json::json!([{
            "policyId": self.policy_id,
            "entryPoint": fmt_address(self.entry_point),
            "dummySignature": fmt_bytes(&op.signature),
            "userOperation": user_op_to_json(op),
        }]);
        let res = self
            .client
            .call("alchemy_requestGasAndPaymasterAndData", params)
            .await?;
        parse_sponsor_bundle(&self.client, &res).map(Some)
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
                    "alchemy cannot poll relay task {task}; task ids belong to gelato"
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> JsonRpcClient {
        JsonRpcClient::new(ProviderKind::Alchemy, "http://localhost".into())
    }

    #[test]
    fn combined_envelope_yields_a_full_bundle() {
        let res = json!({
            "paymasterAndData": "0xdeadbeef",
            "callGasLimit": "0x186a0",
            "verificationGasLimit": "0x30d40",
            "preVerificationGas": "0xc350",
            "maxFeePerGas": "0x3b9aca00",
            "maxPriorityFeePerGas": "0x5f5e100"
        });
        let bundle = parse_sponsor_bundle(&client(), &res).unwrap();
        assert_eq!(bundle.paymaster_and_data.as_ref(), &[0xde, 0xad, 0xbe, 0xef]);
        let gas = bundle.gas.unwrap();
        assert_eq!(gas.call_gas_limit, 100_000.into());
        assert_eq!(gas.verification_gas_limit, 200_000.into());
        assert_eq!(gas.pre_verification_gas, 50_000.into());
        let fees = bundle.fees.unwrap();
        assert_eq!(fees.max_fee_per_gas, U256::from(1_000_000_000u64));
        assert_eq!(fees.max_priority_fee_per_gas, U256::from(100_000_000u64));
    }

    #[test]
    fn combined_envelope_without_gas_fields_is_rejected() {
        let res = json!({ "paymasterAndData": "0xdeadbeef" });
        assert!(parse_sponsor_bundle(&client(), &res).is_err());
    }
}
