pub mod alchemy;
pub mod bundler;
pub mod gelato;
pub mod pimlico;

use crate::chain::ChainView;
use crate::config::{ChainProfile, ProviderConfig, ProviderKind};
use crate::encoding::parse_bytes;
use crate::error::PipelineError;
use crate::rpc::JsonRpcClient;
use crate::types::{GasEstimates, GasFees, OperationReceipt, SponsorBundle, SubmissionId, UserOperation};
use async_trait::async_trait;
use ethers::types::Bytes;
use serde_json::Value;

pub use alchemy::AlchemyAdapter;
pub use bundler::EntryPointRpcAdapter;
pub use gelato::GelatoAdapter;
pub use pimlico::PimlicoAdapter;

/// One bundler/paymaster backend, behind its own JSON-RPC dialect.
///
/// Every method is a single request/response exchange. Adapters never retry
/// internally; transient failures surface as typed errors and the caller
/// decides what to do with them.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// True when `sponsor` returns gas limits and fee bounds alongside the
    /// paymaster data, replacing the separate estimation step.
    fn sponsors_gas(&self) -> bool {
        false
    }

    /// True when the backend pays gas itself without placing paymaster data
    /// on the operation (relay-side sponsorship). Such operations carry no
    /// prefund requirement even with empty `paymasterAndData`.
    fn sponsors_externally(&self) -> bool {
        false
    }

    /// Fee bounds for the operation. Dialects without a fee oracle of their
    /// own fall back to the chain's gas price.
    async fn gas_fees(&self, chain: &dyn ChainView) -> Result<GasFees, PipelineError>;

    /// Paymaster bytes to place on the operation *before* estimation, when
    /// the dialect needs them there (fixed ERC-20 paymasters, ERC-7677 stub
    /// data). `Ok(None)` when nothing needs stubbing.
    async fn paymaster_stub(
        &self,
        _op: &UserOperation,
    ) -> Result<Option<Bytes>, PipelineError> {
        Ok(None)
    }

    /// `eth_estimateUserOperationGas` (or the dialect's equivalent).
    async fn estimate_gas(&self, op: &UserOperation) -> Result<GasEstimates, PipelineError>;

    /// Final sponsorship data, requested after estimation. `Ok(None)` means
    /// this provider adds no paymaster data and the operation keeps whatever
    /// it already carries.
    async fn sponsor(&self, op: &UserOperation) -> Result<Option<SponsorBundle>, PipelineError>;

    /// Sends the signed operation; a non-error response always yields a
    /// submission id.
    async fn submit(&self, op: &UserOperation) -> Result<SubmissionId, PipelineError>;

    /// One receipt lookup. `Ok(None)` = not yet included.
    async fn receipt(&self, id: &SubmissionId) -> Result<Option<OperationReceipt>, PipelineError>;
}

/// Builds the adapter for a validated (provider, chain) pair.
pub fn provider_for(
    config: &ProviderConfig,
    profile: &ChainProfile,
) -> Result<Box<dyn ProviderAdapter>, PipelineError> {
    config.validate(profile.chain_id)?;

    Ok(match config.kind {
        ProviderKind::Pimlico => Box::new(PimlicoAdapter::new(config, profile)),
        ProviderKind::Alchemy => Box::new(AlchemyAdapter::new(config, profile)?),
        ProviderKind::Gelato => Box::new(GelatoAdapter::new(config, profile)?),
        ProviderKind::EntryPointRpc => Box::new(EntryPointRpcAdapter::new(config, profile)),
    })
}

/// Parses the standard three-field gas estimate envelope.
pub(crate) fn parse_gas_estimates(
    client: &JsonRpcClient,
    method: &str,
    res: &Value,
) -> Result<GasEstimates, PipelineError> {
    Ok(GasEstimates {
        call_gas_limit: parse_quantity_field(client, method, res, "callGasLimit")?,
        verification_gas_limit: parse_quantity_field(client, method, res, "verificationGasLimit")?,
        pre_verification_gas: parse_quantity_field(client, method, res, "preVerificationGas")?,
    })
}

pub(crate) fn parse_quantity_field(
    client: &JsonRpcClient,
    method: &str,
    res: &Value,
    key: &str,
) -> Result<ethers::types::U256, PipelineError> {
    let s = res
        .get(key)
        .and_then(|x| x.as_str())
        .ok_or_else(|| client.malformed(method, format!("missing or invalid field {key}")))?;
    crate::encoding::parse_u256_quantity(s)
        .map_err(|_| client.malformed(method, format!("field {key} is not a quantity: {s}")))
}

/// Most bundlers return the userOpHash as a bare JSON string; some wrap it
/// in an object. Accept the known shapes, reject everything else.
pub(crate) fn parse_user_op_hash(
    client: &JsonRpcClient,
    method: &str,
    res: &Value,
) -> Result<SubmissionId, PipelineError> {
    let hash_str = if let Some(s) = res.as_str() {
        s
    } else if let Some(s) = res.get("result").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOpHash").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOperationHash").and_then(|v| v.as_str()) {
        s
    } else {
        return Err(client.malformed(
            method,
            format!("unexpected submission result shape: {res}"),
        ));
    };

    crate::encoding::parse_h256(hash_str)
        .map(SubmissionId::UserOpHash)
        .map_err(|_| client.malformed(method, format!("invalid userOpHash: {hash_str}")))
}

/// Parses the ERC-7677 paymaster response: a top-level `paymasterAndData`,
/// or the field nested under an `entrypointV06Response` wrapper.
pub(crate) fn parse_paymaster_and_data(
    client: &JsonRpcClient,
    method: &str,
    result: &Value,
) -> Result<Bytes, PipelineError> {
    if let Some(s) = result.get("paymasterAndData").and_then(|x| x.as_str()) {
        return parse_bytes(s)
            .map_err(|_| client.malformed(method, "invalid hex in paymasterAndData"));
    }

    let v06 = result
        .get("entrypointV06Response")
        .or_else(|| result.get("entryPointV06Response"))
        .ok_or_else(|| {
            client.malformed(
                method,
                "missing paymasterAndData (top-level or entrypointV06Response)",
            )
        })?;

    let s = v06
        .get("paymasterAndData")
        .and_then(|x| x.as_str())
        .ok_or_else(|| client.malformed(method, "missing paymasterAndData field"))?;
    parse_bytes(s).map_err(|_| client.malformed(method, "invalid hex in paymasterAndData"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::H256;
    use serde_json::json;
    use std::str::FromStr;

    fn client() -> JsonRpcClient {
        JsonRpcClient::new(ProviderKind::EntryPointRpc, "http://localhost".into())
    }

    const HASH: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    #[test]
    fn user_op_hash_accepts_known_shapes() {
        let expected = SubmissionId::UserOpHash(H256::from_str(HASH).unwrap());
        for res in [
            json!(HASH),
            json!({ "result": HASH }),
            json!({ "userOpHash": HASH }),
            json!({ "userOperationHash": HASH }),
        ] {
            let got = parse_user_op_hash(&client(), "eth_sendUserOperation", &res).unwrap();
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn user_op_hash_rejects_unknown_shape() {
        let res = json!({ "foo": "bar" });
        assert!(parse_user_op_hash(&client(), "eth_sendUserOperation", &res).is_err());
    }

    #[test]
    fn gas_estimates_parse_the_standard_envelope() {
        let res = json!({
            "callGasLimit": "0x186a0",
            "verificationGasLimit": "0x30d40",
            "preVerificationGas": "0xc350"
        });
        let est = parse_gas_estimates(&client(), "eth_estimateUserOperationGas", &res).unwrap();
        assert_eq!(est.call_gas_limit, 100_000.into());
        assert_eq!(est.verification_gas_limit, 200_000.into());
        assert_eq!(est.pre_verification_gas, 50_000.into());
    }

    #[test]
    fn gas_estimates_reject_missing_fields() {
        let res = json!({ "callGasLimit": "0x186a0" });
        assert!(parse_gas_estimates(&client(), "eth_estimateUserOperationGas", &res).is_err());
    }

    #[test]
    fn paymaster_data_accepts_top_level_and_nested_shapes() {
        let expected = Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]);
        for res in [
            json!({ "paymasterAndData": "0xdeadbeef" }),
            json!({ "entrypointV06Response": { "paymasterAndData": "0xdeadbeef" } }),
            json!({ "entryPointV06Response": { "paymasterAndData": "0xdeadbeef" } }),
        ] {
            let got = parse_paymaster_and_data(&client(), "pm_getPaymasterData", &res).unwrap();
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn paymaster_data_rejects_v07_only_responses() {
        let res = json!({ "entrypointV07Response": { "paymasterAndData": "0xdeadbeef" } });
        assert!(parse_paymaster_and_data(&client(), "pm_getPaymasterData", &res).is_err());
    }
}
