use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use serde_json::Value;

/// `keccak256("UserOperationEvent(bytes32,address,address,uint256,bool,uint256,uint256)")`,
/// the entry point's per-operation event. Topic 1 is the userOpHash.
pub const USER_OPERATION_EVENT_TOPIC: &str =
    "0x49628fd1471006c1482da88028e9ce4dbb080b815c9b0344d39e5a8e6ec1419f";

/// ERC-4337 UserOperation (EntryPoint v0.6 layout).
///
/// Created with zeroed gas/paymaster/signature fields by the builder, filled
/// in field-by-field by the provider adapter and the signer, and treated as
/// immutable once submitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// True once every gas/fee field a signature must cover is populated.
    /// `paymaster_and_data` may legitimately stay empty (self-funded).
    pub fn is_complete(&self) -> bool {
        !self.call_gas_limit.is_zero()
            && !self.verification_gas_limit.is_zero()
            && !self.pre_verification_gas.is_zero()
            && !self.max_fee_per_gas.is_zero()
    }

    /// Worst-case wei the entry point may draw from the sender's deposit or
    /// balance for a self-funded operation.
    pub fn required_prefund(&self) -> U256 {
        let gas = self.call_gas_limit + self.verification_gas_limit + self.pre_verification_gas;
        gas.saturating_mul(self.max_fee_per_gas)
    }

    /// Tuple matching the Solidity struct layout, for on-chain calls that
    /// take a `UserOperation` argument.
    #[allow(clippy::type_complexity)]
    pub fn as_abi_tuple(
        &self,
    ) -> (
        Address,
        U256,
        Bytes,
        Bytes,
        U256,
        U256,
        U256,
        U256,
        U256,
        Bytes,
        Bytes,
    ) {
        (
            self.sender,
            self.nonce,
            self.init_code.clone(),
            self.call_data.clone(),
            self.call_gas_limit,
            self.verification_gas_limit,
            self.pre_verification_gas,
            self.max_fee_per_gas,
            self.max_priority_fee_per_gas,
            self.paymaster_and_data.clone(),
            self.signature.clone(),
        )
    }
}

/// The three gas budgets a bundler estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasEstimates {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
}

/// EIP-1559 style fee bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasFees {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Paymaster sponsorship response. Combined providers (Alchemy) return gas
/// and fee fields in the same envelope; each UserOperation field is then
/// assigned exactly once, from exactly one source.
#[derive(Debug, Clone, Default)]
pub struct SponsorBundle {
    pub paymaster_and_data: Bytes,
    pub gas: Option<GasEstimates>,
    pub fees: Option<GasFees>,
}

/// Key a submitted operation is tracked under. Most bundlers return the
/// userOpHash; Gelato's relay returns a task id. The two never mix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionId {
    UserOpHash(H256),
    TaskId(String),
}

impl std::fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionId::UserOpHash(h) => write!(f, "userOpHash {h:#x}"),
            SubmissionId::TaskId(id) => write!(f, "taskId {id}"),
        }
    }
}

/// Final inclusion record for a submitted operation. Never mutated once the
/// backend reports inclusion.
#[derive(Debug, Clone)]
pub struct OperationReceipt {
    pub user_op_hash: H256,
    pub tx_hash: H256,
    pub success: bool,
    /// Gas charged to the operation itself.
    pub actual_gas_used: U256,
    pub actual_gas_cost: U256,
    /// Gas used by the enclosing transaction (covers the whole bundle).
    pub tx_gas_used: U256,
    /// Raw logs, kept as-is; some providers omit the userOpHash field and we
    /// recover it from the UserOperationEvent topic instead.
    pub logs: Vec<Value>,
}

impl OperationReceipt {
    /// Parses the standard `eth_getUserOperationReceipt` result envelope.
    pub fn from_json(v: &Value) -> Result<Self, String> {
        let inner = v
            .get("receipt")
            .ok_or_else(|| "missing receipt object".to_string())?;

        let tx_hash = inner
            .get("transactionHash")
            .and_then(|x| x.as_str())
            .ok_or_else(|| "missing receipt.transactionHash".to_string())
            .and_then(|s| parse_h256_str(s))?;

        let logs = v
            .get("logs")
            .and_then(|l| l.as_array())
            .cloned()
            .unwrap_or_default();

        let user_op_hash = match v.get("userOpHash").and_then(|x| x.as_str()) {
            Some(s) => parse_h256_str(s)?,
            None => recover_user_op_hash(&logs)
                .ok_or_else(|| "missing userOpHash and no UserOperationEvent log".to_string())?,
        };

        Ok(OperationReceipt {
            user_op_hash,
            tx_hash,
            success: v.get("success").and_then(|x| x.as_bool()).unwrap_or(false),
            actual_gas_used: parse_quantity(v.get("actualGasUsed"))?,
            actual_gas_cost: parse_quantity(v.get("actualGasCost"))?,
            tx_gas_used: parse_quantity(inner.get("gasUsed"))?,
            logs,
        })
    }
}

/// Scans raw logs for the entry point's UserOperationEvent and pulls the
/// userOpHash out of topic 1.
pub fn recover_user_op_hash(logs: &[Value]) -> Option<H256> {
    for log in logs {
        let topics = log.get("topics")?.as_array()?;
        let topic0 = topics.first()?.as_str()?;
        if topic0.eq_ignore_ascii_case(USER_OPERATION_EVENT_TOPIC) {
            let topic1 = topics.get(1)?.as_str()?;
            return parse_h256_str(topic1).ok();
        }
    }
    None
}

fn parse_h256_str(s: &str) -> Result<H256, String> {
    let hex_str = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex '{s}': {e}"))?;
    if bytes.len() != 32 {
        return Err(format!("expected 32-byte hex, got {} bytes", bytes.len()));
    }
    Ok(H256::from_slice(&bytes))
}

fn parse_quantity(v: Option<&Value>) -> Result<U256, String> {
    let v = v.ok_or_else(|| "missing quantity field".to_string())?;
    if let Some(s) = v.as_str() {
        let hex_str = s.strip_prefix("0x").unwrap_or(s);
        if hex_str.is_empty() {
            return Ok(U256::zero());
        }
        return U256::from_str_radix(hex_str, 16).map_err(|e| format!("invalid quantity: {e}"));
    }
    if let Some(n) = v.as_u64() {
        return Ok(U256::from(n));
    }
    Err(format!("quantity is neither string nor number: {v}"))
}

/// Sanity check helper used by tests: the event topic constant really is the
/// keccak of the event signature.
pub fn user_operation_event_topic() -> H256 {
    H256::from(keccak256(
        "UserOperationEvent(bytes32,address,address,uint256,bool,uint256,uint256)".as_bytes(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HASH: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";
    const TX: &str = "0x2222222222222222222222222222222222222222222222222222222222222222";

    fn zeroed_op() -> UserOperation {
        UserOperation {
            sender: Address::zero(),
            nonce: U256::zero(),
            init_code: Bytes::default(),
            call_data: Bytes::default(),
            call_gas_limit: U256::zero(),
            verification_gas_limit: U256::zero(),
            pre_verification_gas: U256::zero(),
            max_fee_per_gas: U256::zero(),
            max_priority_fee_per_gas: U256::zero(),
            paymaster_and_data: Bytes::default(),
            signature: Bytes::default(),
        }
    }

    #[test]
    fn event_topic_constant_matches_signature_hash() {
        assert_eq!(
            format!("{:#x}", user_operation_event_topic()),
            USER_OPERATION_EVENT_TOPIC
        );
    }

    #[test]
    fn completeness_requires_every_gas_field() {
        let mut op = zeroed_op();
        assert!(!op.is_complete());

        op.call_gas_limit = U256::from(100_000);
        op.verification_gas_limit = U256::from(200_000);
        op.pre_verification_gas = U256::from(50_000);
        assert!(!op.is_complete(), "fee bounds still missing");

        op.max_fee_per_gas = U256::from(1_000_000_000u64);
        assert!(op.is_complete());
    }

    #[test]
    fn required_prefund_sums_gas_budgets() {
        let mut op = zeroed_op();
        op.call_gas_limit = U256::from(100);
        op.verification_gas_limit = U256::from(200);
        op.pre_verification_gas = U256::from(300);
        op.max_fee_per_gas = U256::from(2);
        assert_eq!(op.required_prefund(), U256::from(1200));
    }

    #[test]
    fn receipt_parses_standard_envelope() {
        let v = json!({
            "userOpHash": HASH,
            "success": true,
            "actualGasUsed": "0x186a0",
            "actualGasCost": "0x5af3107a4000",
            "logs": [],
            "receipt": { "transactionHash": TX, "gasUsed": "0x30d40" }
        });
        let r = OperationReceipt::from_json(&v).unwrap();
        assert!(r.success);
        assert_eq!(r.actual_gas_used, U256::from(100_000));
        assert_eq!(r.tx_gas_used, U256::from(200_000));
        assert_eq!(format!("{:#x}", r.user_op_hash), HASH);
        assert_eq!(format!("{:#x}", r.tx_hash), TX);
    }

    #[test]
    fn receipt_recovers_hash_from_user_operation_event() {
        let v = json!({
            "success": true,
            "actualGasUsed": "0x1",
            "actualGasCost": "0x1",
            "logs": [
                { "topics": ["0xdead"], "data": "0x" },
                { "topics": [USER_OPERATION_EVENT_TOPIC, HASH], "data": "0x" }
            ],
            "receipt": { "transactionHash": TX, "gasUsed": "0x1" }
        });
        let r = OperationReceipt::from_json(&v).unwrap();
        assert_eq!(format!("{:#x}", r.user_op_hash), HASH);
    }

    #[test]
    fn receipt_without_hash_or_event_is_rejected() {
        let v = json!({
            "success": true,
            "actualGasUsed": "0x1",
            "actualGasCost": "0x1",
            "logs": [],
            "receipt": { "transactionHash": TX, "gasUsed": "0x1" }
        });
        assert!(OperationReceipt::from_json(&v).is_err());
    }
}
