use crate::config::ChainProfile;
use crate::error::PipelineError;
use crate::types::UserOperation;
use ethers::abi::{encode, Token};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Bytes, H256, U256};
use ethers::utils::keccak256;

/// EIP-712 type of the operation struct the 4337 module verifies. The module
/// address is the verifying contract; the wallet itself never sees the hash.
const SAFE_OP_TYPE: &str = "SafeOp(address safe,uint256 nonce,bytes initCode,bytes callData,uint256 callGasLimit,uint256 verificationGasLimit,uint256 preVerificationGas,uint256 maxFeePerGas,uint256 maxPriorityFeePerGas,bytes paymasterAndData,uint48 validAfter,uint48 validUntil,address entryPoint)";

const DOMAIN_TYPE: &str = "EIP712Domain(uint256 chainId,address verifyingContract)";

pub fn domain_separator(profile: &ChainProfile) -> H256 {
    let encoded = encode(&[
        Token::FixedBytes(keccak256(DOMAIN_TYPE.as_bytes()).to_vec()),
        Token::Uint(U256::from(profile.chain_id)),
        Token::Address(profile.module),
    ]);
    H256::from(keccak256(encoded))
}

/// Struct hash over the operation. Validity bounds are pinned to zero
/// (always valid); dynamic `bytes` fields enter as their keccak, per
/// EIP-712.
pub fn operation_struct_hash(op: &UserOperation, profile: &ChainProfile) -> H256 {
    let encoded = encode(&[
        Token::FixedBytes(keccak256(SAFE_OP_TYPE.as_bytes()).to_vec()),
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::FixedBytes(keccak256(&op.init_code).to_vec()),
        Token::FixedBytes(keccak256(&op.call_data).to_vec()),
        Token::Uint(op.call_gas_limit),
        Token::Uint(op.verification_gas_limit),
        Token::Uint(op.pre_verification_gas),
        Token::Uint(op.max_fee_per_gas),
        Token::Uint(op.max_priority_fee_per_gas),
        Token::FixedBytes(keccak256(&op.paymaster_and_data).to_vec()),
        Token::Uint(U256::zero()),
        Token::Uint(U256::zero()),
        Token::Address(profile.entry_point),
    ]);
    H256::from(keccak256(encoded))
}

/// `keccak256(0x1901 + domainSeparator + structHash)`, the 32 bytes each
/// owner actually signs.
pub fn signing_digest(op: &UserOperation, profile: &ChainProfile) -> H256 {
    let mut buf = Vec::with_capacity(66);
    buf.extend_from_slice(&[0x19, 0x01]);
    buf.extend_from_slice(domain_separator(profile).as_bytes());
    buf.extend_from_slice(operation_struct_hash(op, profile).as_bytes());
    H256::from(keccak256(buf))
}

/// Signs the operation with every owner key and concatenates the 65-byte
/// signatures in ascending signer-address order, which is the order the
/// wallet's on-chain check walks them in.
///
/// Refuses to sign an operation whose gas or fee fields are still zero: a
/// signature over a half-built operation would be discarded anyway once the
/// missing fields land, and signing it is always a bug in the caller.
pub fn sign_operation(
    op: &UserOperation,
    profile: &ChainProfile,
    signers: &[LocalWallet],
) -> Result<Bytes, PipelineError> {
    if signers.is_empty() {
        return Err(PipelineError::Signer("no signer keys provided".into()));
    }
    if !op.is_complete() {
        return Err(PipelineError::Signer(
            "refusing to sign an operation with unset gas or fee fields".into(),
        ));
    }

    let digest = signing_digest(op, profile);

    let mut ordered: Vec<&LocalWallet> = signers.iter().collect();
    ordered.sort_by_key(|w| w.address());

    let mut out = Vec::with_capacity(ordered.len() * 65);
    for wallet in ordered {
        let sig = wallet
            .sign_hash(digest)
            .map_err(|e| PipelineError::Signer(format!("signing with {:#x} failed: {e}", wallet.address())))?;
        out.extend_from_slice(&sig.to_vec());
    }
    Ok(Bytes::from(out))
}

/// Length-correct placeholder signature for `signer_count` owners, used so
/// gas estimation and paymaster simulation see a realistically sized
/// signature field before the real one exists.
pub fn dummy_signature(signer_count: usize) -> Bytes {
    let mut out = Vec::with_capacity(signer_count * 65);
    for _ in 0..signer_count {
        out.extend_from_slice(&[0xff; 64]);
        out.push(0x1c);
    }
    Bytes::from(out)
}
