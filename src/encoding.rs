use crate::error::PipelineError;
use crate::types::UserOperation;
use ethers::abi::{AbiParser, Token};
use ethers::types::{Address, Bytes, H256, U256};

/// Call semantics of the wallet-level invocation. The wallet executes either
/// a normal call or a delegate call; the distinction is carried end-to-end
/// into the module's `executeUserOp` operation byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Call,
    DelegateCall,
}

impl CallKind {
    pub fn as_u8(self) -> u8 {
        match self {
            CallKind::Call => 0,
            CallKind::DelegateCall => 1,
        }
    }
}

/// The closed set of actions the pipeline knows how to encode. Anything else
/// must be expressed as a `RawCall` by the caller; there is no fallback that
/// could produce malformed bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    NativeTransfer {
        to: Address,
        value: U256,
    },
    Erc20Transfer {
        token: Address,
        to: Address,
        amount: U256,
    },
    Erc20Mint {
        token: Address,
        to: Address,
        amount: U256,
    },
    Erc721Mint {
        token: Address,
        to: Address,
    },
    RawCall {
        to: Address,
        value: U256,
        data: Bytes,
        operation: CallKind,
    },
}

/// The wallet-level invocation an action lowers to, before the module
/// wrapper is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerCall {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub operation: CallKind,
}

/// Lowers an action to its target/value/data triple.
pub fn lower_action(action: &Action) -> Result<InnerCall, PipelineError> {
    match action {
        Action::NativeTransfer { to, value } => Ok(InnerCall {
            to: *to,
            value: *value,
            data: Bytes::default(),
            operation: CallKind::Call,
        }),
        Action::Erc20Transfer { token, to, amount } => Ok(InnerCall {
            to: *token,
            value: U256::zero(),
            data: encode_call(
                "function transfer(address to, uint256 amount) returns (bool)",
                "transfer",
                &[Token::Address(*to), Token::Uint(*amount)],
            )?,
            operation: CallKind::Call,
        }),
        Action::Erc20Mint { token, to, amount } => Ok(InnerCall {
            to: *token,
            value: U256::zero(),
            data: encode_call(
                "function mint(address to, uint256 amount)",
                "mint",
                &[Token::Address(*to), Token::Uint(*amount)],
            )?,
            operation: CallKind::Call,
        }),
        Action::Erc721Mint { token, to } => Ok(InnerCall {
            to: *token,
            value: U256::zero(),
            data: encode_call(
                "function safeMint(address to)",
                "safeMint",
                &[Token::Address(*to)],
            )?,
            operation: CallKind::Call,
        }),
        Action::RawCall {
            to,
            value,
            data,
            operation,
        } => {
            if *operation == CallKind::DelegateCall && !value.is_zero() {
                return Err(PipelineError::Encoding(
                    "unsupported action: delegate call cannot carry value".into(),
                ));
            }
            Ok(InnerCall {
                to: *to,
                value: *value,
                data: data.clone(),
                operation: *operation,
            })
        }
    }
}

/// Encodes an action into the wallet's `callData`: the module-level
/// `executeUserOp(to, value, data, operation)` wrapping the inner call.
pub fn encode_action(action: &Action) -> Result<Bytes, PipelineError> {
    let inner = lower_action(action)?;
    encode_call(
        "function executeUserOp(address to, uint256 value, bytes data, uint8 operation)",
        "executeUserOp",
        &[
            Token::Address(inner.to),
            Token::Uint(inner.value),
            Token::Bytes(inner.data.to_vec()),
            Token::Uint(U256::from(inner.operation.as_u8())),
        ],
    )
}

/// Decodes `executeUserOp` callData back into its inner call. Used by tests
/// and by diagnostics; rejects anything that is not the known wrapper.
pub fn decode_action_call_data(call_data: &Bytes) -> Result<InnerCall, PipelineError> {
    let abi = AbiParser::default()
        .parse(&["function executeUserOp(address to, uint256 value, bytes data, uint8 operation)"])
        .map_err(|e| PipelineError::Encoding(format!("abi parse failed: {e}")))?;
    let function = abi
        .function("executeUserOp")
        .map_err(|e| PipelineError::Encoding(format!("abi lookup failed: {e}")))?;

    let raw = call_data.as_ref();
    if raw.len() < 4 || raw[..4] != function.short_signature() {
        return Err(PipelineError::Encoding(
            "callData is not an executeUserOp invocation".into(),
        ));
    }
    let tokens = function
        .decode_input(&raw[4..])
        .map_err(|e| PipelineError::Encoding(format!("callData decode failed: {e}")))?;

    match tokens.as_slice() {
        [Token::Address(to), Token::Uint(value), Token::Bytes(data), Token::Uint(op)] => {
            // ethabi does not range-check uint8, so the full word must be
            // compared; narrowing it first can abort on crafted calldata.
            let operation = if op.is_zero() {
                CallKind::Call
            } else if *op == U256::one() {
                CallKind::DelegateCall
            } else {
                return Err(PipelineError::Encoding(format!(
                    "unknown operation word {op}"
                )));
            };
            Ok(InnerCall {
                to: *to,
                value: *value,
                data: Bytes::from(data.clone()),
                operation,
            })
        }
        _ => Err(PipelineError::Encoding(
            "unexpected executeUserOp token shape".into(),
        )),
    }
}

fn encode_call(signature: &str, name: &str, args: &[Token]) -> Result<Bytes, PipelineError> {
    let abi = AbiParser::default()
        .parse(&[signature])
        .map_err(|e| PipelineError::Encoding(format!("abi parse failed: {e}")))?;
    let function = abi
        .function(name)
        .map_err(|e| PipelineError::Encoding(format!("abi lookup failed: {e}")))?;
    let data = function
        .encode_input(args)
        .map_err(|e| PipelineError::Encoding(format!("failed to encode {name} calldata: {e}")))?;
    Ok(Bytes::from(data))
}

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn fmt_bytes(b: &Bytes) -> String {
    format!("0x{}", hex::encode(b.as_ref()))
}

pub fn parse_u256_quantity(s: &str) -> Result<U256, PipelineError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(s, 16)
        .map_err(|e| PipelineError::Encoding(format!("invalid quantity '{s}': {e}")))
}

pub fn parse_h256(s: &str) -> Result<H256, PipelineError> {
    let hex_str = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(hex_str)
        .map_err(|e| PipelineError::Encoding(format!("invalid hex '{s}': {e}")))?;
    if bytes.len() != 32 {
        return Err(PipelineError::Encoding(format!(
            "expected 32-byte hex, got {} bytes",
            bytes.len()
        )));
    }
    Ok(H256::from_slice(&bytes))
}

pub fn parse_bytes(s: &str) -> Result<Bytes, PipelineError> {
    let hex_str = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(hex_str)
        .map_err(|e| PipelineError::Encoding(format!("invalid hex '{s}': {e}")))?;
    Ok(Bytes::from(bytes))
}

/// The JSON-RPC wire shape every provider accepts.
pub fn user_op_to_json(op: &UserOperation) -> serde_json::Value {
    serde_json::json!({
        "sender": fmt_address(op.sender),
        "nonce": fmt_u256(op.nonce),
        "initCode": fmt_bytes(&op.init_code),
        "callData": fmt_bytes(&op.call_data),
        "callGasLimit": fmt_u256(op.call_gas_limit),
        "verificationGasLimit": fmt_u256(op.verification_gas_limit),
        "preVerificationGas": fmt_u256(op.pre_verification_gas),
        "maxFeePerGas": fmt_u256(op.max_fee_per_gas),
        "maxPriorityFeePerGas": fmt_u256(op.max_priority_fee_per_gas),
        "paymasterAndData": fmt_bytes(&op.paymaster_and_data),
        "signature": fmt_bytes(&op.signature),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::from([byte; 20])
    }

    #[test]
    fn native_transfer_round_trips() {
        let action = Action::NativeTransfer {
            to: addr(0x11),
            value: U256::from(1000),
        };
        let call_data = encode_action(&action).unwrap();
        let inner = decode_action_call_data(&call_data).unwrap();
        assert_eq!(inner.to, addr(0x11));
        assert_eq!(inner.value, U256::from(1000));
        assert!(inner.data.is_empty());
        assert_eq!(inner.operation, CallKind::Call);
    }

    #[test]
    fn erc20_transfer_round_trips() {
        let action = Action::Erc20Transfer {
            token: addr(0x22),
            to: addr(0x33),
            amount: U256::from(5_000_000u64),
        };
        let call_data = encode_action(&action).unwrap();
        let inner = decode_action_call_data(&call_data).unwrap();
        assert_eq!(inner.to, addr(0x22));
        assert!(inner.value.is_zero());

        // Inner bytes decode back to transfer(to, amount) with the same args.
        let abi = AbiParser::default()
            .parse(&["function transfer(address to, uint256 amount) returns (bool)"])
            .unwrap();
        let f = abi.function("transfer").unwrap();
        assert_eq!(inner.data.as_ref()[..4], f.short_signature());
        let tokens = f.decode_input(&inner.data.as_ref()[4..]).unwrap();
        assert_eq!(
            tokens,
            vec![Token::Address(addr(0x33)), Token::Uint(U256::from(5_000_000u64))]
        );
    }

    #[test]
    fn erc20_mint_and_erc721_mint_target_the_token() {
        let mint = Action::Erc20Mint {
            token: addr(0x44),
            to: addr(0x55),
            amount: U256::one(),
        };
        let inner = lower_action(&mint).unwrap();
        assert_eq!(inner.to, addr(0x44));

        let nft = Action::Erc721Mint {
            token: addr(0x66),
            to: addr(0x77),
        };
        let inner = lower_action(&nft).unwrap();
        assert_eq!(inner.to, addr(0x66));
        assert_eq!(inner.operation, CallKind::Call);
    }

    #[test]
    fn raw_delegate_call_is_preserved_end_to_end() {
        let action = Action::RawCall {
            to: addr(0x88),
            value: U256::zero(),
            data: Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]),
            operation: CallKind::DelegateCall,
        };
        let call_data = encode_action(&action).unwrap();
        let inner = decode_action_call_data(&call_data).unwrap();
        assert_eq!(inner.operation, CallKind::DelegateCall);
        assert_eq!(inner.data, Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]));
    }

    #[test]
    fn delegate_call_with_value_is_rejected() {
        let action = Action::RawCall {
            to: addr(0x88),
            value: U256::one(),
            data: Bytes::default(),
            operation: CallKind::DelegateCall,
        };
        let err = encode_action(&action).unwrap_err();
        assert!(matches!(err, PipelineError::Encoding(_)), "{err}");
    }

    #[test]
    fn oversized_operation_word_is_rejected_not_narrowed() {
        // Head layout: selector, to, value, data offset, operation. Splice
        // the operation word to 0xff..ff; the decoder must return an error,
        // not abort while narrowing the word.
        let action = Action::RawCall {
            to: addr(0x88),
            value: U256::zero(),
            data: Bytes::default(),
            operation: CallKind::Call,
        };
        let mut raw = encode_action(&action).unwrap().to_vec();
        for b in &mut raw[4 + 96..4 + 128] {
            *b = 0xff;
        }
        let err = decode_action_call_data(&Bytes::from(raw)).unwrap_err();
        assert!(matches!(err, PipelineError::Encoding(_)), "{err}");
    }

    #[test]
    fn foreign_call_data_is_rejected_by_decoder() {
        let not_ours = Bytes::from(vec![0x01, 0x02, 0x03, 0x04, 0x05]);
        assert!(decode_action_call_data(&not_ours).is_err());
    }

    #[test]
    fn quantity_formatting_matches_jsonrpc_rules() {
        assert_eq!(fmt_u256(U256::zero()), "0x0");
        assert_eq!(fmt_u256(U256::from(100_000)), "0x186a0");
        assert_eq!(parse_u256_quantity("0x186a0").unwrap(), U256::from(100_000));
        assert_eq!(parse_u256_quantity("0x").unwrap(), U256::zero());
    }
}
