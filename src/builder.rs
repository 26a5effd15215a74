use crate::address::proxy_address;
use crate::chain::ChainView;
use crate::config::{ChainProfile, WalletConfig};
use crate::encoding::{encode_action, Action};
use crate::error::PipelineError;
use crate::types::UserOperation;
use ethers::abi::{AbiParser, Token};
use ethers::types::{Address, Bytes, U256};

/// Encodes the wallet's `setup` initializer: owners, threshold, a delegate
/// hook that enables the 4337 module, and the fallback handler. Payment
/// fields are zero (deployment is paid by the operation itself).
///
/// The initializer feeds address derivation, so its encoding is part of the
/// wallet's identity and must never change for an existing wallet.
pub fn build_initializer(
    profile: &ChainProfile,
    wallet: &WalletConfig,
) -> Result<Bytes, PipelineError> {
    let enable_modules = encode_function(
        "function enableModules(address[] modules)",
        "enableModules",
        &[Token::Array(vec![Token::Address(profile.module)])],
    )?;

    encode_function(
        "function setup(address[] owners, uint256 threshold, address to, bytes data, address fallbackHandler, address paymentToken, uint256 payment, address paymentReceiver)",
        "setup",
        &[
            Token::Array(
                wallet
                    .owners
                    .iter()
                    .map(|o| Token::Address(*o))
                    .collect(),
            ),
            Token::Uint(wallet.threshold),
            Token::Address(profile.module),
            Token::Bytes(enable_modules.to_vec()),
            Token::Address(profile.fallback_handler),
            Token::Address(Address::zero()),
            Token::Uint(U256::zero()),
            Token::Address(Address::zero()),
        ],
    )
}

/// Counterfactual sender address for this (profile, wallet) pair. Pure:
/// the same inputs always yield the same address.
pub fn derive_sender(
    profile: &ChainProfile,
    wallet: &WalletConfig,
) -> Result<Address, PipelineError> {
    let initializer = build_initializer(profile, wallet)?;
    Ok(proxy_address(
        profile.factory,
        &profile.proxy_creation_code,
        profile.singleton,
        &initializer,
        wallet.salt_nonce,
    ))
}

/// Builds the initCode that deploys the wallet before the operation
/// executes: the factory address followed by the
/// `createProxyWithNonce(singleton, initializer, saltNonce)` calldata.
pub fn build_init_code(
    profile: &ChainProfile,
    wallet: &WalletConfig,
) -> Result<Bytes, PipelineError> {
    let initializer = build_initializer(profile, wallet)?;
    let create_call = encode_function(
        "function createProxyWithNonce(address singleton, bytes initializer, uint256 saltNonce) returns (address)",
        "createProxyWithNonce",
        &[
            Token::Address(profile.singleton),
            Token::Bytes(initializer.to_vec()),
            Token::Uint(wallet.salt_nonce),
        ],
    )?;

    let mut out = Vec::with_capacity(20 + create_call.len());
    out.extend_from_slice(profile.factory.as_bytes());
    out.extend_from_slice(create_call.as_ref());
    Ok(Bytes::from(out))
}

/// Assembles an unsigned operation for `action`.
///
/// Deployment state and the entry-point nonce are read here, immediately
/// before building; the pipeline re-checks deployment again right before
/// submission. Gas, fee, paymaster and signature fields are all zeroed on
/// return. Returns the operation plus the deployment flag observed.
pub async fn build_user_operation(
    chain: &dyn ChainView,
    profile: &ChainProfile,
    wallet: &WalletConfig,
    action: &Action,
) -> Result<(UserOperation, bool), PipelineError> {
    let sender = derive_sender(profile, wallet)?;
    let deployed = chain.is_deployed(sender).await?;
    let nonce = chain.entry_point_nonce(profile.entry_point, sender).await?;

    let init_code = if deployed {
        Bytes::default()
    } else {
        build_init_code(profile, wallet)?
    };

    let op = UserOperation {
        sender,
        nonce,
        init_code,
        call_data: encode_action(action)?,
        call_gas_limit: U256::zero(),
        verification_gas_limit: U256::zero(),
        pre_verification_gas: U256::zero(),
        max_fee_per_gas: U256::zero(),
        max_priority_fee_per_gas: U256::zero(),
        paymaster_and_data: Bytes::default(),
        signature: Bytes::default(),
    };

    Ok((op, deployed))
}

fn encode_function(
    signature: &str,
    name: &str,
    args: &[Token],
) -> Result<Bytes, PipelineError> {
    let abi = AbiParser::default()
        .parse(&[signature])
        .map_err(|e| PipelineError::Encoding(format!("abi parse failed: {e}")))?;
    let function = abi
        .function(name)
        .map_err(|e| PipelineError::Encoding(format!("abi lookup failed: {e}")))?;
    let data = function
        .encode_input(args)
        .map_err(|e| PipelineError::Encoding(format!("failed to encode {name}: {e}")))?;
    Ok(Bytes::from(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::str::FromStr;

    struct StubChain {
        deployed: bool,
        nonce: U256,
    }

    #[async_trait]
    impl ChainView for StubChain {
        async fn is_deployed(&self, _address: Address) -> Result<bool, PipelineError> {
            Ok(self.deployed)
        }
        async fn entry_point_nonce(
            &self,
            _entry_point: Address,
            _sender: Address,
        ) -> Result<U256, PipelineError> {
            Ok(self.nonce)
        }
        async fn balance(&self, _address: Address) -> Result<U256, PipelineError> {
            Ok(U256::zero())
        }
        async fn base_fee(&self) -> Result<U256, PipelineError> {
            Ok(U256::zero())
        }
        async fn gas_price(&self) -> Result<U256, PipelineError> {
            Ok(U256::zero())
        }
    }

    fn addr(s: &str) -> Address {
        Address::from_str(s).unwrap()
    }

    fn profile() -> ChainProfile {
        ChainProfile {
            chain_id: 11155111,
            rpc_url: "http://localhost:8545".into(),
            entry_point: addr("0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789"),
            factory: addr("0x1111111111111111111111111111111111111111"),
            singleton: addr("0x2222222222222222222222222222222222222222"),
            proxy_creation_code: Bytes::from(vec![0x60, 0x80, 0x60, 0x40, 0x52]),
            module: addr("0x3333333333333333333333333333333333333333"),
            fallback_handler: addr("0x4444444444444444444444444444444444444444"),
        }
    }

    fn wallet() -> WalletConfig {
        WalletConfig {
            owners: vec![addr("0x5555555555555555555555555555555555555555")],
            threshold: U256::one(),
            salt_nonce: U256::zero(),
        }
    }

    #[test]
    fn init_code_starts_with_the_factory_address() {
        let init_code = build_init_code(&profile(), &wallet()).unwrap();
        assert_eq!(&init_code.as_ref()[..20], profile().factory.as_bytes());
        assert!(init_code.len() > 24, "factory calldata missing");
    }

    #[test]
    fn sender_is_stable_and_owner_sensitive() {
        let a = derive_sender(&profile(), &wallet()).unwrap();
        let b = derive_sender(&profile(), &wallet()).unwrap();
        assert_eq!(a, b);

        let mut other = wallet();
        other.owners = vec![addr("0x6666666666666666666666666666666666666666")];
        assert_ne!(a, derive_sender(&profile(), &other).unwrap());
    }

    #[tokio::test]
    async fn undeployed_sender_gets_init_code() {
        let chain = StubChain {
            deployed: false,
            nonce: U256::zero(),
        };
        let action = Action::NativeTransfer {
            to: addr("0x7777777777777777777777777777777777777777"),
            value: U256::from(1000),
        };
        let (op, deployed) = build_user_operation(&chain, &profile(), &wallet(), &action)
            .await
            .unwrap();
        assert!(!deployed);
        assert!(!op.init_code.is_empty());
        assert!(op.call_gas_limit.is_zero());
        assert!(op.signature.is_empty());
    }

    #[tokio::test]
    async fn deployed_sender_gets_empty_init_code_and_live_nonce() {
        let chain = StubChain {
            deployed: true,
            nonce: U256::from(5),
        };
        let action = Action::NativeTransfer {
            to: addr("0x7777777777777777777777777777777777777777"),
            value: U256::from(1000),
        };
        let (op, deployed) = build_user_operation(&chain, &profile(), &wallet(), &action)
            .await
            .unwrap();
        assert!(deployed);
        assert!(op.init_code.is_empty());
        assert_eq!(op.nonce, U256::from(5));
    }
}
