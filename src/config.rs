use crate::error::PipelineError;
use ethers::types::{Address, Bytes, U256};
use serde::Deserialize;
use std::{env, fmt, fs, path::Path, str::FromStr};

/// Which bundler/paymaster backend dialect to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Pimlico,
    Alchemy,
    Gelato,
    /// A plain ERC-4337 EntryPoint RPC bundler (standard method names only),
    /// optionally paired with an ERC-7677 paymaster web service.
    EntryPointRpc,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Pimlico => write!(f, "pimlico"),
            ProviderKind::Alchemy => write!(f, "alchemy"),
            ProviderKind::Gelato => write!(f, "gelato"),
            ProviderKind::EntryPointRpc => write!(f, "entrypoint-rpc"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pimlico" => Ok(ProviderKind::Pimlico),
            "alchemy" => Ok(ProviderKind::Alchemy),
            "gelato" => Ok(ProviderKind::Gelato),
            "entrypoint-rpc" | "bundler" => Ok(ProviderKind::EntryPointRpc),
            other => Err(PipelineError::Configuration(format!(
                "unknown provider '{other}' (expected pimlico, alchemy, gelato, or entrypoint-rpc)"
            ))),
        }
    }
}

/// Backend selection plus the credentials that backend needs.
///
/// Validated once, up front: an unsupported (provider, chain) pair is a
/// configuration error here, never a branch failure deep inside a call chain.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Bundler RPC endpoint. For Gelato this is the relay base URL; the
    /// adapter appends the chain-id path and sponsor key itself.
    pub url: String,
    /// Sponsor API key (Gelato).
    pub api_key: Option<String>,
    /// Gas sponsorship policy id (Alchemy Gas Manager / ERC-7677 context).
    pub policy_id: Option<String>,
    /// ERC-7677 paymaster web service endpoint (generic EntryPoint RPC path).
    pub paymaster_url: Option<String>,
    /// Fixed ERC-20 token paymaster address (Pimlico).
    pub erc20_paymaster: Option<Address>,
}

impl ProviderConfig {
    /// Checks this provider supports `chain_id` and carries the credentials
    /// its dialect requires.
    pub fn validate(&self, chain_id: u64) -> Result<(), PipelineError> {
        let supported: &[u64] = match self.kind {
            // The generic dialect has no provider-side chain allowlist.
            ProviderKind::EntryPointRpc => return self.validate_credentials(),
            ProviderKind::Pimlico => &[1, 5, 137, 80001, 11155111, 84532],
            ProviderKind::Alchemy => &[1, 5, 137, 80001, 11155111, 84532],
            ProviderKind::Gelato => &[5, 80001, 11155111, 84532],
        };

        if !supported.contains(&chain_id) {
            return Err(PipelineError::Configuration(format!(
                "provider {} does not support chain {}",
                self.kind, chain_id
            )));
        }

        self.validate_credentials()
    }

    fn validate_credentials(&self) -> Result<(), PipelineError> {
        if self.url.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "provider {} requires a bundler URL",
                self.kind
            )));
        }

        match self.kind {
            ProviderKind::Gelato if self.api_key.is_none() => Err(PipelineError::Configuration(
                "gelato requires a sponsor API key".into(),
            )),
            ProviderKind::Alchemy if self.policy_id.is_none() => Err(PipelineError::Configuration(
                "alchemy requires a gas manager policy id".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// Per-chain deployment artifact: contract addresses and the factory's proxy
/// creation code, as produced by the deployment tooling.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainProfileRaw {
    chain_id: u64,
    rpc: String,
    #[serde(default)]
    rpc_env_var: Option<String>,
    entry_point: String,
    factory: String,
    singleton: String,
    proxy_creation_code: String,
    module: String,
    fallback_handler: String,
}

#[derive(Debug, Clone)]
pub struct ChainProfile {
    pub chain_id: u64,
    pub rpc_url: String,
    pub entry_point: Address,
    /// Proxy factory that deploys the wallet via CREATE2.
    pub factory: Address,
    /// Wallet implementation the proxy delegates to; part of the CREATE2
    /// deployment data, so changing it changes every derived address.
    pub singleton: Address,
    /// The factory's proxy creation bytecode (constructor args excluded).
    pub proxy_creation_code: Bytes,
    /// ERC-4337 module the wallet validates through; the EIP-712 verifying
    /// contract for operation signatures.
    pub module: Address,
    pub fallback_handler: Address,
}

/// Wallet identity: owners, signing threshold, and the CREATE2 salt nonce.
/// All three feed the counterfactual address, so they are fixed per wallet.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub owners: Vec<Address>,
    pub threshold: U256,
    pub salt_nonce: U256,
}

impl WalletConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.owners.is_empty() {
            return Err(PipelineError::Configuration(
                "wallet needs at least one owner".into(),
            ));
        }
        if self.threshold.is_zero() || self.threshold > U256::from(self.owners.len()) {
            return Err(PipelineError::Configuration(format!(
                "threshold {} out of range for {} owner(s)",
                self.threshold,
                self.owners.len()
            )));
        }
        Ok(())
    }
}

/// Loads a chain profile JSON, optionally overriding the RPC URL from the
/// CLI or from the env var the artifact names.
pub fn load_chain_profile(
    path: &Path,
    rpc_override: Option<String>,
) -> Result<ChainProfile, PipelineError> {
    let raw = fs::read_to_string(path).map_err(|e| {
        PipelineError::Configuration(format!("failed to read {}: {e}", path.display()))
    })?;
    let raw: ChainProfileRaw = serde_json::from_str(&raw).map_err(|e| {
        PipelineError::Configuration(format!("failed to parse {}: {e}", path.display()))
    })?;

    let rpc_url = if let Some(rpc) = rpc_override {
        rpc
    } else if let Some(var) = raw.rpc_env_var.as_ref() {
        env::var(var).unwrap_or_else(|_| raw.rpc.clone())
    } else {
        raw.rpc.clone()
    };

    Ok(ChainProfile {
        chain_id: raw.chain_id,
        rpc_url,
        entry_point: parse_addr("entryPoint", &raw.entry_point)?,
        factory: parse_addr("factory", &raw.factory)?,
        singleton: parse_addr("singleton", &raw.singleton)?,
        proxy_creation_code: parse_bytes("proxyCreationCode", &raw.proxy_creation_code)?,
        module: parse_addr("module", &raw.module)?,
        fallback_handler: parse_addr("fallbackHandler", &raw.fallback_handler)?,
    })
}

fn parse_addr(field: &str, s: &str) -> Result<Address, PipelineError> {
    s.parse::<Address>()
        .map_err(|e| PipelineError::Configuration(format!("invalid {field} address '{s}': {e}")))
}

fn parse_bytes(field: &str, s: &str) -> Result<Bytes, PipelineError> {
    let hex_str = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(hex_str)
        .map_err(|e| PipelineError::Configuration(format!("invalid {field} hex: {e}")))?;
    Ok(Bytes::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(kind: ProviderKind) -> ProviderConfig {
        ProviderConfig {
            kind,
            url: "https://bundler.example".into(),
            api_key: Some("key".into()),
            policy_id: Some("policy".into()),
            paymaster_url: None,
            erc20_paymaster: None,
        }
    }

    #[test]
    fn supported_pair_passes() {
        provider(ProviderKind::Pimlico).validate(11155111).unwrap();
        provider(ProviderKind::Gelato).validate(84532).unwrap();
    }

    #[test]
    fn unsupported_pair_is_a_configuration_error() {
        let err = provider(ProviderKind::Gelato).validate(42).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)), "{err}");
    }

    #[test]
    fn entrypoint_rpc_has_no_chain_allowlist() {
        provider(ProviderKind::EntryPointRpc).validate(42).unwrap();
    }

    #[test]
    fn gelato_without_api_key_is_rejected() {
        let mut cfg = provider(ProviderKind::Gelato);
        cfg.api_key = None;
        assert!(cfg.validate(11155111).is_err());
    }

    #[test]
    fn alchemy_without_policy_id_is_rejected() {
        let mut cfg = provider(ProviderKind::Alchemy);
        cfg.policy_id = None;
        assert!(cfg.validate(11155111).is_err());
    }

    #[test]
    fn threshold_must_fit_owner_count() {
        let wallet = WalletConfig {
            owners: vec![Address::random()],
            threshold: U256::from(2),
            salt_nonce: U256::zero(),
        };
        assert!(wallet.validate().is_err());
    }
}
