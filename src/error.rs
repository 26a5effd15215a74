use crate::config::ProviderKind;
use ethers::types::U256;
use thiserror::Error;

/// Detail behind a [`PipelineError::Provider`].
#[derive(Debug, Error)]
pub enum ProviderFailure {
    /// The HTTP exchange itself failed (connect, TLS, timeout, non-2xx).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend returned a JSON-RPC error envelope. The message is kept
    /// intact so callers can surface the backend's own wording.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The response decoded, but not into the shape the method promises
    /// (missing `result`, wrong field types, truncated hex, ...).
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Every failure a pipeline stage can hand back to its caller.
///
/// Stages never log-and-continue past one of these: each stage either
/// completes its transition or returns the error and stops.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid or unsupported configuration (e.g. a (provider, chain) pair
    /// outside the supported table). Fatal, no retry.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Calldata or init-code construction failed. Fatal.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A read-only chain RPC call failed (eth_getCode, nonce, balance, ...).
    #[error("chain read failed: {0}")]
    Chain(String),

    /// A bundler/paymaster exchange failed. Retryable at the caller's
    /// discretion; the pipeline itself never retries these.
    #[error("{provider} {method} failed: {failure}")]
    Provider {
        provider: ProviderKind,
        method: String,
        failure: ProviderFailure,
    },

    /// The provider reports the operation would revert or fails entry-point
    /// checks. Fatal for this attempt; the caller must rebuild.
    #[error("{provider} rejected the operation: {message}")]
    ValidationRejected {
        provider: ProviderKind,
        message: String,
    },

    /// Sender balance is below the estimated prefund for a self-funded
    /// operation, even after the bounded funding wait.
    #[error("insufficient funds: balance {balance} wei, required {required} wei")]
    InsufficientFunds { balance: U256, required: U256 },

    /// No receipt within the configured attempt budget. The outcome is
    /// unknown: the operation may still be included after we stopped looking.
    #[error("no receipt after {attempts} polling attempts")]
    Timeout { attempts: u32 },

    /// Signature construction failed, or signing was requested on an
    /// operation whose gas fields are not yet populated.
    #[error("signer error: {0}")]
    Signer(String),
}

impl PipelineError {
    pub(crate) fn provider(
        provider: ProviderKind,
        method: impl Into<String>,
        failure: ProviderFailure,
    ) -> Self {
        Self::Provider {
            provider,
            method: method.into(),
            failure,
        }
    }
}
