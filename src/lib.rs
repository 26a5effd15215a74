//! ERC-4337 (EntryPoint v0.6) UserOperation pipeline for a multi-owner,
//! Safe-style proxy wallet.
//!
//! The crate covers the client side of account abstraction: deriving the
//! wallet's counterfactual address, encoding actions into wallet calldata,
//! assembling an unsigned operation, negotiating gas and paymaster
//! sponsorship with a bundler backend, producing the canonical multi-signer
//! EIP-712 signature, and submitting plus polling for the receipt. It does
//! not implement any on-chain contracts or bundler/paymaster servers.

pub mod address;
pub mod builder;
pub mod chain;
pub mod config;
pub mod encoding;
pub mod error;
pub mod pipeline;
pub mod providers;
pub mod rpc;
pub mod signer;
pub mod submit;
pub mod types;

pub use chain::{ChainView, EthersChain};
pub use config::{load_chain_profile, ChainProfile, ProviderConfig, ProviderKind, WalletConfig};
pub use encoding::{Action, CallKind};
pub use error::{PipelineError, ProviderFailure};
pub use pipeline::Pipeline;
pub use providers::{provider_for, ProviderAdapter};
pub use submit::{PollConfig, SubmissionOutcome};
pub use types::{
    GasEstimates, GasFees, OperationReceipt, SponsorBundle, SubmissionId, UserOperation,
};
