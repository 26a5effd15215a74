use crate::error::PipelineError;
use async_trait::async_trait;
use ethers::abi::AbiParser;
use ethers::prelude::*;
use ethers::providers::Middleware;
use std::sync::Arc;

/// Read-only chain surface the pipeline needs: deployment checks, entry-point
/// nonces, balances, and fee inputs. One implementation speaks to a real node
/// through `ethers`; tests substitute a stub.
#[async_trait]
pub trait ChainView: Send + Sync {
    /// Whether `address` has code deployed (`eth_getCode` non-empty).
    async fn is_deployed(&self, address: Address) -> Result<bool, PipelineError>;

    /// `EntryPoint.getNonce(sender, 0)`, the value checked at inclusion
    /// time, read as late as possible.
    async fn entry_point_nonce(
        &self,
        entry_point: Address,
        sender: Address,
    ) -> Result<U256, PipelineError>;

    async fn balance(&self, address: Address) -> Result<U256, PipelineError>;

    /// Base fee of the latest block (zero on pre-1559 chains).
    async fn base_fee(&self) -> Result<U256, PipelineError>;

    /// Legacy gas price, the fallback fee source for providers without a fee
    /// oracle of their own.
    async fn gas_price(&self) -> Result<U256, PipelineError>;
}

/// `ChainView` over any `ethers` middleware.
#[derive(Debug, Clone)]
pub struct EthersChain<M> {
    client: Arc<M>,
}

impl<M: Middleware + 'static> EthersChain<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<M: Middleware + 'static> ChainView for EthersChain<M> {
    async fn is_deployed(&self, address: Address) -> Result<bool, PipelineError> {
        let code = self
            .client
            .get_code(address, None)
            .await
            .map_err(|e| PipelineError::Chain(format!("eth_getCode failed: {e}")))?;
        Ok(!code.as_ref().is_empty())
    }

    async fn entry_point_nonce(
        &self,
        entry_point: Address,
        sender: Address,
    ) -> Result<U256, PipelineError> {
        let abi = AbiParser::default()
            .parse(&["function getNonce(address sender, uint192 key) view returns (uint256)"])
            .map_err(|e| PipelineError::Chain(format!("entry point abi parse failed: {e}")))?;
        let entry_point_c = Contract::new(entry_point, abi, self.client.clone());

        let nonce: U256 = entry_point_c
            .method("getNonce", (sender, U256::zero()))
            .map_err(|e| PipelineError::Chain(format!("getNonce call setup failed: {e}")))?
            .call()
            .await
            .map_err(|e| PipelineError::Chain(format!("entryPoint.getNonce failed: {e}")))?;
        Ok(nonce)
    }

    async fn balance(&self, address: Address) -> Result<U256, PipelineError> {
        self.client
            .get_balance(address, None)
            .await
            .map_err(|e| PipelineError::Chain(format!("eth_getBalance failed: {e}")))
    }

    async fn base_fee(&self) -> Result<U256, PipelineError> {
        let block = self
            .client
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| PipelineError::Chain(format!("eth_getBlock failed: {e}")))?
            .ok_or_else(|| PipelineError::Chain("latest block not available".into()))?;
        Ok(block.base_fee_per_gas.unwrap_or_default())
    }

    async fn gas_price(&self) -> Result<U256, PipelineError> {
        self.client
            .get_gas_price()
            .await
            .map_err(|e| PipelineError::Chain(format!("eth_gasPrice failed: {e}")))
    }
}
