use crate::builder::build_user_operation;
use crate::chain::ChainView;
use crate::config::{ChainProfile, WalletConfig};
use crate::encoding::Action;
use crate::error::PipelineError;
use crate::providers::ProviderAdapter;
use crate::signer::{dummy_signature, sign_operation};
use crate::submit::{submit_and_wait, PollConfig, SubmissionOutcome};
use crate::types::UserOperation;
use ethers::signers::LocalWallet;
use tracing::{debug, info};

/// One end-to-end operation: build, negotiate gas and sponsorship, sign,
/// fund-check, submit, wait. The operation is owned exclusively by the
/// pipeline until submission; nothing mutates it concurrently.
pub struct Pipeline<'a> {
    pub chain: &'a dyn ChainView,
    pub provider: &'a dyn ProviderAdapter,
    pub profile: &'a ChainProfile,
    pub wallet: &'a WalletConfig,
    pub signers: &'a [LocalWallet],
    /// Bounds for the self-funded balance wait, not for receipt polling.
    pub funding: PollConfig,
}

impl Pipeline<'_> {
    /// Builds, negotiates and signs an operation, ready to submit.
    ///
    /// Gas and fee fields are each assigned exactly once, from exactly one
    /// source: either the provider's combined sponsorship envelope, or the
    /// fee oracle plus the estimation call. Only `paymasterAndData` may be
    /// written twice, stub first and final data after estimation.
    pub async fn prepare(&self, action: &Action) -> Result<UserOperation, PipelineError> {
        self.wallet.validate()?;

        let (mut op, deployed) =
            build_user_operation(self.chain, self.profile, self.wallet, action).await?;
        info!(sender = ?op.sender, nonce = %op.nonce, deployed, "operation built");

        if self.provider.sponsors_gas() {
            self.negotiate_combined(&mut op).await?;
        } else {
            self.negotiate_stepwise(&mut op).await?;
        }

        if op.paymaster_and_data.is_empty() && !self.provider.sponsors_externally() {
            self.wait_for_prefund(&op).await?;
        }

        op.signature = sign_operation(&op, self.profile, self.signers)?;
        debug!(bytes = op.signature.len(), "operation signed");

        // The wallet may have been deployed by someone else between build
        // and now; submitting initCode for existing code is an AA10 revert.
        // Rebuild the deployment-sensitive fields and re-sign.
        if !deployed && self.chain.is_deployed(op.sender).await? {
            info!(sender = ?op.sender, "wallet deployed mid-flight, dropping initCode");
            op.init_code = Default::default();
            op.nonce = self
                .chain
                .entry_point_nonce(self.profile.entry_point, op.sender)
                .await?;
            op.signature = sign_operation(&op, self.profile, self.signers)?;
        }

        Ok(op)
    }

    /// Prepares, submits and waits for a terminal outcome.
    pub async fn execute(
        &self,
        action: &Action,
        poll: &PollConfig,
    ) -> Result<SubmissionOutcome, PipelineError> {
        let op = self.prepare(action).await?;
        submit_and_wait(self.provider, &op, poll).await
    }

    /// Combined path: one provider call returns gas limits, fee bounds and
    /// paymaster data together. The fee oracle still runs, but only to give
    /// the provider a simulation hint on a scratch copy; the canonical
    /// operation takes every field from the envelope.
    async fn negotiate_combined(&self, op: &mut UserOperation) -> Result<(), PipelineError> {
        let hint = self.provider.gas_fees(self.chain).await?;

        let mut scratch = op.clone();
        scratch.max_fee_per_gas = hint.max_fee_per_gas;
        scratch.max_priority_fee_per_gas = hint.max_priority_fee_per_gas;
        scratch.signature = dummy_signature(self.wallet.owners.len());

        let bundle = self.provider.sponsor(&scratch).await?.ok_or_else(|| {
            PipelineError::Configuration(format!(
                "provider {} advertises combined sponsorship but returned none",
                self.provider.kind()
            ))
        })?;
        let gas = bundle.gas.ok_or_else(|| {
            PipelineError::Configuration(format!(
                "provider {} returned sponsorship without gas limits",
                self.provider.kind()
            ))
        })?;
        let fees = bundle.fees.ok_or_else(|| {
            PipelineError::Configuration(format!(
                "provider {} returned sponsorship without fee bounds",
                self.provider.kind()
            ))
        })?;

        op.call_gas_limit = gas.call_gas_limit;
        op.verification_gas_limit = gas.verification_gas_limit;
        op.pre_verification_gas = gas.pre_verification_gas;
        op.max_fee_per_gas = fees.max_fee_per_gas;
        op.max_priority_fee_per_gas = fees.max_priority_fee_per_gas;
        op.paymaster_and_data = bundle.paymaster_and_data;
        info!(
            call_gas = %op.call_gas_limit,
            verification_gas = %op.verification_gas_limit,
            pre_verification_gas = %op.pre_verification_gas,
            "gas and sponsorship negotiated (combined)"
        );
        Ok(())
    }

    /// Stepwise path: fee oracle, optional paymaster stub, estimation with a
    /// dummy signature, then final sponsorship data.
    async fn negotiate_stepwise(&self, op: &mut UserOperation) -> Result<(), PipelineError> {
        let fees = self.provider.gas_fees(self.chain).await?;
        op.max_fee_per_gas = fees.max_fee_per_gas;
        op.max_priority_fee_per_gas = fees.max_priority_fee_per_gas;
        debug!(max_fee = %op.max_fee_per_gas, priority = %op.max_priority_fee_per_gas, "fees set");

        if let Some(stub) = self.provider.paymaster_stub(op).await? {
            debug!(bytes = stub.len(), "paymaster stub set for estimation");
            op.paymaster_and_data = stub;
        }

        op.signature = dummy_signature(self.wallet.owners.len());
        let est = self.provider.estimate_gas(op).await?;
        op.call_gas_limit = est.call_gas_limit;
        op.verification_gas_limit = est.verification_gas_limit;
        op.pre_verification_gas = est.pre_verification_gas;
        info!(
            call_gas = %op.call_gas_limit,
            verification_gas = %op.verification_gas_limit,
            pre_verification_gas = %op.pre_verification_gas,
            "gas estimated"
        );

        if let Some(bundle) = self.provider.sponsor(op).await? {
            op.paymaster_and_data = bundle.paymaster_and_data;
            debug!(bytes = op.paymaster_and_data.len(), "final paymaster data set");
        }
        Ok(())
    }

    /// Self-funded operations must cover the worst-case prefund from the
    /// sender's balance. Re-checks in a bounded wait so a deposit that is
    /// already in flight gets a chance to land.
    async fn wait_for_prefund(&self, op: &UserOperation) -> Result<(), PipelineError> {
        let required = op.required_prefund();
        let mut balance = self.chain.balance(op.sender).await?;
        let mut attempt = 0u32;
        while balance < required {
            attempt += 1;
            if attempt > self.funding.max_attempts {
                return Err(PipelineError::InsufficientFunds { balance, required });
            }
            debug!(
                %balance, %required, attempt,
                "sender balance below prefund, waiting"
            );
            tokio::time::sleep(self.funding.interval).await;
            balance = self.chain.balance(op.sender).await?;
        }
        Ok(())
    }
}
