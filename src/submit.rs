use crate::error::PipelineError;
use crate::providers::ProviderAdapter;
use crate::types::{OperationReceipt, SubmissionId, UserOperation};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Receipt polling bounds. The budget is attempts, not wall time, so a slow
/// backend cannot stretch the wait unboundedly.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_attempts: 60,
        }
    }
}

/// Terminal state of a submitted operation.
///
/// `TimedOut` is not a failure verdict: the operation may still land after
/// the attempt budget runs out, and the submission id lets the caller keep
/// checking on their own schedule.
#[derive(Debug)]
pub enum SubmissionOutcome {
    /// Included on-chain and the inner call succeeded.
    Confirmed(OperationReceipt),
    /// Included on-chain but the inner call reverted.
    Reverted(OperationReceipt),
    /// The backend rejected the operation during validation; it will never
    /// be included.
    Rejected { message: String },
    /// No receipt within the attempt budget; outcome unknown.
    TimedOut { id: SubmissionId, attempts: u32 },
}

/// Sends the signed operation and polls until a terminal state.
///
/// A validation rejection at submission time is a terminal outcome, not an
/// error: the operation itself is at fault, and retrying the same bytes
/// cannot help. Transport and envelope problems stay errors so the caller
/// can retry the submission.
pub async fn submit_and_wait(
    provider: &dyn ProviderAdapter,
    op: &UserOperation,
    poll: &PollConfig,
) -> Result<SubmissionOutcome, PipelineError> {
    let id = match provider.submit(op).await {
        Ok(id) => id,
        Err(PipelineError::ValidationRejected { message, .. }) => {
            return Ok(SubmissionOutcome::Rejected { message })
        }
        Err(e) => return Err(e),
    };

    info!(provider = %provider.kind(), submission = %id, "operation submitted");
    wait_for_receipt(provider, &id, poll).await
}

/// Polls for the receipt of an already-submitted operation.
///
/// Each attempt is one sleep plus one lookup. Transient provider errors are
/// logged and consume the attempt rather than aborting the wait; a
/// validation rejection surfacing during polling (relay-side cancellation)
/// is terminal.
pub async fn wait_for_receipt(
    provider: &dyn ProviderAdapter,
    id: &SubmissionId,
    poll: &PollConfig,
) -> Result<SubmissionOutcome, PipelineError> {
    for attempt in 1..=poll.max_attempts {
        tokio::time::sleep(poll.interval).await;

        match provider.receipt(id).await {
            Ok(Some(receipt)) => {
                return Ok(if receipt.success {
                    info!(submission = %id, tx = ?receipt.tx_hash, "operation confirmed");
                    SubmissionOutcome::Confirmed(receipt)
                } else {
                    warn!(submission = %id, tx = ?receipt.tx_hash, "operation reverted");
                    SubmissionOutcome::Reverted(receipt)
                });
            }
            Ok(None) => {
                debug!(submission = %id, attempt, max = poll.max_attempts, "no receipt yet");
            }
            Err(PipelineError::ValidationRejected { message, .. }) => {
                return Ok(SubmissionOutcome::Rejected { message });
            }
            Err(e) => {
                warn!(submission = %id, attempt, error = %e, "receipt lookup failed, will retry");
            }
        }
    }

    Ok(SubmissionOutcome::TimedOut {
        id: id.clone(),
        attempts: poll.max_attempts,
    })
}
