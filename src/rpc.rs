use crate::config::ProviderKind;
use crate::error::{PipelineError, ProviderFailure};
use serde_json::Value;

/// Shared JSON-RPC 2.0 transport for bundler/paymaster backends.
///
/// One request/response exchange per call. Transient failures surface as
/// typed errors; the caller decides whether to retry.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    provider: ProviderKind,
    url: String,
    http: reqwest::Client,
}

impl JsonRpcClient {
    pub fn new(provider: ProviderKind, url: String) -> Self {
        Self {
            provider,
            url,
            http: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// POSTs one JSON-RPC request and returns the `result` value.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, PipelineError> {
        let req = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                PipelineError::provider(self.provider, method, ProviderFailure::Transport(e))
            })?;

        let status = resp.status();
        let body: Value = resp.json().await.map_err(|e| {
            PipelineError::provider(self.provider, method, ProviderFailure::Transport(e))
        })?;

        // Some backends return JSON-RPC error envelopes with non-2xx status;
        // prefer the envelope when present.
        if let Some(err) = body.get("error") {
            let code = err.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string();
            return Err(classify_rpc_error(self.provider, method, code, message));
        }

        if !status.is_success() {
            return Err(PipelineError::provider(
                self.provider,
                method,
                ProviderFailure::MalformedResponse(format!("HTTP {status}: {body}")),
            ));
        }

        body.get("result").cloned().ok_or_else(|| {
            PipelineError::provider(
                self.provider,
                method,
                ProviderFailure::MalformedResponse("missing result field".into()),
            )
        })
    }

    pub fn malformed(&self, method: &str, detail: impl Into<String>) -> PipelineError {
        PipelineError::provider(
            self.provider,
            method,
            ProviderFailure::MalformedResponse(detail.into()),
        )
    }
}

/// Separates "the backend says this operation is invalid" from transport or
/// envelope problems. Entry-point rejections use the ERC-4337 error code
/// range and AAxx revert reasons; everything else stays a provider error.
pub fn classify_rpc_error(
    provider: ProviderKind,
    method: &str,
    code: i64,
    message: String,
) -> PipelineError {
    if is_validation_rejection(code, &message) {
        PipelineError::ValidationRejected { provider, message }
    } else {
        PipelineError::provider(provider, method, ProviderFailure::Rpc { code, message })
    }
}

fn is_validation_rejection(code: i64, message: &str) -> bool {
    if (-32521..=-32500).contains(&code) {
        return true;
    }
    // Entry-point revert reasons look like "AA21 didn't pay prefund".
    let bytes = message.as_bytes();
    bytes.windows(4).any(|w| {
        w[0] == b'A' && w[1] == b'A' && w[2].is_ascii_digit() && w[3].is_ascii_digit()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_point_error_codes_are_validation_rejections() {
        let err = classify_rpc_error(
            ProviderKind::Pimlico,
            "eth_sendUserOperation",
            -32500,
            "rejected by simulation".into(),
        );
        assert!(matches!(err, PipelineError::ValidationRejected { .. }), "{err}");
    }

    #[test]
    fn aa_revert_reasons_are_validation_rejections() {
        let err = classify_rpc_error(
            ProviderKind::Alchemy,
            "eth_estimateUserOperationGas",
            -32000,
            "execution reverted: AA21 didn't pay prefund".into(),
        );
        assert!(matches!(err, PipelineError::ValidationRejected { .. }), "{err}");
    }

    #[test]
    fn other_rpc_errors_stay_provider_errors() {
        let err = classify_rpc_error(
            ProviderKind::Gelato,
            "eth_sendUserOperation",
            -32603,
            "internal error".into(),
        );
        match err {
            PipelineError::Provider {
                failure: ProviderFailure::Rpc { code, .. },
                ..
            } => assert_eq!(code, -32603),
            other => panic!("expected provider error, got {other}"),
        }
    }
}
