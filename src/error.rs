use thiserror::Error;

/// Everything a request can fail with. The rpc layer maps these onto
/// JSON-RPC error codes; per-item enrichment failures never become one of
/// these (they are dropped inside the fan-out instead).
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Upstream 401. Treated as a configuration failure, not a caller error.
    #[error("upstream authentication failed: {0}")]
    Auth(String),

    #[error("bad resource uri: {0}")]
    BadUri(String),

    /// Upstream 4xx other than 401/404/409 - the gateway sent something the
    /// plugin rejected.
    #[error("upstream rejected request ({status}): {message}")]
    Client { status: u16, message: String },

    /// Transport failure, timeout, or upstream 5xx. Never retried here;
    /// retries are the caller's policy.
    #[error("upstream error: {message}")]
    Upstream {
        status: Option<u16>,
        message: String,
        #[source]
        cause: Option<reqwest::Error>,
    },
}

impl GatewayError {
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            status: None,
            message: message.into(),
            cause: None,
        }
    }

    /// JSON-RPC error code for this failure.
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::Parse(_) => -32700,
            Self::InvalidRequest(_) => -32600,
            Self::UnknownMethod(_) | Self::UnknownTool(_) => -32601,
            Self::InvalidArgs(_) => -32602,
            _ => -32603,
        }
    }

    /// Structured context for the JSON-RPC `data` field. Internal errors
    /// carry their kind (and upstream status where known) so callers can
    /// distinguish a missing note from a dead upstream.
    pub fn rpc_data(&self) -> Option<serde_json::Value> {
        let kind = match self {
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Auth(_) => "auth",
            Self::BadUri(_) => "bad_uri",
            Self::Client { .. } => "client",
            Self::Upstream { .. } => "upstream",
            _ => return None,
        };

        let mut data = serde_json::json!({ "kind": kind });
        match self {
            Self::Client { status, .. } => {
                data["status"] = serde_json::json!(status);
            }
            Self::Upstream {
                status: Some(status),
                ..
            } => {
                data["status"] = serde_json::json!(status);
            }
            _ => {}
        }
        Some(data)
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "request timed out".to_string()
        } else {
            err.to_string()
        };
        Self::Upstream {
            status: err.status().map(|s| s.as_u16()),
            message,
            cause: Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_mapping() {
        assert_eq!(GatewayError::Parse("x".into()).rpc_code(), -32700);
        assert_eq!(GatewayError::InvalidRequest("x".into()).rpc_code(), -32600);
        assert_eq!(GatewayError::UnknownMethod("x".into()).rpc_code(), -32601);
        assert_eq!(GatewayError::UnknownTool("x".into()).rpc_code(), -32601);
        assert_eq!(GatewayError::InvalidArgs("x".into()).rpc_code(), -32602);
        assert_eq!(GatewayError::NotFound("x".into()).rpc_code(), -32603);
        assert_eq!(GatewayError::upstream("x").rpc_code(), -32603);
    }

    #[test]
    fn internal_errors_carry_kind() {
        let data = GatewayError::NotFound("a.md".into()).rpc_data().unwrap();
        assert_eq!(data["kind"], "not_found");

        let data = GatewayError::Upstream {
            status: Some(502),
            message: "bad gateway".into(),
            cause: None,
        }
        .rpc_data()
        .unwrap();
        assert_eq!(data["status"], 502);

        assert!(GatewayError::InvalidArgs("x".into()).rpc_data().is_none());
    }
}
