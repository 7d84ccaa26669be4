//! Error taxonomy for remote requests.

use serde_json::Value;
use thiserror::Error;

/// Classified failure of a single remote request.
///
/// Callers branch on the variant: the facade records a pending operation on
/// `Connectivity`, the CLI routes `AuthExpired` to re-login. Every HTTP
/// variant carries the parsed error body, never just a display string.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The endpoint could not be reached (DNS failure, refused connection,
    /// transport timeout).
    #[error("cannot reach {url}")]
    Connectivity {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// HTTP 401. The stored session has already been purged by the client.
    #[error("authorization expired{}", .body.suffix())]
    AuthExpired { body: ErrorBody },

    /// HTTP 403.
    #[error("forbidden{}", .body.suffix())]
    Forbidden { body: ErrorBody },

    /// HTTP 404.
    #[error("not found{}", .body.suffix())]
    NotFound { body: ErrorBody },

    /// HTTP 5xx.
    #[error("server error {status}{}", .body.suffix())]
    Server { status: u16, body: ErrorBody },

    /// Any other non-2xx status.
    #[error("request failed with status {status}{}", .body.suffix())]
    Failed { status: u16, body: ErrorBody },

    /// A 2xx response declared as JSON whose body did not decode.
    #[error("malformed response from {url}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl RequestError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, RequestError::Connectivity { .. })
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, RequestError::AuthExpired { .. })
    }

    /// HTTP status carried by the error, when one was received at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Connectivity { .. } | RequestError::Decode { .. } => None,
            RequestError::AuthExpired { .. } => Some(401),
            RequestError::Forbidden { .. } => Some(403),
            RequestError::NotFound { .. } => Some(404),
            RequestError::Server { status, .. } | RequestError::Failed { status, .. } => {
                Some(*status)
            }
        }
    }

    pub(super) fn classify(status: reqwest::StatusCode, raw: String) -> Self {
        let body = ErrorBody::parse(raw);
        match status.as_u16() {
            401 => RequestError::AuthExpired { body },
            403 => RequestError::Forbidden { body },
            404 => RequestError::NotFound { body },
            s if s >= 500 => RequestError::Server { status: s, body },
            s => RequestError::Failed { status: s, body },
        }
    }
}

/// Error payload of a non-2xx response.
///
/// The service is inconsistent about the shape: `{"error":{"message":...}}`,
/// `{"error":"..."}`, `{"message":...}` and plain text all occur. `raw` keeps
/// the body verbatim for callers that need more than the message.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ErrorBody {
    pub message: Option<String>,
    pub raw: String,
}

impl ErrorBody {
    pub fn parse(raw: String) -> Self {
        let message = extract_message(&raw);
        ErrorBody { message, raw }
    }

    fn suffix(&self) -> String {
        match &self.message {
            Some(m) => format!(": {m}"),
            None => String::new(),
        }
    }
}

fn extract_message(raw: &str) -> Option<String> {
    if let Ok(v) = serde_json::from_str::<Value>(raw) {
        if let Some(m) = v
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
        {
            return Some(m.to_string());
        }
        if let Some(m) = v.get("error").and_then(Value::as_str) {
            return Some(m.to_string());
        }
        if let Some(m) = v.get("message").and_then(Value::as_str) {
            return Some(m.to_string());
        }
        return None;
    }
    let t = raw.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}
