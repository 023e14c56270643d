use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors of the linking flow.
///
/// The first five variants are the user-facing taxonomy rendered on the
/// status card. The rest are infrastructure failures; inside a callback flow
/// they are folded into [`LinkError::ExchangeRejected`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("authorization rejected")]
    RejectedByUser { reason: String },

    #[error("missing authorization code")]
    MalformedCallback,

    #[error("primary session unavailable")]
    SessionMissing,

    #[error("could not finalize linking after {attempts} attempts")]
    TransientAuth { attempts: u32 },

    #[error("{}", describe_rejection(*.status, .reason.as_deref()))]
    ExchangeRejected {
        status: Option<u16>,
        reason: Option<String>,
    },

    #[error("session refresh failed: {0}")]
    RefreshFailed(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("session storage error: {0}")]
    Storage(String),

    #[error("window error: {0}")]
    Window(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("invalid callback route: {0}")]
    InvalidRoute(String),

    #[error("configuration error: {0}")]
    Config(String),
}

fn describe_rejection(status: Option<u16>, reason: Option<&str>) -> String {
    match (reason, status) {
        (Some(reason), _) => format!("linking failed: {}", reason),
        (None, Some(status)) => format!("linking failed (HTTP {})", status),
        (None, None) => "linking failed".to_string(),
    }
}

/// Coarse classification of [`LinkError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkErrorKind {
    RejectedByUser,
    MalformedCallback,
    SessionMissing,
    TransientAuth,
    ExchangeRejected,
    RefreshFailure,
    Infrastructure,
}

impl LinkErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkErrorKind::RejectedByUser => "rejected_by_user",
            LinkErrorKind::MalformedCallback => "malformed_callback",
            LinkErrorKind::SessionMissing => "session_missing",
            LinkErrorKind::TransientAuth => "transient_auth",
            LinkErrorKind::ExchangeRejected => "exchange_rejected",
            LinkErrorKind::RefreshFailure => "refresh_failure",
            LinkErrorKind::Infrastructure => "infrastructure",
        }
    }
}

impl LinkError {
    pub fn kind(&self) -> LinkErrorKind {
        match self {
            LinkError::RejectedByUser { .. } => LinkErrorKind::RejectedByUser,
            LinkError::MalformedCallback => LinkErrorKind::MalformedCallback,
            LinkError::SessionMissing => LinkErrorKind::SessionMissing,
            LinkError::TransientAuth { .. } => LinkErrorKind::TransientAuth,
            LinkError::ExchangeRejected { .. } => LinkErrorKind::ExchangeRejected,
            LinkError::RefreshFailed(_) => LinkErrorKind::RefreshFailure,
            _ => LinkErrorKind::Infrastructure,
        }
    }

    /// Whether a manual retry makes sense for this error.
    ///
    /// Retrying cannot help when the user declined, the redirect carried no
    /// code, or there is no primary session to authorize the exchange.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind(),
            LinkErrorKind::RejectedByUser
                | LinkErrorKind::MalformedCallback
                | LinkErrorKind::SessionMissing
        )
    }

    /// Folds infrastructure failures into the exchange-rejected class.
    pub(crate) fn into_exchange_failure(self) -> Self {
        match self.kind() {
            LinkErrorKind::Infrastructure | LinkErrorKind::RefreshFailure => {
                LinkError::ExchangeRejected {
                    status: None,
                    reason: Some(self.to_string()),
                }
            }
            _ => self,
        }
    }

    pub(crate) fn storage(err: BridgeError) -> Self {
        LinkError::Storage(err.to_string())
    }
}

impl From<BridgeError> for LinkError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Window(msg) => LinkError::Window(msg),
            other => LinkError::Network(other.to_string()),
        }
    }
}

impl From<core_runtime::Error> for LinkError {
    fn from(err: core_runtime::Error) -> Self {
        LinkError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_facing_messages() {
        assert_eq!(
            LinkError::RejectedByUser {
                reason: "access_denied".to_string()
            }
            .to_string(),
            "authorization rejected"
        );
        assert_eq!(
            LinkError::MalformedCallback.to_string(),
            "missing authorization code"
        );
        assert_eq!(
            LinkError::TransientAuth { attempts: 3 }.to_string(),
            "could not finalize linking after 3 attempts"
        );
    }

    #[test]
    fn test_exchange_rejected_includes_server_reason() {
        let err = LinkError::ExchangeRejected {
            status: Some(400),
            reason: Some("invalid_grant".to_string()),
        };
        assert_eq!(err.to_string(), "linking failed: invalid_grant");

        let err = LinkError::ExchangeRejected {
            status: Some(502),
            reason: None,
        };
        assert_eq!(err.to_string(), "linking failed (HTTP 502)");
    }

    #[test]
    fn test_retryability() {
        assert!(!LinkError::MalformedCallback.is_retryable());
        assert!(!LinkError::SessionMissing.is_retryable());
        assert!(!LinkError::RejectedByUser {
            reason: String::new()
        }
        .is_retryable());
        assert!(LinkError::TransientAuth { attempts: 3 }.is_retryable());
        assert!(LinkError::ExchangeRejected {
            status: None,
            reason: None
        }
        .is_retryable());
    }

    #[test]
    fn test_network_errors_fold_into_exchange_rejected() {
        let err: LinkError = BridgeError::Timeout("deadline elapsed".to_string()).into();
        assert_eq!(err.kind(), LinkErrorKind::Infrastructure);

        let folded = err.into_exchange_failure();
        assert_eq!(folded.kind(), LinkErrorKind::ExchangeRejected);
        assert!(folded.to_string().contains("deadline elapsed"));

        let untouched = LinkError::MalformedCallback.into_exchange_failure();
        assert_eq!(untouched, LinkError::MalformedCallback);
    }

    #[test]
    fn test_window_bridge_error_maps_to_window() {
        let err: LinkError = BridgeError::Window("no opener".to_string()).into();
        assert!(matches!(err, LinkError::Window(_)));
    }
}
