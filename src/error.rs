//! Error types for the locker-bridge crate.

use thiserror::Error;

use crate::sdk::SdkError;

/// Domain reported for errors produced by the bridge itself.
pub const BRIDGE_ERROR_DOMAIN: &str = "bridge";

/// The main error type for this crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A tower identifier was malformed. Never reaches the SDK.
    #[error("Invalid tower id: {reason}")]
    InvalidIdentifier {
        /// Why the identifier was rejected.
        reason: String,
    },

    /// A connect request is already outstanding, or discovery is owned by one.
    #[error("Already discovering towers to connect")]
    AlreadyInProgress,

    /// No matching tower was discovered within the requested bound.
    #[error("Discovery timeout, tower not found")]
    DiscoveryTimeout,

    /// The SDK reported a connect failure.
    #[error("Connection failed: {message}")]
    ConnectFailed {
        /// Error text from the SDK.
        message: String,
        /// Numeric SDK code, kept for the host payload.
        code: i32,
        /// SDK error domain.
        domain: String,
    },

    /// The pending request was cancelled before it settled.
    #[error("Connect request cancelled")]
    Cancelled,

    /// Pass-through error from an SDK command.
    #[error("SDK error {code} ({domain}): {message}")]
    UnderlyingSdk {
        /// Numeric SDK code.
        code: i32,
        /// Error text from the SDK.
        message: String,
        /// SDK error domain.
        domain: String,
    },

    /// The bridge was constructed outside a Tokio runtime.
    #[error("No Tokio runtime available")]
    NoRuntime,

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for an [`Error::InvalidIdentifier`].
    pub fn invalid_identifier(reason: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            reason: reason.into(),
        }
    }

    /// Wrap an SDK connect failure.
    pub fn connect_failed(err: SdkError) -> Self {
        Self::ConnectFailed {
            message: err.message,
            code: err.code,
            domain: err.domain,
        }
    }

    /// String code handed to the host when rejecting a request.
    pub fn code(&self) -> String {
        match self {
            Self::InvalidIdentifier { .. } => "invalid_tower_id".to_string(),
            Self::AlreadyInProgress => "already_in_discovery".to_string(),
            Self::DiscoveryTimeout => "discovery_timeout".to_string(),
            Self::Cancelled => "cancelled".to_string(),
            Self::ConnectFailed { code, .. } | Self::UnderlyingSdk { code, .. } => {
                code.to_string()
            }
            Self::NoRuntime | Self::Internal(_) => "unknown_error".to_string(),
        }
    }

    /// Numeric code carried in the rejection payload.
    pub fn numeric_code(&self) -> i32 {
        match self {
            Self::AlreadyInProgress => 1,
            Self::DiscoveryTimeout => 2,
            Self::InvalidIdentifier { .. } => 3,
            Self::Cancelled => 4,
            Self::ConnectFailed { code, .. } | Self::UnderlyingSdk { code, .. } => *code,
            Self::NoRuntime | Self::Internal(_) => 0,
        }
    }

    /// Error domain: the SDK's for pass-through errors, [`BRIDGE_ERROR_DOMAIN`] otherwise.
    pub fn domain(&self) -> &str {
        match self {
            Self::ConnectFailed { domain, .. } | Self::UnderlyingSdk { domain, .. } => domain,
            _ => BRIDGE_ERROR_DOMAIN,
        }
    }

    /// Build the payload the host receives when a request is rejected.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.numeric_code(),
            description: self.to_string(),
            domain: self.domain().to_string(),
        }
    }
}

impl From<SdkError> for Error {
    fn from(err: SdkError) -> Self {
        Self::UnderlyingSdk {
            code: err.code,
            message: err.message,
            domain: err.domain,
        }
    }
}

/// Serializable rejection details for the host runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorPayload {
    /// Numeric code.
    pub code: i32,
    /// Human-readable description.
    pub description: String,
    /// Error domain.
    pub domain: String,
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_local_error_codes() {
        assert_eq!(Error::AlreadyInProgress.code(), "already_in_discovery");
        assert_eq!(Error::DiscoveryTimeout.numeric_code(), 2);
        assert_eq!(Error::invalid_identifier("short").numeric_code(), 3);
        assert_eq!(Error::Internal("x".into()).code(), "unknown_error");
        assert_eq!(Error::DiscoveryTimeout.domain(), BRIDGE_ERROR_DOMAIN);
    }

    #[test]
    fn test_sdk_error_keeps_code_and_domain() {
        let err: Error = SdkError::new(42, "locker jammed", "sdk.native").into();
        assert_eq!(
            err.to_payload(),
            ErrorPayload {
                code: 42,
                description: "SDK error 42 (sdk.native): locker jammed".to_string(),
                domain: "sdk.native".to_string(),
            }
        );
        assert_eq!(err.code(), "42");
    }

    #[test]
    fn test_connect_failed_message() {
        let err = Error::connect_failed(SdkError::new(7, "out of range", "sdk.ble"));
        assert_eq!(err.to_string(), "Connection failed: out of range");
        assert_eq!(err.domain(), "sdk.ble");
    }
}
