//! Error types shared by the eSight client and the publisher

/// Failures talking to the eSight REST API.
///
/// Only [`EsightError::Authentication`] is fatal, and only at startup. Every
/// other variant is scoped to the single call that produced it.
#[derive(Debug, thiserror::Error)]
pub enum EsightError {
    /// Credentials rejected, or the login call could not complete
    #[error("could not get an authentication token from eSight: {0}")]
    Authentication(String),

    /// The platform answered `openid auth failed.` for the current token
    #[error("eSight session expired")]
    SessionExpired,

    /// The platform answered but reported a non-success code
    #[error("{operation} failed: {reason}")]
    Transient {
        operation: &'static str,
        reason: String,
    },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed eSight response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl EsightError {
    pub fn transient(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Transient {
            operation,
            reason: reason.into(),
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

/// Failures handing a message to the bus client.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("could not encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("publisher unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, EsightError>;
