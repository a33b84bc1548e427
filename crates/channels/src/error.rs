use std::error::Error as StdError;

/// Crate-wide result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed session errors shared by every [`crate::ChannelSession`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input payload or parameter is invalid.
    #[error("invalid channel input: {message}")]
    InvalidInput { message: String },

    /// The session is not authenticated or not connected.
    #[error("session unavailable: {message}")]
    Unavailable { message: String },

    /// No channel with this name is visible to the session.
    #[error("channel not found: {name}")]
    ChannelNotFound { name: String },

    /// The network accepted the request but refused to deliver it.
    #[error("send rejected: {message}")]
    Rejected { message: String },

    /// No answer from the session within the allotted time.
    #[error("timed out after {secs}s waiting for {operation}")]
    Timeout { operation: String, secs: u64 },

    /// Wrapped source error from an external dependency.
    #[error("session operation failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// Plain message produced by `.context()`.
    #[error("{0}")]
    Message(String),

    /// JSON (de)serialization failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn channel_not_found(name: impl std::fmt::Display) -> Self {
        Self::ChannelNotFound {
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn rejected(message: impl std::fmt::Display) -> Self {
        Self::Rejected {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

impl courier_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

courier_common::impl_context!();
