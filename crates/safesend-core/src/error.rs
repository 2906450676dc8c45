use thiserror::Error;

pub type SafesendResult<T> = Result<T, SafesendError>;

/// Error taxonomy shared across safesend crates.
///
/// No variant ever carries a server secret, client secret, or derived key.
#[derive(Debug, Error)]
pub enum SafesendError {
    /// Malformed secret, link, or request parameter. Recoverable by the user.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The calling origin is not on the allow-list.
    #[error("origin not permitted")]
    OriginRejected,

    /// Authenticated decryption failed. The message is deliberately generic.
    #[error("decryption failed: wrong or corrupted link")]
    Decryption,

    /// Missing allow-list, storage destination, or other deployment setting.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Object storage rejected or could not serve a request.
    #[error("storage error{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Storage {
        status: Option<u16>,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SafesendError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn storage(status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::Storage {
            status,
            message: msg.into(),
        }
    }

    /// HTTP status the broker answers with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::OriginRejected => 403,
            _ => 500,
        }
    }
}
