use std::time::Duration;

/// Core error type for the bot.
///
/// Adapter crates map their specific errors into this type so the session core
/// can tell fatal startup failures from flood signals and operational errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("authorization failed: {0}")]
    Auth(String),

    #[error("session is not authorized")]
    Unauthorized,

    #[error("flood wait: retry after {0:?}")]
    FloodWait(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("unexpected reply to {0}")]
    UnexpectedReply(&'static str),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Startup failures the process cannot recover from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Connect(_) | Error::Auth(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
