//! Error types for the afk bot.

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Configuration could not be parsed or failed validation.
    #[error("config error: {0}")]
    Config(String),

    /// A session could not be established (DNS, refused, timeout).
    #[error("connection error: {0}")]
    Connection(String),

    /// An action on a live session failed.
    #[error("session error: {0}")]
    Session(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, BotError>;
