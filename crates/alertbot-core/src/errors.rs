/// Core error type for the bot.
///
/// Adapter crates map their specific errors into this type so command handlers
/// and the alert monitor can treat failures consistently (user-facing message
/// vs logged-and-skipped).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("unknown region: {0}")]
    UnknownRegion(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
