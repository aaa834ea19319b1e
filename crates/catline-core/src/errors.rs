/// Core error type for the relay.
///
/// Adapter crates should map their specific errors into this type so the
/// relay core can handle failures consistently (peer reply vs silent drop).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),

    #[error("illegal request format")]
    Format,

    #[error("no such section: {0}")]
    NoSuchSection(String),

    #[error("bad password")]
    BadPassword,

    #[error("invalid section: {0}")]
    InvalidSection(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("timed out waiting for peer")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, Error>;
