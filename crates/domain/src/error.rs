/// Shared error type used across all studysync crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Empty or missing required field, rejected before any I/O.
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("timeout: {0}")]
    Timeout(String),

    /// Transport-level failure (connection refused, reset, DNS).
    #[error("HTTP: {0}")]
    Http(String),

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("client error {status}: {message}")]
    Client { status: u16, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Caller-initiated cancellation. Never surfaced as a user-facing error.
    #[error("aborted")]
    Aborted,

    #[error("store: {0}")]
    Store(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Timeouts, network failures and 5xx responses are worth another try.
    /// Everything else (4xx, validation, aborts) is permanent.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Http(_) | Error::Server { .. })
    }

    /// HTTP status used when this error crosses the API boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Auth(_) => 401,
            Error::NotFound(_) => 404,
            Error::RateLimited { .. } => 429,
            Error::Client { status, .. } => *status,
            Error::Aborted => 499,
            Error::Http(_) | Error::Server { .. } | Error::MalformedResponse(_) => 502,
            Error::Timeout(_) => 504,
            Error::Io(_)
            | Error::Json(_)
            | Error::Store(_)
            | Error::Config(_)
            | Error::Other(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
