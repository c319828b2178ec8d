use thiserror::Error;

/// Failures from the signed REST client.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Timeouts and connection resets that survived every retry.
    #[error("transient network error after {attempts} attempts: {source}")]
    Transient {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("rate limited (429) after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("server error {status} after {attempts} attempts")]
    Server { status: u16, attempts: u32 },

    /// Any other 4xx, including signature and permission failures. Never retried.
    #[error("request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("exchange returned code {code}: {msg}")]
    Exchange { code: String, msg: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("failed to build request: {0}")]
    Build(String),

    #[error("client session is closed")]
    Closed,
}

impl ApiError {
    /// Errors a caller may expect to clear up on its next attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::Transient { .. } | ApiError::RateLimited { .. } | ApiError::Server { .. }
        )
    }
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("subscription rejected: {0}")]
    Subscribe(String),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("connection closed by peer")]
    Closed,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage connection timed out")]
    Timeout,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error(transparent)]
    Load(#[from] config::ConfigError),
}

/// Crate-level error.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unparseable payload from the stream or an endpoint. Logged and dropped.
    #[error("malformed data: {0}")]
    MalformedData(String),

    /// The exchange refused an order. Position state is left as it was.
    #[error("order rejected: {0}")]
    Order(String),

    #[error("lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, Error>;
