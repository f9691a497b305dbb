use thiserror::Error;

/// Error taxonomy for the pipeline.
///
/// Upstream failures are split into three classes so phases can decide
/// whether to degrade or abort: `ApiTransient` (retries exhausted),
/// `Api` (permanent, 4xx or schema mismatch) and `ApiJson` (decode
/// failure on a successful response).
#[derive(Debug, Error)]
pub enum PgxError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{api} API error: {message}")]
    Api { api: String, message: String },

    #[error("{api} API transient failure: {message}")]
    ApiTransient { api: String, message: String },

    #[error("{api} API returned invalid JSON: {source}")]
    ApiJson {
        api: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("contract violation: {0}")]
    Contract(String),

    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl PgxError {
    /// Transient failures were already retried by the HTTP layer; callers
    /// seeing one should degrade the affected sub-record and continue.
    pub fn is_transient(&self) -> bool {
        matches!(self, PgxError::ApiTransient { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PgxError::NotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PgxError::Cancelled)
    }
}

impl From<reqwest::Error> for PgxError {
    fn from(err: reqwest::Error) -> Self {
        let api = err
            .url()
            .and_then(|u| u.host_str())
            .unwrap_or("http")
            .to_string();
        PgxError::ApiTransient {
            api,
            message: err.to_string(),
        }
    }
}

impl From<reqwest_middleware::Error> for PgxError {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(inner) => inner.into(),
            reqwest_middleware::Error::Middleware(inner) => PgxError::ApiTransient {
                api: "http".to_string(),
                message: inner.to_string(),
            },
        }
    }
}
