//! Upstream API clients and the shared HTTP plumbing they sit on.
//!
//! Every client holds an [`HttpContext`] — the single rate-limited,
//! retrying HTTP access primitive — plus its own base URL with an
//! environment override for tests and mirrors.

pub mod bioportal;
pub mod chembl;
pub mod clinvar;
pub mod europepmc;
pub mod openfda;
pub mod pharmgkb;
pub mod rate_limit;
pub mod rxnorm;
pub mod uniprot;

use std::borrow::Cow;
use std::sync::OnceLock;
use std::time::Duration;

use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use tokio_util::sync::CancellationToken;

use crate::error::PgxError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;
const BODY_EXCERPT_LEN: usize = 240;
const USER_AGENT: &str = concat!("pgx-kg/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP access: one reqwest client behind retry middleware, one
/// per-host rate-limiter registry, one cancellation token. Cloning is
/// cheap and clones share all three.
#[derive(Clone)]
pub struct HttpContext {
    client: ClientWithMiddleware,
    limits: rate_limit::RateLimiter,
    cancel: CancellationToken,
}

impl HttpContext {
    pub fn new() -> Result<Self, PgxError> {
        Self::with_cancel(CancellationToken::new())
    }

    pub fn with_cancel(cancel: CancellationToken) -> Result<Self, PgxError> {
        let inner = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(DEFAULT_TIMEOUT)
            .gzip(true)
            .build()
            .map_err(|err| PgxError::Api {
                api: "http".to_string(),
                message: format!("Failed to build HTTP client: {err}"),
            })?;
        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(250), Duration::from_secs(8))
            .build_with_max_retries(MAX_RETRIES);
        let client = reqwest_middleware::ClientBuilder::new(inner)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        Ok(Self {
            client,
            limits: rate_limit::RateLimiter::new(),
            cancel,
        })
    }

    pub fn client(&self) -> &ClientWithMiddleware {
        &self.client
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn register_rate(&self, host: &str, requests_per_second: f64) {
        self.limits.register(host, requests_per_second).await;
    }

    /// Rate-limit gate for one request. Every HTTP call is a suspension
    /// point; cancellation is honoured here and surfaces as `Cancelled`.
    pub async fn acquire(&self, url: &str) -> Result<(), PgxError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(PgxError::Cancelled),
            _ = self.limits.wait_for_url(url) => Ok(()),
        }
    }
}

/// Base URL with a per-source environment override (used by tests and
/// local mirrors).
pub fn env_base(default: &'static str, env_var: &str) -> Cow<'static, str> {
    match std::env::var(env_var) {
        Ok(value) if !value.trim().is_empty() => Cow::Owned(value.trim().to_string()),
        _ => Cow::Borrowed(default),
    }
}

pub fn join_endpoint(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Reads a response body with a hard size cap.
pub async fn read_limited_body(resp: reqwest::Response, api: &str) -> Result<Vec<u8>, PgxError> {
    let bytes = resp.bytes().await.map_err(|err| PgxError::ApiTransient {
        api: api.to_string(),
        message: format!("Failed to read response body: {err}"),
    })?;
    if bytes.len() > MAX_BODY_BYTES {
        return Err(PgxError::Api {
            api: api.to_string(),
            message: format!("Response body too large ({} bytes)", bytes.len()),
        });
    }
    Ok(bytes.to_vec())
}

pub fn body_excerpt(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    if trimmed.len() <= BODY_EXCERPT_LEN {
        trimmed.to_string()
    } else {
        let mut end = BODY_EXCERPT_LEN;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &trimmed[..end])
    }
}

/// Classifies a non-success status: 5xx and 429 are transient (already
/// retried by the middleware), everything else is permanent.
pub fn status_error(api: &str, status: http::StatusCode, body: &[u8]) -> PgxError {
    let excerpt = body_excerpt(body);
    let message = format!("HTTP {status}: {excerpt}");
    if status.is_server_error() || status == http::StatusCode::TOO_MANY_REQUESTS {
        PgxError::ApiTransient {
            api: api.to_string(),
            message,
        }
    } else {
        PgxError::Api {
            api: api.to_string(),
            message,
        }
    }
}

pub fn ensure_json_content_type(
    api: &str,
    content_type: Option<&reqwest::header::HeaderValue>,
    body: &[u8],
) -> Result<(), PgxError> {
    let Some(value) = content_type.and_then(|v| v.to_str().ok()) else {
        return Ok(());
    };
    if value.to_ascii_lowercase().contains("json") {
        return Ok(());
    }
    Err(PgxError::Api {
        api: api.to_string(),
        message: format!(
            "Expected JSON, got {value}: {}",
            body_excerpt(body)
        ),
    })
}

pub fn decode_json<T: serde::de::DeserializeOwned>(api: &str, body: &[u8]) -> Result<T, PgxError> {
    serde_json::from_slice(body).map_err(|source| PgxError::ApiJson {
        api: api.to_string(),
        source,
    })
}

/// Env-based base-URL overrides are process-wide; tests that set them
/// serialise on this lock.
#[cfg(test)]
pub mod test_env {
    pub static ENV_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());
}

static GENE_SYMBOL_RE: OnceLock<regex::Regex> = OnceLock::new();

pub fn is_valid_gene_symbol(symbol: &str) -> bool {
    let re = GENE_SYMBOL_RE
        .get_or_init(|| regex::Regex::new(r"^[A-Z][A-Z0-9-]{0,15}$").expect("gene symbol regex"));
    re.is_match(symbol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_base_prefers_non_empty_override() {
        // Unique variable name so parallel tests cannot collide.
        unsafe { std::env::set_var("PGXKG_TEST_BASE_A", "http://localhost:1234/") };
        assert_eq!(
            env_base("https://real.example.org", "PGXKG_TEST_BASE_A"),
            "http://localhost:1234/"
        );
        unsafe { std::env::remove_var("PGXKG_TEST_BASE_A") };
        assert_eq!(
            env_base("https://real.example.org", "PGXKG_TEST_BASE_A"),
            "https://real.example.org"
        );
    }

    #[test]
    fn join_endpoint_normalises_slashes() {
        assert_eq!(
            join_endpoint("https://api.example.org/v1/", "/data/variant"),
            "https://api.example.org/v1/data/variant"
        );
    }

    #[test]
    fn status_classification() {
        assert!(status_error("x", http::StatusCode::SERVICE_UNAVAILABLE, b"").is_transient());
        assert!(status_error("x", http::StatusCode::TOO_MANY_REQUESTS, b"").is_transient());
        assert!(!status_error("x", http::StatusCode::BAD_REQUEST, b"oops").is_transient());
    }

    #[test]
    fn body_excerpt_truncates_on_char_boundary() {
        let long = "é".repeat(500);
        let excerpt = body_excerpt(long.as_bytes());
        assert!(excerpt.ends_with('…'));
        assert!(excerpt.len() <= BODY_EXCERPT_LEN + '…'.len_utf8());
    }

    #[test]
    fn gene_symbol_validation() {
        assert!(is_valid_gene_symbol("CYP2C19"));
        assert!(is_valid_gene_symbol("UGT1A1"));
        assert!(is_valid_gene_symbol("HLA-B"));
        assert!(!is_valid_gene_symbol("cyp2c19"));
        assert!(!is_valid_gene_symbol("type 2 diabetes"));
        assert!(!is_valid_gene_symbol(""));
    }

    #[tokio::test]
    async fn cancelled_context_refuses_acquire() {
        let ctx = HttpContext::new().expect("context");
        ctx.cancel_token().cancel();
        let err = ctx
            .acquire("https://api.example.org/x")
            .await
            .expect_err("cancelled");
        assert!(err.is_cancelled());
    }
}
