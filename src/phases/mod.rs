//! Phase runners P1–P5. Each phase reads its predecessor's output and
//! writes its own under `data/phase{1..3}/` or `output/`; all phases are
//! idempotent given the same inputs.

pub mod clinical;
pub mod discovery;
pub mod enrichment;
pub mod export;
pub mod graph;
pub mod metabolizer;

use std::path::Path;

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::PgxError;

pub fn timestamp_now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

/// Writes a pretty-printed JSON artifact, creating parent directories.
/// Per-gene paths keep concurrent writers from overlapping.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PgxError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, body).await?;
    Ok(())
}
