use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PgxError;
use crate::sources::HttpContext;

const OPENFDA_BASE: &str = "https://api.fda.gov";
const OPENFDA_BASE_ENV: &str = "PGXKG_OPENFDA_BASE";
const OPENFDA_API: &str = "openfda";
const OPENFDA_RATE: f64 = 4.0;

/// Adverse reactions mined from label text. The list is deliberately
/// short: these are the terms the SNOMED mapping downstream understands.
pub const COMMON_REACTIONS: &[&str] = &["myopathy", "bleeding", "rash", "nausea", "hepatotoxicity"];

const ADVERSE_TEXT_LIMIT: usize = 2000;

pub struct OpenFdaClient {
    http: HttpContext,
    base: Cow<'static, str>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FdaLabel {
    pub drug_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adverse_reactions: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentioned_reactions: Vec<String>,
}

impl OpenFdaClient {
    pub async fn new(http: &HttpContext) -> Result<Self, PgxError> {
        http.register_rate("api.fda.gov", OPENFDA_RATE).await;
        Ok(Self {
            http: http.clone(),
            base: crate::sources::env_base(OPENFDA_BASE, OPENFDA_BASE_ENV),
        })
    }

    #[cfg(test)]
    fn new_for_test(base: String) -> Result<Self, PgxError> {
        Ok(Self {
            http: HttpContext::new()?,
            base: Cow::Owned(base),
        })
    }

    /// Fetches the first matching label for a drug. OpenFDA answers 404
    /// for unknown drugs, which is an expected miss.
    pub async fn fetch_label(&self, drug_name: &str) -> Result<Option<FdaLabel>, PgxError> {
        let drug_name = drug_name.trim();
        if drug_name.is_empty() {
            return Ok(None);
        }
        let url = crate::sources::join_endpoint(&self.base, "drug/label.json");
        self.http.acquire(&url).await?;
        let search = format!("openfda.generic_name:\"{drug_name}\"");
        let resp = self
            .http
            .client()
            .get(&url)
            .query(&[("search", search.as_str()), ("limit", "1")])
            .send()
            .await?;
        let status = resp.status();
        let body = crate::sources::read_limited_body(resp, OPENFDA_API).await?;
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(crate::sources::status_error(OPENFDA_API, status, &body));
        }
        let payload: Value = crate::sources::decode_json(OPENFDA_API, &body)?;
        let Some(result) = payload
            .get("results")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
        else {
            return Ok(None);
        };
        Ok(Some(map_label(drug_name, result)))
    }
}

fn first_text(result: &Value, key: &str) -> Option<String> {
    result
        .get(key)
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn map_label(drug_name: &str, result: &Value) -> FdaLabel {
    let adverse = first_text(result, "adverse_reactions").map(|text| {
        if text.len() > ADVERSE_TEXT_LIMIT {
            let mut end = ADVERSE_TEXT_LIMIT;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text[..end].to_string()
        } else {
            text
        }
    });
    let mentioned = adverse
        .as_deref()
        .map(mentioned_reactions)
        .unwrap_or_default();
    let brand_name = result
        .get("openfda")
        .and_then(|openfda| openfda.get("brand_name"))
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(Value::as_str)
        .map(str::to_string);

    FdaLabel {
        drug_name: drug_name.to_string(),
        brand_name,
        adverse_reactions: adverse,
        mentioned_reactions: mentioned,
    }
}

pub fn mentioned_reactions(adverse_text: &str) -> Vec<String> {
    let lower = adverse_text.to_ascii_lowercase();
    COMMON_REACTIONS
        .iter()
        .filter(|reaction| lower.contains(**reaction))
        .map(|reaction| reaction.to_string())
        .collect()
}
