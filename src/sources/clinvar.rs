use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PgxError;
use crate::sources::HttpContext;

const EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
const EUTILS_BASE_ENV: &str = "PGXKG_NCBI_EUTILS_BASE";
const CLINVAR_API: &str = "clinvar";
const EUTILS_RATE: f64 = 3.0;

/// ClinVar submission summaries via the NCBI eutils esearch/esummary pair.
pub struct ClinVarClient {
    http: HttpContext,
    base: Cow<'static, str>,
    api_key: Option<String>,
    email: Option<String>,
}

/// Normalised ClinVar evidence fragment attached to a variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinVarRecord {
    pub clinvar_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinical_significance: Option<String>,
    pub review_status: String,
    pub star_rating: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phenotypes: Vec<String>,
}

impl ClinVarClient {
    pub async fn new(
        http: &HttpContext,
        api_key: Option<String>,
        email: Option<String>,
    ) -> Result<Self, PgxError> {
        http.register_rate("eutils.ncbi.nlm.nih.gov", EUTILS_RATE).await;
        Ok(Self {
            http: http.clone(),
            base: crate::sources::env_base(EUTILS_BASE, EUTILS_BASE_ENV),
            api_key,
            email,
        })
    }

    #[cfg(test)]
    fn new_for_test(base: String) -> Result<Self, PgxError> {
        Ok(Self {
            http: HttpContext::new()?,
            base: Cow::Owned(base),
            api_key: None,
            email: None,
        })
    }

    fn identity_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("tool", "pgx-kg".to_string())];
        if let Some(email) = self.email.as_deref() {
            params.push(("email", email.to_string()));
        }
        if let Some(key) = self.api_key.as_deref() {
            params.push(("api_key", key.to_string()));
        }
        params
    }

    async fn get_json(&self, path: &str, params: &[(&str, String)]) -> Result<Value, PgxError> {
        let url = crate::sources::join_endpoint(&self.base, path);
        self.http.acquire(&url).await?;
        let mut query: Vec<(&str, String)> = params.to_vec();
        query.extend(self.identity_params());
        let resp = self.http.client().get(&url).query(&query).send().await?;
        let status = resp.status();
        let body = crate::sources::read_limited_body(resp, CLINVAR_API).await?;
        if !status.is_success() {
            return Err(crate::sources::status_error(CLINVAR_API, status, &body));
        }
        crate::sources::decode_json(CLINVAR_API, &body)
    }

    /// Looks up the submission summary for an rsID. `Ok(None)` when
    /// ClinVar has no record — an expected miss, not an error.
    pub async fn fetch_by_rsid(&self, rsid: &str) -> Result<Option<ClinVarRecord>, PgxError> {
        let rsid = rsid.trim();
        if rsid.is_empty() {
            return Err(PgxError::InvalidArgument("rsID is required".into()));
        }

        let search = self
            .get_json(
                "esearch.fcgi",
                &[
                    ("db", "clinvar".to_string()),
                    ("term", rsid.to_string()),
                    ("retmode", "json".to_string()),
                ],
            )
            .await?;
        let Some(uid) = first_search_id(&search) else {
            return Ok(None);
        };

        let summary = self
            .get_json(
                "esummary.fcgi",
                &[
                    ("db", "clinvar".to_string()),
                    ("id", uid.clone()),
                    ("retmode", "json".to_string()),
                ],
            )
            .await?;

        Ok(parse_summary(&summary, &uid))
    }
}

fn first_search_id(payload: &Value) -> Option<String> {
    payload
        .get("esearchresult")?
        .get("idlist")?
        .as_array()?
        .first()?
        .as_str()
        .map(str::to_string)
}

fn parse_summary(payload: &Value, uid: &str) -> Option<ClinVarRecord> {
    let record = payload.get("result")?.get(uid)?;

    // Newer esummary payloads carry germline_classification; older ones
    // use clinical_significance.
    let classification = record
        .get("germline_classification")
        .or_else(|| record.get("clinical_significance"))?;
    let significance = classification
        .get("description")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let review_status = classification
        .get("review_status")
        .and_then(Value::as_str)
        .unwrap_or("no assertion criteria provided")
        .trim()
        .to_string();

    let mut phenotypes: Vec<String> = Vec::new();
    let trait_sets = classification
        .get("trait_set")
        .or_else(|| record.get("trait_set"))
        .and_then(Value::as_array);
    if let Some(rows) = trait_sets {
        for row in rows {
            if let Some(name) = row.get("trait_name").and_then(Value::as_str) {
                let name = name.trim();
                if !name.is_empty() && !phenotypes.iter().any(|p| p == name) {
                    phenotypes.push(name.to_string());
                }
            }
        }
    }

    Some(ClinVarRecord {
        clinvar_id: record
            .get("accession")
            .and_then(Value::as_str)
            .unwrap_or(uid)
            .to_string(),
        clinical_significance: significance,
        star_rating: star_rating(&review_status),
        review_status,
        phenotypes,
    })
}

/// Fixed review-status to star-rating mapping (0 = no assertion criteria,
/// 4 = practice guideline).
pub fn star_rating(review_status: &str) -> u8 {
    let status = review_status.to_ascii_lowercase();
    if status.contains("practice guideline") {
        4
    } else if status.contains("expert panel") {
        3
    } else if status.contains("multiple submitters") && status.contains("no conflicts") {
        2
    } else if status.contains("single submitter") || status.contains("conflicting") {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn star_rating_covers_all_review_tiers() {
        assert_eq!(star_rating("practice guideline"), 4);
        assert_eq!(star_rating("reviewed by expert panel"), 3);
        assert_eq!(
            star_rating("criteria provided, multiple submitters, no conflicts"),
            2
        );
        assert_eq!(star_rating("criteria provided, single submitter"), 1);
        assert_eq!(
            star_rating("criteria provided, conflicting classifications"),
            1
        );
        assert_eq!(star_rating("no assertion criteria provided"), 0);
    }

    #[tokio::test]
    async fn fetch_by_rsid_resolves_search_then_summary() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/esearch.fcgi"))
            .and(query_param("db", "clinvar"))
            .and(query_param("term", "rs4244285"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "esearchresult": {"idlist": ["225958"]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/esummary.fcgi"))
            .and(query_param("id", "225958"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {
                    "uids": ["225958"],
                    "225958": {
                        "accession": "VCV000634918",
                        "germline_classification": {
                            "description": "drug response",
                            "review_status": "reviewed by expert panel",
                            "trait_set": [
                                {"trait_name": "Clopidogrel response"},
                                {"trait_name": "Clopidogrel response"}
                            ]
                        }
                    }
                }
            })))
            .mount(&server)
            .await;

        let client = ClinVarClient::new_for_test(server.uri()).unwrap();
        let record = client
            .fetch_by_rsid("rs4244285")
            .await
            .unwrap()
            .expect("record");
        assert_eq!(record.clinvar_id, "VCV000634918");
        assert_eq!(record.star_rating, 3);
        assert_eq!(record.phenotypes, vec!["Clopidogrel response".to_string()]);
        assert_eq!(record.clinical_significance.as_deref(), Some("drug response"));
    }

    #[tokio::test]
    async fn empty_search_result_is_a_clean_miss() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/esearch.fcgi"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "esearchresult": {"idlist": []}
            })))
            .mount(&server)
            .await;

        let client = ClinVarClient::new_for_test(server.uri()).unwrap();
        assert!(client.fetch_by_rsid("rs999").await.unwrap().is_none());
    }

    #[test]
    fn parse_summary_accepts_legacy_clinical_significance_key() {
        let payload = json!({
            "result": {
                "7": {
                    "accession": "RCV000007",
                    "clinical_significance": {
                        "description": "Pathogenic",
                        "review_status": "criteria provided, single submitter"
                    },
                    "trait_set": [{"trait_name": "Malignant hyperthermia"}]
                }
            }
        });
        let record = parse_summary(&payload, "7").expect("record");
        assert_eq!(record.star_rating, 1);
        assert_eq!(record.phenotypes.len(), 1);
    }
}
