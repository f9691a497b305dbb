use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PgxError;
use crate::sources::HttpContext;

const RXNAV_BASE: &str = "https://rxnav.nlm.nih.gov/REST";
const RXNAV_BASE_ENV: &str = "PGXKG_RXNAV_BASE";
const RXNORM_API: &str = "rxnorm";
const RXNAV_RATE: f64 = 10.0;

pub struct RxNormClient {
    http: HttpContext,
    base: Cow<'static, str>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RxNormConcept {
    pub cui: String,
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl RxNormClient {
    pub async fn new(http: &HttpContext) -> Result<Self, PgxError> {
        http.register_rate("rxnav.nlm.nih.gov", RXNAV_RATE).await;
        Ok(Self {
            http: http.clone(),
            base: crate::sources::env_base(RXNAV_BASE, RXNAV_BASE_ENV),
        })
    }

    #[cfg(test)]
    fn new_for_test(base: String) -> Result<Self, PgxError> {
        Ok(Self {
            http: HttpContext::new()?,
            base: Cow::Owned(base),
        })
    }

    async fn get_json(&self, path: &str, params: &[(&str, &str)]) -> Result<Value, PgxError> {
        let url = crate::sources::join_endpoint(&self.base, path);
        self.http.acquire(&url).await?;
        let resp = self.http.client().get(&url).query(params).send().await?;
        let status = resp.status();
        let body = crate::sources::read_limited_body(resp, RXNORM_API).await?;
        if !status.is_success() {
            return Err(crate::sources::status_error(RXNORM_API, status, &body));
        }
        crate::sources::decode_json(RXNORM_API, &body)
    }

    /// Resolves a drug name to its RxNorm concept id. Approximate
    /// matching is on, so brand names resolve to their ingredient.
    pub async fn resolve(&self, name: &str) -> Result<Option<RxNormConcept>, PgxError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        let payload = self
            .get_json("rxcui.json", &[("name", name), ("search", "1")])
            .await?;
        let cui = payload
            .get("idGroup")
            .and_then(|group| group.get("rxnormId"))
            .and_then(Value::as_array)
            .and_then(|ids| ids.first())
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty());
        let Some(cui) = cui else {
            return Ok(None);
        };

        let display = self.display_name(cui).await.unwrap_or(None);
        Ok(Some(RxNormConcept {
            cui: cui.to_string(),
            uri: format!("https://identifiers.org/rxnorm:{cui}"),
            name: display,
        }))
    }

    /// RxNorm-standardised display name for a CUI, used as the last
    /// SNOMED search strategy for oddly spelled drug names.
    pub async fn display_name(&self, cui: &str) -> Result<Option<String>, PgxError> {
        let payload = self
            .get_json(
                &format!("rxcui/{cui}/property.json"),
                &[("propName", "RxNorm Name")],
            )
            .await?;
        Ok(payload
            .get("propConceptGroup")
            .and_then(|group| group.get("propConcept"))
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .and_then(|row| row.get("propValue"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn resolve_returns_cui_and_display_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rxcui.json"))
            .and(query_param("name", "Plavix"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "idGroup": {"rxnormId": ["32968"]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rxcui/32968/property.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "propConceptGroup": {"propConcept": [{"propValue": "clopidogrel"}]}
            })))
            .mount(&server)
            .await;

        let client = RxNormClient::new_for_test(server.uri()).unwrap();
        let concept = client.resolve("Plavix").await.unwrap().expect("concept");
        assert_eq!(concept.cui, "32968");
        assert_eq!(concept.uri, "https://identifiers.org/rxnorm:32968");
        assert_eq!(concept.name.as_deref(), Some("clopidogrel"));
    }

    #[tokio::test]
    async fn unknown_name_resolves_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rxcui.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"idGroup": {}})))
            .mount(&server)
            .await;

        let client = RxNormClient::new_for_test(server.uri()).unwrap();
        assert!(client.resolve("notadrug").await.unwrap().is_none());
    }
}
