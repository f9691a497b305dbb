use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PgxError;
use crate::sources::HttpContext;

const BIOPORTAL_BASE: &str = "https://data.bioontology.org";
const BIOPORTAL_BASE_ENV: &str = "PGXKG_BIOPORTAL_BASE";
const CLINICAL_TABLES_BASE: &str = "https://clinicaltables.nlm.nih.gov/api";
const CLINICAL_TABLES_BASE_ENV: &str = "PGXKG_CLINICAL_TABLES_BASE";
const BIOPORTAL_API: &str = "bioportal";
const CLINICAL_TABLES_API: &str = "clinical-tables";
const BIOPORTAL_RATE: f64 = 10.0;
const CLINICAL_TABLES_RATE: f64 = 10.0;

const SNOMED_URI_PREFIX: &str = "http://snomed.info/id/";

/// Labels whose presence marks a search hit as a plausible clinical
/// concept when no exact match exists.
const CONDITION_TOKENS: &[&str] = &["disease", "disorder", "finding", "syndrome", "condition"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnomedMatchType {
    Exact,
    PostCoordinated,
    ClinicalFinding,
    General,
}

/// A resolved SNOMED CT concept, possibly a post-coordinated expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnomedConcept {
    pub code: String,
    pub label: String,
    pub uri: String,
    pub match_type: SnomedMatchType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

impl SnomedConcept {
    fn simple(code: String, label: String, match_type: SnomedMatchType) -> Self {
        let uri = format!("{SNOMED_URI_PREFIX}{code}");
        Self {
            code,
            label,
            uri,
            match_type,
            expression: None,
        }
    }
}

/// SNOMED CT access through BioPortal, with the NLM Clinical Tables
/// search as the key-less fallback.
pub struct BioPortalClient {
    http: HttpContext,
    base: Cow<'static, str>,
    clinical_tables_base: Cow<'static, str>,
    api_key: Option<String>,
}

impl BioPortalClient {
    pub async fn new(http: &HttpContext, api_key: Option<String>) -> Result<Self, PgxError> {
        http.register_rate("data.bioontology.org", BIOPORTAL_RATE).await;
        http.register_rate("clinicaltables.nlm.nih.gov", CLINICAL_TABLES_RATE)
            .await;
        Ok(Self {
            http: http.clone(),
            base: crate::sources::env_base(BIOPORTAL_BASE, BIOPORTAL_BASE_ENV),
            clinical_tables_base: crate::sources::env_base(
                CLINICAL_TABLES_BASE,
                CLINICAL_TABLES_BASE_ENV,
            ),
            api_key,
        })
    }

    #[cfg(test)]
    fn new_for_test(base: String, api_key: Option<String>) -> Result<Self, PgxError> {
        Ok(Self {
            http: HttpContext::new()?,
            base: Cow::Owned(base.clone()),
            clinical_tables_base: Cow::Owned(base),
            api_key,
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    async fn get_json(&self, url: &str, params: &[(&str, &str)]) -> Result<Value, PgxError> {
        self.http.acquire(url).await?;
        let mut request = self.http.client().get(url).query(params);
        if let Some(key) = self.api_key.as_deref() {
            request = request.header("Authorization", format!("apikey token={key}"));
        }
        let resp = request.send().await?;
        let status = resp.status();
        let api = if url.contains("clinicaltables") {
            CLINICAL_TABLES_API
        } else {
            BIOPORTAL_API
        };
        let body = crate::sources::read_limited_body(resp, api).await?;
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Value::Null);
        }
        if !status.is_success() {
            return Err(crate::sources::status_error(api, status, &body));
        }
        crate::sources::decode_json(api, &body)
    }

    /// Searches SNOMED CT for a term. With a BioPortal key this prefers
    /// an exact preferred-label match, then the first hit whose label
    /// carries a condition token, then the first hit. Without a key the
    /// Clinical Tables endpoint answers instead.
    pub async fn search_snomed(&self, term: &str) -> Result<Option<SnomedConcept>, PgxError> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(None);
        }
        if self.api_key.is_some() {
            self.search_bioportal(term).await
        } else {
            self.search_clinical_tables(term).await
        }
    }

    async fn search_bioportal(&self, term: &str) -> Result<Option<SnomedConcept>, PgxError> {
        let url = crate::sources::join_endpoint(&self.base, "search");
        let payload = self
            .get_json(
                &url,
                &[
                    ("q", term),
                    ("ontologies", "SNOMEDCT"),
                    ("require_exact_match", "false"),
                    ("pagesize", "10"),
                ],
            )
            .await?;
        let Some(results) = payload.get("collection").and_then(Value::as_array) else {
            return Ok(None);
        };
        Ok(pick_bioportal_result(results, term))
    }

    async fn search_clinical_tables(&self, term: &str) -> Result<Option<SnomedConcept>, PgxError> {
        let url = crate::sources::join_endpoint(&self.clinical_tables_base, "snomed_ct/v3/search");
        let payload = self
            .get_json(&url, &[("terms", term), ("df", "code,term"), ("maxList", "5")])
            .await?;
        // Response shape: [total, [codes...], null, [[code, term], ...]]
        let rows = payload.get(3).and_then(Value::as_array);
        let first = rows.and_then(|r| r.first()).and_then(Value::as_array);
        let Some(columns) = first else {
            return Ok(None);
        };
        let code = columns.first().and_then(Value::as_str).unwrap_or("").trim();
        if code.is_empty() {
            return Ok(None);
        }
        let label = columns
            .get(1)
            .and_then(Value::as_str)
            .unwrap_or(term)
            .trim()
            .to_string();
        let match_type = if label.eq_ignore_ascii_case(term) {
            SnomedMatchType::Exact
        } else {
            SnomedMatchType::General
        };
        Ok(Some(SnomedConcept::simple(code.to_string(), label, match_type)))
    }

    /// Multi-strategy substance lookup for drug names.
    pub async fn search_drug_snomed(&self, name: &str) -> Result<Option<SnomedConcept>, PgxError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        if let Some(hit) = self.search_snomed(&format!("{name} (substance)")).await? {
            return Ok(Some(hit));
        }
        if let Some(hit) = self.search_snomed(name).await? {
            return Ok(Some(hit));
        }
        let synonym = name.to_lowercase().replace('-', " ");
        if synonym != name.to_lowercase() {
            if let Some(hit) = self.search_snomed(&synonym).await? {
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }

    async fn concept_label(&self, code: &str) -> Result<Option<String>, PgxError> {
        if self.api_key.is_none() {
            return Ok(None);
        }
        let encoded = format!("http%3A%2F%2Fsnomed.info%2Fid%2F{code}");
        let url = crate::sources::join_endpoint(
            &self.base,
            &format!("ontologies/SNOMEDCT/classes/{encoded}"),
        );
        let payload = self.get_json(&url, &[]).await?;
        Ok(payload
            .get("prefLabel")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Maps a pharmacogenomic phenotype to a SNOMED CT clinical finding.
    ///
    /// Only post-coordinated expressions are returned; a failed
    /// post-coordination yields `None` rather than a low-quality search
    /// hit.
    pub async fn map_phenotype(
        &self,
        phenotype_text: &str,
        gene_symbol: Option<&str>,
        drug_name: Option<&str>,
    ) -> Result<Option<SnomedConcept>, PgxError> {
        let Some((_, finding_code, finding_label)) =
            detect_finding_concept(phenotype_text, drug_name.is_some())
        else {
            return Ok(None);
        };
        if drug_name.is_none() && gene_symbol.is_none() {
            return Ok(None);
        }

        let mut attributes: Vec<String> = Vec::new();

        if let Some(drug) = drug_name {
            if let Some(concept) = self.search_snomed(drug).await? {
                let label = self
                    .concept_label(&concept.code)
                    .await?
                    .unwrap_or(concept.label.clone());
                let lower = label.to_ascii_lowercase();
                if lower.contains("substance")
                    || lower.contains("product")
                    || lower.contains("medication")
                {
                    attributes.push(format!(
                        "246075003 | Causative agent (attribute) = {} | {} (substance)",
                        concept.code, label
                    ));
                }
            }
        }

        if let Some(gene) = gene_symbol {
            let query = genotype_query(phenotype_text, gene);
            if let Some(concept) = self.search_snomed(&query).await? {
                attributes.push(format!(
                    "47429007 | Associated with (attribute) = {} | {} (finding)",
                    concept.code, concept.label
                ));
            }
        }

        if attributes.is_empty() {
            return Ok(None);
        }

        let expression = format!("{finding_code} : {{ {} }}", attributes.join(", "));
        Ok(Some(SnomedConcept {
            code: finding_code.to_string(),
            label: finding_label.to_string(),
            uri: format!("{SNOMED_URI_PREFIX}{finding_code}"),
            match_type: SnomedMatchType::PostCoordinated,
            expression: Some(expression),
        }))
    }
}

fn pick_bioportal_result(results: &[Value], term: &str) -> Option<SnomedConcept> {
    let concept_of = |row: &Value, match_type: SnomedMatchType| -> Option<SnomedConcept> {
        let uri = row.get("@id").and_then(Value::as_str)?;
        let code = uri.rsplit('/').next()?.trim();
        if code.is_empty() {
            return None;
        }
        let label = row
            .get("prefLabel")
            .and_then(Value::as_str)
            .unwrap_or(term)
            .trim()
            .to_string();
        Some(SnomedConcept::simple(code.to_string(), label, match_type))
    };

    // Exact preferred-label match wins.
    if let Some(row) = results.iter().find(|row| {
        row.get("prefLabel")
            .and_then(Value::as_str)
            .is_some_and(|label| {
                let label = label.trim();
                let stripped = label
                    .split(" (")
                    .next()
                    .unwrap_or(label);
                label.eq_ignore_ascii_case(term) || stripped.eq_ignore_ascii_case(term)
            })
    }) {
        return concept_of(row, SnomedMatchType::Exact);
    }

    // Then a label that looks like a clinical concept.
    if let Some(row) = results.iter().find(|row| {
        row.get("prefLabel")
            .and_then(Value::as_str)
            .is_some_and(|label| {
                let lower = label.to_ascii_lowercase();
                CONDITION_TOKENS.iter().any(|token| lower.contains(token))
            })
    }) {
        return concept_of(row, SnomedMatchType::ClinicalFinding);
    }

    results
        .first()
        .and_then(|row| concept_of(row, SnomedMatchType::General))
}

/// Detects the focus concept for a post-coordinated expression from
/// phenotype prose. Returns `(kind, concept_code, label)`.
pub fn detect_finding_concept(
    phenotype_text: &str,
    has_drug_context: bool,
) -> Option<(&'static str, &'static str, &'static str)> {
    let lower = phenotype_text.to_ascii_lowercase();
    let contains_any = |terms: &[&str]| terms.iter().any(|t| lower.contains(t));

    if contains_any(&[
        "ineffective",
        "reduced efficacy",
        "decreased response",
        "poor response",
        "no significant association",
    ]) && (lower.contains("drug") || has_drug_context)
    {
        return Some((
            "ineffective_therapy",
            "406164007",
            "Ineffective drug therapy",
        ));
    }
    if contains_any(&[
        "increased concentration",
        "elevated concentration",
        "higher concentration",
        "increased levels",
    ]) {
        return Some((
            "increased_concentration",
            "404919007",
            "Increased drug concentration",
        ));
    }
    if contains_any(&[
        "decreased concentration",
        "reduced concentration",
        "lower concentration",
        "reduced levels",
    ]) {
        return Some((
            "decreased_concentration",
            "404920001",
            "Decreased drug concentration",
        ));
    }
    if contains_any(&[
        "decreased clearance",
        "reduced clearance",
        "decreased metabolism",
        "reduced metabolism",
        "increased clearance",
        "increased metabolism",
    ]) {
        return Some(("altered_clearance", "733423003", "Altered drug clearance"));
    }
    if contains_any(&["decreased risk", "increased risk", "risk of"]) {
        return Some(("risk_level", "365858006", "Finding of risk level"));
    }
    if contains_any(&["adverse reaction", "toxicity", "side effect", "harmful"]) {
        return Some(("adverse_reaction", "281647001", "Adverse reaction"));
    }
    if contains_any(&["enzyme activity"]) {
        return Some(("enzyme_activity", "713330009", "Enzyme activity finding"));
    }
    None
}

fn genotype_query(phenotype_text: &str, gene: &str) -> String {
    let lower = phenotype_text.to_ascii_lowercase();
    if lower.contains("poor metabolizer") || lower.contains("no function") || lower.contains("impaired")
    {
        format!("{gene} poor metabolizer genotype")
    } else if lower.contains("intermediate metabolizer") {
        format!("{gene} intermediate metabolizer genotype")
    } else if lower.contains("ultra rapid metabolizer")
        || lower.contains("ultrarapid metabolizer")
        || lower.contains("extensive metabolizer")
        || lower.contains("rapid metabolizer")
    {
        format!("{gene} extensive metabolizer genotype")
    } else {
        format!("{gene} genotype")
    }
}

static PGX_DISEASE_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn pgx_disease_patterns() -> &'static [Regex] {
    PGX_DISEASE_PATTERNS.get_or_init(|| {
        [
            r"(?i)\b(cardiovascular disease|heart disease|cardiac disease|acute coronary syndrome)\b",
            r"(?i)\b(myocardial infarction|heart attack)\b",
            r"(?i)\b(atrial fibrillation|arrhythmia)\b",
            r"(?i)\b(hypertension|high blood pressure)\b",
            r"(?i)\b(stroke|cerebrovascular disease)\b",
            r"(?i)\b(thrombosis|blood clot|bleeding events?)\b",
            r"(?i)\b(breast cancer|lung cancer|colon cancer|prostate cancer)\b",
            r"(?i)\b(cancer|carcinoma|tumor|malignancy|neoplasm)\b",
            r"(?i)\b(epilepsy|seizure disorder)\b",
            r"(?i)\b(depression|major depression|depressive disorder)\b",
            r"(?i)\b(anxiety|anxiety disorder|panic disorder)\b",
            r"(?i)\b(schizophrenia|psychosis|bipolar disorder)\b",
            r"(?i)\b(alzheimer'?s disease|dementia)\b",
            r"(?i)\b(parkinson'?s disease)\b",
            r"(?i)\b(diabetes mellitus|diabetes)\b",
            r"(?i)\b(metabolic syndrome)\b",
            r"(?i)\b(hyperlipidemia|high cholesterol)\b",
            r"(?i)\b(HIV|human immunodeficiency virus)\b",
            r"(?i)\b(hepatitis [ABC])\b",
            r"(?i)\b(tuberculosis)\b",
            r"(?i)\b(malaria)\b",
            r"(?i)\b(rheumatoid arthritis|arthritis)\b",
            r"(?i)\b(inflammatory bowel disease|crohn'?s disease|ulcerative colitis)\b",
            r"(?i)\b(lupus|systemic lupus erythematosus)\b",
            r"(?i)\b(liver disease|hepatic disease|cirrhosis)\b",
            r"(?i)\b(kidney disease|renal disease|chronic kidney disease)\b",
            r"(?i)\b(lung disease|pulmonary disease|asthma|COPD)\b",
            r"(?i)\b(alcoholism|alcohol use disorder|substance abuse)\b",
            r"(?i)\b(opioid addiction|drug addiction)\b",
            r"(?i)\bpatients with ([^,]+?(?:disease|disorder|syndrome|condition|cancer))\b",
            r"(?i)\bwho have ([^,]+?(?:disease|disorder|syndrome|cancer))\b",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("disease pattern"))
        .collect()
    })
}

/// Disease names mined from PharmGKB phenotype prose with the
/// pharmacogenomics-aware pattern library. Top five distinct hits.
pub fn extract_pharmgkb_diseases(phenotype_text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for pattern in pgx_disease_patterns() {
        for captures in pattern.captures_iter(phenotype_text) {
            let matched = captures
                .get(1)
                .map(|m| m.as_str())
                .unwrap_or_else(|| captures.get(0).map(|m| m.as_str()).unwrap_or(""));
            let cleaned = matched.trim().to_string();
            if cleaned.len() <= 3 {
                continue;
            }
            if seen.insert(cleaned.to_lowercase()) {
                out.push(cleaned);
            }
            if out.len() >= 5 {
                return out;
            }
        }
    }
    out
}

static GENERAL_DISEASE_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

/// General fallback extraction for free-text phenotypes. Top three hits.
pub fn extract_disease_entities(text: &str) -> Vec<String> {
    let patterns = GENERAL_DISEASE_PATTERNS.get_or_init(|| {
        [
            r"(?i)\b(cardiovascular disease|heart disease|cardiac disease)\b",
            r"(?i)\b(diabetes mellitus|diabetes)\b",
            r"(?i)\b(hypertension|high blood pressure)\b",
            r"(?i)\b(depression|major depression)\b",
            r"(?i)\b(anxiety disorder|anxiety)\b",
            r"(?i)\b(schizophrenia|psychosis)\b",
            r"(?i)\b(epilepsy|seizure disorder)\b",
            r"(?i)\b(cancer|carcinoma|tumor|malignancy)\b",
            r"(?i)\b(thrombosis|blood clot)\b",
            r"(?i)\b(bleeding|hemorrhage)\b",
            r"(?i)\b(liver disease|hepatic disease)\b",
            r"(?i)\b(kidney disease|renal disease)\b",
            r"(?i)\b(\w+ syndrome)\b",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("disease pattern"))
        .collect::<Vec<_>>()
    });

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for pattern in patterns {
        for found in pattern.find_iter(text) {
            let cleaned = found.as_str().trim().to_string();
            if cleaned.len() <= 3 {
                continue;
            }
            if seen.insert(cleaned.to_lowercase()) {
                out.push(cleaned);
            }
            if out.len() >= 3 {
                return out;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn finding_detection_prefers_ineffective_therapy_with_drug_context() {
        let (kind, code, _) =
            detect_finding_concept("Reduced efficacy of therapy", true).unwrap();
        assert_eq!(kind, "ineffective_therapy");
        assert_eq!(code, "406164007");

        // Same text without any drug context falls through to nothing.
        assert!(detect_finding_concept("Reduced efficacy", false).is_none());
    }

    #[test]
    fn finding_detection_covers_concentration_clearance_and_risk() {
        assert_eq!(
            detect_finding_concept("increased concentration of the active metabolite", false)
                .unwrap()
                .1,
            "404919007"
        );
        assert_eq!(
            detect_finding_concept("markedly decreased clearance", false)
                .unwrap()
                .1,
            "733423003"
        );
        assert_eq!(
            detect_finding_concept("increased risk of bleeding", false)
                .unwrap()
                .1,
            "365858006"
        );
        assert_eq!(
            detect_finding_concept("severe toxicity reported", false)
                .unwrap()
                .1,
            "281647001"
        );
    }

    #[test]
    fn genotype_query_tracks_metabolizer_status() {
        assert_eq!(
            genotype_query("poor metabolizer phenotype", "CYP2C19"),
            "CYP2C19 poor metabolizer genotype"
        );
        assert_eq!(
            genotype_query("ultrarapid metabolizer", "CYP2C19"),
            "CYP2C19 extensive metabolizer genotype"
        );
        assert_eq!(genotype_query("unrelated", "CYP2D6"), "CYP2D6 genotype");
    }

    #[test]
    fn pharmgkb_disease_extraction_finds_and_dedupes() {
        let text = "Patients with acute coronary syndrome treated with clopidogrel may have \
                    increased risk of myocardial infarction; acute coronary syndrome recurs.";
        let diseases = extract_pharmgkb_diseases(text);
        assert!(diseases.iter().any(|d| d.eq_ignore_ascii_case("acute coronary syndrome")));
        assert!(diseases.iter().any(|d| d.eq_ignore_ascii_case("myocardial infarction")));
        let lowered: Vec<String> = diseases.iter().map(|d| d.to_lowercase()).collect();
        let mut deduped = lowered.clone();
        deduped.dedup();
        assert_eq!(lowered.len(), deduped.len());
    }

    #[test]
    fn bioportal_result_ranking() {
        let results = vec![
            json!({"@id": "http://snomed.info/id/1", "prefLabel": "Something unrelated"}),
            json!({"@id": "http://snomed.info/id/2", "prefLabel": "Diabetes mellitus (disorder)"}),
        ];
        let hit = pick_bioportal_result(&results, "diabetes mellitus").unwrap();
        assert_eq!(hit.code, "2");
        assert_eq!(hit.match_type, SnomedMatchType::Exact);

        let hit = pick_bioportal_result(&results, "no such").unwrap();
        assert_eq!(hit.code, "2");
        assert_eq!(hit.match_type, SnomedMatchType::ClinicalFinding);
    }

    #[tokio::test]
    async fn clinical_tables_fallback_parses_array_shape() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/snomed_ct/v3/search"))
            .and(query_param("terms", "clopidogrel"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                1,
                ["387253001"],
                null,
                [["387253001", "Clopidogrel (substance)"]]
            ])))
            .mount(&server)
            .await;

        let client = BioPortalClient::new_for_test(server.uri(), None).unwrap();
        let concept = client
            .search_snomed("clopidogrel")
            .await
            .unwrap()
            .expect("concept");
        assert_eq!(concept.code, "387253001");
        assert_eq!(concept.uri, "http://snomed.info/id/387253001");
    }

    #[tokio::test]
    async fn bioportal_search_sends_key_and_parses_collection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("ontologies", "SNOMEDCT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "collection": [
                    {"@id": "http://snomed.info/id/387253001", "prefLabel": "Clopidogrel (substance)"}
                ]
            })))
            .mount(&server)
            .await;

        let client =
            BioPortalClient::new_for_test(server.uri(), Some("key123".into())).unwrap();
        let concept = client
            .search_snomed("clopidogrel")
            .await
            .unwrap()
            .expect("concept");
        assert_eq!(concept.code, "387253001");
        assert_eq!(concept.match_type, SnomedMatchType::Exact);
    }

    #[tokio::test]
    async fn phenotype_mapping_builds_post_coordinated_expression() {
        let server = MockServer::start().await;
        // Substance search for the drug.
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "clopidogrel"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "collection": [{"@id": "http://snomed.info/id/412352002", "prefLabel": "Clopidogrel (substance)"}]
            })))
            .mount(&server)
            .await;
        // Genotype finding for the gene.
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "CYP2C19 poor metabolizer genotype"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "collection": [{"@id": "http://snomed.info/id/782299006", "prefLabel": "Cytochrome P450 2C19 poor metabolizer genotype (finding)"}]
            })))
            .mount(&server)
            .await;
        // Concept-label lookup confirms the substance.
        Mock::given(method("GET"))
            .and(path(
                "/ontologies/SNOMEDCT/classes/http%3A%2F%2Fsnomed.info%2Fid%2F412352002",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "prefLabel": "Clopidogrel (substance)"
            })))
            .mount(&server)
            .await;

        let client = BioPortalClient::new_for_test(server.uri(), Some("k".into())).unwrap();
        let concept = client
            .map_phenotype(
                "Poor metabolizer status; ineffective drug therapy expected",
                Some("CYP2C19"),
                Some("clopidogrel"),
            )
            .await
            .unwrap()
            .expect("post-coordinated concept");

        assert_eq!(concept.code, "406164007");
        assert_eq!(concept.match_type, SnomedMatchType::PostCoordinated);
        let expression = concept.expression.unwrap();
        assert!(expression.starts_with("406164007 : {"));
        assert!(expression.contains("246075003 | Causative agent (attribute) = 412352002"));
        assert!(expression.contains("47429007 | Associated with (attribute) = 782299006"));
    }

    #[tokio::test]
    async fn phenotype_mapping_without_context_is_none() {
        let client = BioPortalClient::new_for_test("http://unused".into(), Some("k".into()))
            .unwrap();
        let out = client
            .map_phenotype("ineffective drug therapy", None, None)
            .await
            .unwrap();
        assert!(out.is_none());
    }
}
