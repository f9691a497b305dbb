use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::Read;

use flate2::read::GzDecoder;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tracing::warn;

use crate::error::PgxError;
use crate::extract;
use crate::sources::HttpContext;

const UNIPROT_BASE: &str = "https://rest.uniprot.org";
const UNIPROT_BASE_ENV: &str = "PGXKG_UNIPROT_BASE";
const VARIATION_BASE: &str = "https://www.ebi.ac.uk/proteins/api";
const VARIATION_BASE_ENV: &str = "PGXKG_EBI_VARIATION_BASE";
const UNIPROT_API: &str = "uniprot";
const VARIATION_API: &str = "ebi-variation";

const UNIPROT_SEARCH_RATE: f64 = 3.0;
const VARIATION_RATE: f64 = 10.0;

/// UniProt access: gene-symbol resolution over the TSV stream endpoint and
/// the EMBL-EBI Proteins variation API.
pub struct UniProtClient {
    http: HttpContext,
    base: Cow<'static, str>,
    variation_base: Cow<'static, str>,
}

#[derive(Debug, Clone)]
pub struct ResolvedProtein {
    pub accession: String,
    pub entry_name: Option<String>,
    pub organism: Option<String>,
}

impl UniProtClient {
    pub async fn new(http: &HttpContext) -> Result<Self, PgxError> {
        http.register_rate("rest.uniprot.org", UNIPROT_SEARCH_RATE).await;
        http.register_rate("www.ebi.ac.uk", VARIATION_RATE).await;
        Ok(Self {
            http: http.clone(),
            base: crate::sources::env_base(UNIPROT_BASE, UNIPROT_BASE_ENV),
            variation_base: crate::sources::env_base(VARIATION_BASE, VARIATION_BASE_ENV),
        })
    }

    #[cfg(test)]
    async fn new_for_test(base: String) -> Result<Self, PgxError> {
        let http = HttpContext::new()?;
        Ok(Self {
            http,
            base: Cow::Owned(base.clone()),
            variation_base: Cow::Owned(base),
        })
    }

    /// Resolves a human gene symbol to a reviewed UniProt accession.
    ///
    /// Restricted to `organism_id:9606 AND reviewed:true`; the first hit
    /// wins. The organism column is cross-checked and a mismatch is only
    /// warned about, as the taxonomy filter already constrains the query.
    pub async fn resolve_accession(
        &self,
        gene_symbol: &str,
        organism: &str,
    ) -> Result<ResolvedProtein, PgxError> {
        let gene_symbol = gene_symbol.trim();
        if gene_symbol.is_empty() {
            return Err(PgxError::InvalidArgument("Gene symbol is required".into()));
        }

        let organism_query = if organism.eq_ignore_ascii_case("human") {
            "organism_id:9606".to_string()
        } else {
            format!("organism_name:{organism}")
        };
        let query =
            format!("(gene_exact:{gene_symbol}) AND ({organism_query}) AND (reviewed:true)");

        let url = crate::sources::join_endpoint(&self.base, "uniprotkb/stream");
        self.http.acquire(&url).await?;
        let resp = self
            .http
            .client()
            .get(&url)
            .query(&[
                ("fields", "accession,reviewed,id,gene_names,organism_name"),
                ("format", "tsv"),
                ("query", query.as_str()),
            ])
            .send()
            .await?;
        let status = resp.status();
        let body = crate::sources::read_limited_body(resp, UNIPROT_API).await?;
        if !status.is_success() {
            return Err(crate::sources::status_error(UNIPROT_API, status, &body));
        }

        let text = String::from_utf8_lossy(&body);
        let mut lines = text.lines();
        let _header = lines.next();
        let Some(row) = lines.next().filter(|l| !l.trim().is_empty()) else {
            return Err(PgxError::NotFound {
                entity: "uniprot accession".into(),
                id: gene_symbol.to_string(),
            });
        };

        let columns: Vec<&str> = row.split('\t').collect();
        let accession = columns
            .first()
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| PgxError::Api {
                api: UNIPROT_API.to_string(),
                message: "Unexpected TSV response format".to_string(),
            })?;
        let entry_name = columns.get(2).map(|v| v.trim().to_string());
        let organism_name = columns.get(4).map(|v| v.trim().to_string());

        if organism.eq_ignore_ascii_case("human") {
            let is_human = organism_name
                .as_deref()
                .is_some_and(|name| name.to_ascii_lowercase().contains("homo sapiens"));
            if !is_human {
                warn!(
                    gene = gene_symbol,
                    organism = organism_name.as_deref().unwrap_or("unknown"),
                    "Expected a human protein entry"
                );
            }
        }

        Ok(ResolvedProtein {
            accession: accession.to_string(),
            entry_name: entry_name.filter(|v| !v.is_empty()),
            organism: organism_name.filter(|v| !v.is_empty()),
        })
    }

    /// Downloads the raw variation payload for a protein. The payload is
    /// kept as dynamic JSON: downstream phases re-emit it for provenance
    /// and read it through the `extract` fallback readers.
    pub async fn fetch_variation(&self, accession: &str) -> Result<Value, PgxError> {
        let accession = accession.trim();
        if accession.is_empty() {
            return Err(PgxError::InvalidArgument(
                "UniProt accession is required".into(),
            ));
        }

        let url =
            crate::sources::join_endpoint(&self.variation_base, &format!("variation/{accession}"));
        self.http.acquire(&url).await?;
        let resp = self
            .http
            .client()
            .get(&url)
            .header(ACCEPT, "application/json")
            .query(&[("format", "json")])
            .send()
            .await?;
        let status = resp.status();
        let body = crate::sources::read_limited_body(resp, VARIATION_API).await?;
        let payload = maybe_gunzip(body, VARIATION_API)?;
        if !status.is_success() {
            return Err(crate::sources::status_error(VARIATION_API, status, &payload));
        }
        crate::sources::decode_json(VARIATION_API, &payload)
    }
}

fn maybe_gunzip(payload: Vec<u8>, api: &str) -> Result<Vec<u8>, PgxError> {
    if !payload.starts_with(&[0x1f, 0x8b]) {
        return Ok(payload);
    }
    let mut decoder = GzDecoder::new(payload.as_slice());
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .map_err(|err| PgxError::Api {
            api: api.to_string(),
            message: format!("Failed to decode gzip response: {err}"),
        })?;
    Ok(decoded)
}

pub fn features(payload: &Value) -> Vec<Value> {
    payload
        .get("features")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Keeps only variants carrying `clinicalSignificances`, ranked so that
/// variants with population-frequency and evidence metadata come first.
pub fn filter_clinical_variants(payload: &Value) -> Vec<Value> {
    let mut scored: Vec<(i64, Value)> = features(payload)
        .into_iter()
        .filter(|feature| feature.get("clinicalSignificances").is_some())
        .map(|feature| (variant_score(&feature), feature))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().map(|(_, feature)| feature).collect()
}

/// Ranking: +100 for an embedded `populationFrequencies` block, +20 when
/// frequencies come from two or more sources, +50 for `evidences`, +30
/// when any evidence cites PubMed.
pub fn variant_score(feature: &Value) -> i64 {
    let mut score = 0;

    if let Some(freqs) = feature
        .get("populationFrequencies")
        .and_then(Value::as_array)
    {
        if !freqs.is_empty() {
            score += 100;
            let sources: std::collections::HashSet<&str> = freqs
                .iter()
                .filter(|row| row.get("frequency").is_some_and(|f| !f.is_null()))
                .filter_map(|row| row.get("source").and_then(Value::as_str))
                .collect();
            if sources.len() > 1 {
                score += 20;
            }
        }
    }

    if let Some(evidences) = feature.get("evidences").and_then(Value::as_array) {
        if !evidences.is_empty() {
            score += 50;
            let has_pubmed = evidences.iter().any(|e| {
                e.get("source")
                    .and_then(|s| s.get("name"))
                    .and_then(Value::as_str)
                    .is_some_and(|name| name.eq_ignore_ascii_case("pubmed"))
            });
            if has_pubmed {
                score += 30;
            }
        }
    }

    score
}

/// Groups variants by clinical-significance type. A variant carrying
/// several significance entries appears under each of them.
pub fn categorize_by_significance(variants: &[Value]) -> BTreeMap<String, Vec<Value>> {
    let mut categories: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for variant in variants {
        for significance in extract::clinical_significances(variant) {
            categories
                .entry(significance)
                .or_default()
                .push(variant.clone());
        }
    }
    categories
}

/// PubMed evidence per category, keyed by `ftId`.
pub fn extract_pubmed_evidence(
    categorized: &BTreeMap<String, Vec<Value>>,
) -> BTreeMap<String, BTreeMap<String, Vec<String>>> {
    let mut out: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
    for (category, variants) in categorized {
        let mut per_variant: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for variant in variants {
            let pmids = extract::evidence_pubmed_ids(variant);
            if pmids.is_empty() {
                continue;
            }
            let ft_id = variant
                .get("ftId")
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
                .to_string();
            per_variant.entry(ft_id).or_default().extend(pmids);
        }
        if !per_variant.is_empty() {
            out.insert(category.clone(), per_variant);
        }
    }
    out
}
