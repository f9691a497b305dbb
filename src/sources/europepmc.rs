use std::borrow::Cow;
use std::collections::HashSet;

use serde_json::Value;

use crate::entities::publication::Publication;
use crate::error::PgxError;
use crate::sources::HttpContext;

const EUROPEPMC_BASE: &str = "https://www.ebi.ac.uk/europepmc/webservices/rest";
const EUROPEPMC_BASE_ENV: &str = "PGXKG_EUROPEPMC_BASE";
const EUROPEPMC_API: &str = "europepmc";
const EUROPEPMC_RATE: f64 = 10.0;

pub struct EuropePmcClient {
    http: HttpContext,
    base: Cow<'static, str>,
}

impl EuropePmcClient {
    pub async fn new(http: &HttpContext) -> Result<Self, PgxError> {
        http.register_rate("www.ebi.ac.uk", EUROPEPMC_RATE).await;
        Ok(Self {
            http: http.clone(),
            base: crate::sources::env_base(EUROPEPMC_BASE, EUROPEPMC_BASE_ENV),
        })
    }

    #[cfg(test)]
    fn new_for_test(base: String) -> Result<Self, PgxError> {
        Ok(Self {
            http: HttpContext::new()?,
            base: Cow::Owned(base),
        })
    }

    async fn search_raw(&self, query: &str, page_size: usize) -> Result<Vec<Value>, PgxError> {
        let url = crate::sources::join_endpoint(&self.base, "search");
        self.http.acquire(&url).await?;
        let page_size = page_size.clamp(1, 100).to_string();
        let resp = self
            .http
            .client()
            .get(&url)
            .query(&[
                ("query", query),
                ("resultType", "core"),
                ("format", "json"),
                ("pageSize", page_size.as_str()),
                ("sort", "CITED desc"),
            ])
            .send()
            .await?;
        let status = resp.status();
        let body = crate::sources::read_limited_body(resp, EUROPEPMC_API).await?;
        if !status.is_success() {
            return Err(crate::sources::status_error(EUROPEPMC_API, status, &body));
        }
        let payload: Value = crate::sources::decode_json(EUROPEPMC_API, &body)?;
        Ok(payload
            .get("resultList")
            .and_then(|list| list.get("result"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Literature linking a gene with an optional drug and disease, in
    /// a pharmacogenomics context, most-cited first.
    pub async fn search_literature(
        &self,
        gene: &str,
        drug: Option<&str>,
        disease: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<Publication>, PgxError> {
        let mut parts: Vec<String> = vec![gene.to_string()];
        if let Some(drug) = drug {
            parts.push(drug.to_string());
        }
        if let Some(disease) = disease {
            parts.push(disease.to_string());
        }
        parts.push("(pharmacogenomics OR pharmacogenetics OR drug response)".to_string());

        let rows = self.search_raw(&build_query(&parts), max_results).await?;
        Ok(rows.iter().map(map_publication).collect())
    }

    /// Variant-specific search; identifiers get context terms matched to
    /// their kind (rsID, protein change, other).
    pub async fn search_variant_literature(
        &self,
        gene: &str,
        variant_ids: &[String],
        max_results: usize,
    ) -> Result<Vec<Publication>, PgxError> {
        let mut out: Vec<Publication> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for variant_id in variant_ids.iter().take(2) {
            let context = if variant_id.starts_with("rs") {
                "(polymorphism OR SNP OR variant OR allele)"
            } else if variant_id.starts_with("p.") {
                "(mutation OR substitution OR function OR activity)"
            } else {
                "(variant OR mutation OR polymorphism)"
            };
            let parts = vec![
                gene.to_string(),
                variant_id.clone(),
                context.to_string(),
            ];
            let rows = self.search_raw(&build_query(&parts), max_results).await?;
            for row in &rows {
                let publication = map_publication(row);
                if let Some(pmid) = publication.pmid.clone() {
                    if !seen.insert(pmid) {
                        continue;
                    }
                }
                out.push(publication);
            }
            if out.len() >= max_results {
                break;
            }
        }

        out.truncate(max_results);
        Ok(out)
    }

    /// Literature linking one variant to one drug.
    pub async fn search_variant_drug_literature(
        &self,
        gene: &str,
        variant_id: &str,
        drug: &str,
        max_results: usize,
    ) -> Result<Vec<Publication>, PgxError> {
        let context = if variant_id.starts_with("rs") {
            "(pharmacogenomics OR drug response OR metabolism OR efficacy OR toxicity)"
        } else {
            "(pharmacokinetics OR drug metabolism OR clinical outcome)"
        };
        let parts = vec![
            gene.to_string(),
            variant_id.to_string(),
            drug.to_string(),
            context.to_string(),
        ];
        let rows = self.search_raw(&build_query(&parts), max_results).await?;
        Ok(rows.iter().map(map_publication).collect())
    }

    /// Full publication details for one PMID. `Ok(None)` when Europe PMC
    /// does not know the id.
    pub async fn hydrate_pmid(&self, pmid: &str) -> Result<Option<Publication>, PgxError> {
        let pmid = pmid.trim();
        if pmid.is_empty() {
            return Err(PgxError::InvalidArgument("PMID is required".into()));
        }
        let rows = self.search_raw(&format!("EXT_ID:{pmid}"), 1).await?;
        Ok(rows.first().map(map_publication))
    }
}

/// Multi-word terms are quoted; boolean sub-expressions are passed
/// through untouched so the operators survive.
pub fn build_query(parts: &[String]) -> String {
    let formatted: Vec<String> = parts
        .iter()
        .map(|part| {
            if part.contains(" OR ") || part.contains(" AND ") || part.starts_with('(') {
                part.clone()
            } else if part.contains(' ') {
                format!("\"{part}\"")
            } else {
                part.clone()
            }
        })
        .collect();
    formatted.join(" AND ")
}

fn str_field(row: &Value, key: &str) -> Option<String> {
    row.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn flag_field(row: &Value, key: &str) -> bool {
    match row.get(key) {
        Some(Value::Bool(v)) => *v,
        Some(Value::String(v)) => matches!(v.trim(), "Y" | "y" | "true" | "TRUE"),
        _ => false,
    }
}

fn parse_authors(author_string: &str) -> Vec<String> {
    author_string
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .take(3)
        .map(str::to_string)
        .collect()
}

/// Full-text URL precedence: open-access PMC article on Europe PMC, then
/// PMC Central, then the MED article page when a full text is flagged,
/// otherwise no URL at all.
pub fn map_publication(row: &Value) -> Publication {
    let pmid = str_field(row, "pmid");
    let pmcid = str_field(row, "pmcid");
    let open_access = flag_field(row, "openAccess") || flag_field(row, "isOpenAccess");

    let mut full_text_url = None;
    let mut pdf_url = None;
    if let Some(pmcid) = pmcid.as_deref() {
        let clean = pmcid.strip_prefix("PMC").unwrap_or(pmcid);
        if open_access {
            full_text_url = Some(format!("https://europepmc.org/articles/PMC{clean}"));
            pdf_url = Some(format!("https://europepmc.org/articles/PMC{clean}/pdf"));
        } else {
            full_text_url = Some(format!(
                "https://www.ncbi.nlm.nih.gov/pmc/articles/PMC{clean}/"
            ));
            pdf_url = Some(format!(
                "https://www.ncbi.nlm.nih.gov/pmc/articles/PMC{clean}/pdf/"
            ));
        }
    } else if flag_field(row, "hasFullText") || flag_field(row, "fullTextOpenFlag") {
        if let Some(pmid) = pmid.as_deref() {
            full_text_url = Some(format!("https://europepmc.org/article/MED/{pmid}"));
        }
    }

    let abstract_text = str_field(row, "abstractText").map(|text| {
        if text.len() > 500 {
            let mut end = 500;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &text[..end])
        } else {
            text
        }
    });

    Publication {
        pmid,
        pmcid,
        doi: str_field(row, "doi"),
        title: str_field(row, "title").unwrap_or_default(),
        authors: str_field(row, "authorString")
            .map(|s| parse_authors(&s))
            .unwrap_or_default(),
        journal: str_field(row, "journalTitle"),
        year: str_field(row, "pubYear"),
        abstract_text,
        citation_count: row
            .get("citedByCount")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        full_text_url,
        pdf_url,
        open_access,
        source: None,
        evidence_code: None,
    }
}
