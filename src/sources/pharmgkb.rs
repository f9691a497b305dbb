use std::borrow::Cow;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PgxError;
use crate::sources::HttpContext;

const PHARMGKB_BASE: &str = "https://api.pharmgkb.org/v1";
const PHARMGKB_BASE_ENV: &str = "PGXKG_PHARMGKB_BASE";
const PHARMGKB_API: &str = "pharmgkb";

// Conservative: PharmGKB throttles aggressively.
const PHARMGKB_RATE: f64 = 1.5;

const PHENOTYPE_KEYWORDS: &[&str] = &[
    "metabolizer",
    "metaboliser",
    "function",
    "clearance",
    "response",
    "efficacy",
    "toxicity",
];

pub struct PharmGkbClient {
    http: HttpContext,
    base: Cow<'static, str>,
}

/// Normalised clinical annotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PharmGkbAnnotation {
    pub annotation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accession_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clinical_annotation_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_chemicals: Vec<PharmGkbChemical>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allele_phenotypes: Vec<AllelePhenotype>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_diseases: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PharmGkbChemical {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllelePhenotype {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allele: Option<String>,
    pub phenotype: String,
}

/// Drug recommendation distilled from an annotation's related chemicals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PharmGkbDrug {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pharmgkb_id: Option<String>,
    pub recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation_id: Option<String>,
}

impl PharmGkbClient {
    pub async fn new(http: &HttpContext) -> Result<Self, PgxError> {
        http.register_rate("api.pharmgkb.org", PHARMGKB_RATE).await;
        Ok(Self {
            http: http.clone(),
            base: crate::sources::env_base(PHARMGKB_BASE, PHARMGKB_BASE_ENV),
        })
    }

    #[cfg(test)]
    fn new_for_test(base: String) -> Result<Self, PgxError> {
        Ok(Self {
            http: HttpContext::new()?,
            base: Cow::Owned(base),
        })
    }

    async fn get_data_rows(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<Value>, PgxError> {
        let url = crate::sources::join_endpoint(&self.base, &format!("data/{endpoint}"));
        self.http.acquire(&url).await?;
        let resp = self.http.client().get(&url).query(params).send().await?;
        let status = resp.status();
        let content_type = resp.headers().get(reqwest::header::CONTENT_TYPE).cloned();
        let body = crate::sources::read_limited_body(resp, PHARMGKB_API).await?;

        // PharmGKB answers 404 for empty result sets.
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(crate::sources::status_error(PHARMGKB_API, status, &body));
        }
        crate::sources::ensure_json_content_type(PHARMGKB_API, content_type.as_ref(), &body)?;

        #[derive(Deserialize)]
        struct DataResponse {
            #[serde(default)]
            data: Vec<Value>,
        }
        let parsed: DataResponse = crate::sources::decode_json(PHARMGKB_API, &body)?;
        Ok(parsed.data)
    }

    /// Clinical annotations located on a gene.
    pub async fn gene_annotations(
        &self,
        gene_symbol: &str,
    ) -> Result<Vec<PharmGkbAnnotation>, PgxError> {
        let gene_symbol = normalize_gene_symbol(gene_symbol)?;
        let rows = self
            .get_data_rows(
                "clinicalAnnotation",
                &[("location.genes.symbol", gene_symbol.as_str()), ("view", "max")],
            )
            .await?;
        Ok(rows.iter().filter_map(map_annotation).collect())
    }

    /// Variant-level records for an rsID. These carry less metadata than
    /// gene annotations but can pin a drug to the exact variant.
    pub async fn variant_annotations(
        &self,
        rsid: &str,
    ) -> Result<Vec<PharmGkbAnnotation>, PgxError> {
        let rsid = rsid.trim();
        if rsid.is_empty() {
            return Err(PgxError::InvalidArgument("rsID is required".into()));
        }
        let rows = self
            .get_data_rows("variant", &[("name", rsid), ("view", "max")])
            .await?;
        Ok(rows.iter().filter_map(map_annotation).collect())
    }
}

fn normalize_gene_symbol(value: &str) -> Result<String, PgxError> {
    let normalized = value.trim().to_ascii_uppercase();
    if normalized.is_empty() {
        return Err(PgxError::InvalidArgument("Gene symbol is required".into()));
    }
    if !crate::sources::is_valid_gene_symbol(&normalized) {
        return Err(PgxError::InvalidArgument(format!(
            "Invalid gene symbol: {value}"
        )));
    }
    Ok(normalized)
}

fn string_value(value: &Value) -> Option<String> {
    match value {
        Value::String(v) => {
            let v = v.trim();
            (!v.is_empty()).then(|| v.to_string())
        }
        Value::Number(v) => Some(v.to_string()),
        _ => None,
    }
}

pub fn map_annotation(row: &Value) -> Option<PharmGkbAnnotation> {
    let obj = row.as_object()?;

    let annotation_id = obj.get("id").and_then(string_value)?;
    let accession_id = obj.get("accessionId").and_then(string_value);
    let name = obj.get("name").and_then(string_value);
    let evidence_level = obj
        .get("levelOfEvidence")
        .and_then(|level| level.get("term").and_then(string_value).or_else(|| string_value(level)));
    let score = obj.get("score").and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    });

    let clinical_annotation_types = obj
        .get("types")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|t| string_value(t).or_else(|| t.get("term").and_then(string_value)))
                .collect()
        })
        .unwrap_or_default();

    let related_chemicals = obj
        .get("relatedChemicals")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|chem| {
                    let name = chem.get("name").and_then(string_value)?;
                    Some(PharmGkbChemical {
                        id: chem.get("id").and_then(string_value),
                        name,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let allele_phenotypes = obj
        .get("allelePhenotypes")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    let phenotype = row.get("phenotype").and_then(string_value)?;
                    Some(AllelePhenotype {
                        allele: row.get("allele").and_then(string_value),
                        phenotype,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let related_diseases = obj
        .get("relatedDiseases")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| row.get("name").and_then(string_value))
                .collect()
        })
        .unwrap_or_default();

    let history = obj
        .get("history")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| row.get("description").and_then(string_value))
                .collect()
        })
        .unwrap_or_default();

    Some(PharmGkbAnnotation {
        annotation_id,
        accession_id,
        name,
        evidence_level,
        score,
        clinical_annotation_types,
        related_chemicals,
        allele_phenotypes,
        related_diseases,
        history,
    })
}

/// One drug entry per distinct chemical name across all annotations. The
/// first allele phenotype of the owning annotation doubles as the
/// recommendation text.
pub fn extract_drugs(annotations: &[PharmGkbAnnotation]) -> Vec<PharmGkbDrug> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    for annotation in annotations {
        let recommendation = annotation
            .allele_phenotypes
            .first()
            .map(|p| p.phenotype.clone())
            .unwrap_or_default();

        for chemical in &annotation.related_chemicals {
            if !seen.insert(chemical.name.clone()) {
                continue;
            }
            out.push(PharmGkbDrug {
                name: chemical.name.clone(),
                pharmgkb_id: chemical.id.clone(),
                recommendation: recommendation.clone(),
                evidence_level: annotation.evidence_level.clone(),
                annotation_id: Some(annotation.annotation_id.clone()),
            });
        }
    }

    out
}

/// Phenotype texts that describe metabolizer status or drug response.
/// Long descriptions are cut back to their first sentence.
pub fn extract_phenotypes(annotations: &[PharmGkbAnnotation]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    for annotation in annotations {
        for allele_phenotype in &annotation.allele_phenotypes {
            let text = allele_phenotype.phenotype.trim();
            if text.is_empty() {
                continue;
            }
            let lower = text.to_ascii_lowercase();
            if !PHENOTYPE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
                continue;
            }
            let text = if text.len() > 200 {
                match text.split_once(". ") {
                    Some((first, _)) => format!("{first}."),
                    None => text.to_string(),
                }
            } else {
                text.to_string()
            };
            if seen.insert(text.to_ascii_lowercase()) {
                out.push(text);
            }
        }
    }

    out
}
