use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PgxError;
use crate::extract;
use crate::sources::HttpContext;

const CHEMBL_BASE: &str = "https://www.ebi.ac.uk/chembl/api/data";
const CHEMBL_BASE_ENV: &str = "PGXKG_CHEMBL_BASE";
const CHEMBL_API: &str = "chembl";
const CHEMBL_RATE: f64 = 15.0;

/// Targets that matter for pharmacogenomics; bioactivities against
/// anything else are dropped.
pub const PGX_TARGETS: &[&str] = &[
    "CYP2C19", "CYP2D6", "CYP3A4", "CYP2C9", "CYP1A2", "DPYD", "TPMT", "UGT1A1", "SLCO1B1",
    "ABCB1",
];

pub struct ChemblClient {
    http: HttpContext,
    base: Cow<'static, str>,
}

/// ChEMBL enrichment attached to a variant-affected drug.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChemblEnrichment {
    pub drug_name: String,
    pub chembl_id: String,
    pub compound_info: CompoundInfo,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pgx_bioactivities: Vec<Bioactivity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mechanism_of_action: Vec<Mechanism>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_interactions: Vec<TargetInteraction>,
}

/// Compound record with the ADMET properties used in reports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompoundInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pref_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub molecule_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_phase: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_approval: Option<i64>,
    #[serde(default)]
    pub withdrawn: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structure_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub molecular_weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alogp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hydrogen_bond_donors: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hydrogen_bond_acceptors: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polar_surface_area: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotatable_bonds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ro5_violations: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bioactivity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_chembl_id: Option<String>,
    pub target_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_gene_symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_organism: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assay_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bioactivity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assay_description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mechanism {
    pub mechanism_of_action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_chembl_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mechanism_comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetInteraction {
    pub target_chembl_id: String,
    pub target_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_organism: Option<String>,
}

impl ChemblClient {
    pub async fn new(http: &HttpContext) -> Result<Self, PgxError> {
        http.register_rate("www.ebi.ac.uk", CHEMBL_RATE).await;
        Ok(Self {
            http: http.clone(),
            base: crate::sources::env_base(CHEMBL_BASE, CHEMBL_BASE_ENV),
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
        let body = crate::sources::read_limited_body(resp, CHEMBL_API).await?;
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Value::Null);
        }
        if !status.is_success() {
            return Err(crate::sources::status_error(CHEMBL_API, status, &body));
        }
        crate::sources::decode_json(CHEMBL_API, &body)
    }

    /// Finds the single best molecule for a drug name: exact synonym
    /// match first, substring match as fallback, candidates ranked by
    /// [`molecule_score`].
    pub async fn search_molecule(&self, drug_name: &str) -> Result<Option<Value>, PgxError> {
        let drug_name = drug_name.trim();
        if drug_name.is_empty() {
            return Err(PgxError::InvalidArgument("Drug name is required".into()));
        }

        for key in [
            "molecule_synonyms__molecule_synonym__iexact",
            "molecule_synonyms__molecule_synonym__icontains",
        ] {
            let payload = self
                .get_json("molecule.json", &[(key, drug_name), ("limit", "5")])
                .await?;
            let Some(molecules) = payload.get("molecules").and_then(Value::as_array) else {
                continue;
            };
            if let Some(best) = pick_best_molecule(molecules) {
                return Ok(Some(best));
            }
        }
        Ok(None)
    }

    async fn bioactivities(&self, chembl_id: &str) -> Result<Vec<Value>, PgxError> {
        let payload = self
            .get_json(
                "activity.json",
                &[("molecule_chembl_id", chembl_id), ("limit", "50")],
            )
            .await?;
        Ok(payload
            .get("activities")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn mechanisms(&self, chembl_id: &str) -> Result<Vec<Mechanism>, PgxError> {
        let payload = self
            .get_json(
                "mechanism.json",
                &[("molecule_chembl_id", chembl_id), ("limit", "20")],
            )
            .await?;
        let rows = payload
            .get("mechanisms")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(rows
            .iter()
            .filter_map(|row| {
                let moa = row
                    .get("mechanism_of_action")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|v| !v.is_empty())?;
                Some(Mechanism {
                    mechanism_of_action: moa.to_string(),
                    target_chembl_id: str_field(row, "target_chembl_id"),
                    target_name: str_field(row, "target_pref_name"),
                    action_type: str_field(row, "action_type"),
                    mechanism_comment: str_field(row, "mechanism_comment"),
                })
            })
            .collect())
    }

    /// Full enrichment for one drug name. `Ok(None)` when ChEMBL has no
    /// matching molecule.
    pub async fn enrich_drug(&self, drug_name: &str) -> Result<Option<ChemblEnrichment>, PgxError> {
        let Some(molecule) = self.search_molecule(drug_name).await? else {
            return Ok(None);
        };
        let Some(chembl_id) = molecule
            .get("molecule_chembl_id")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return Ok(None);
        };

        let activities = self.bioactivities(&chembl_id).await?;
        let pgx_bioactivities: Vec<Bioactivity> = activities
            .iter()
            .filter_map(map_pgx_bioactivity)
            .collect();
        let target_interactions = distinct_targets(&activities, 10);
        let mechanism_of_action = self.mechanisms(&chembl_id).await?;

        Ok(Some(ChemblEnrichment {
            drug_name: drug_name.trim().to_string(),
            chembl_id,
            compound_info: compound_info(&molecule),
            pgx_bioactivities,
            mechanism_of_action,
            target_interactions,
        }))
    }
}

fn str_field(row: &Value, key: &str) -> Option<String> {
    row.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Empirical candidate ranking:
/// `phase_for_indication × 10 + overall_max_phase + 100 if approved − 50
/// if withdrawn`. Reproducibility depends on ChEMBL API stability.
pub fn molecule_score(molecule: &Value) -> f64 {
    let phase_for_indication =
        extract::number_any(molecule, &["max_phase_for_ind"]).unwrap_or(0.0);
    let overall_phase = extract::number_any(molecule, &["max_phase"]).unwrap_or(0.0);
    let mut score = phase_for_indication * 10.0 + overall_phase;
    let approved = molecule
        .get("first_approval")
        .is_some_and(|v| !v.is_null() && extract::number_any(molecule, &["first_approval"]).is_some());
    if approved {
        score += 100.0;
    }
    let withdrawn = molecule
        .get("withdrawn_flag")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if withdrawn {
        score -= 50.0;
    }
    score
}

fn pick_best_molecule(molecules: &[Value]) -> Option<Value> {
    // Ties go to the first candidate, i.e. ChEMBL response order.
    let mut best: Option<(f64, &Value)> = None;
    for molecule in molecules {
        let score = molecule_score(molecule);
        if best.is_none_or(|(top, _)| score > top) {
            best = Some((score, molecule));
        }
    }
    best.map(|(_, molecule)| molecule.clone())
}

pub fn compound_info(molecule: &Value) -> CompoundInfo {
    let props = molecule.get("molecule_properties").cloned().unwrap_or(Value::Null);
    CompoundInfo {
        pref_name: str_field(molecule, "pref_name"),
        molecule_type: str_field(molecule, "molecule_type"),
        max_phase: extract::number_any(molecule, &["max_phase"]),
        first_approval: extract::number_any(molecule, &["first_approval"]).map(|v| v as i64),
        withdrawn: molecule
            .get("withdrawn_flag")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        structure_type: str_field(molecule, "structure_type"),
        molecular_weight: extract::number_any(&props, &["mw_freebase", "full_mwt"]),
        alogp: extract::number_any(&props, &["alogp"]),
        hydrogen_bond_donors: extract::number_any(&props, &["hbd"]),
        hydrogen_bond_acceptors: extract::number_any(&props, &["hba"]),
        polar_surface_area: extract::number_any(&props, &["psa"]),
        rotatable_bonds: extract::number_any(&props, &["rtb"]),
        ro5_violations: extract::number_any(&props, &["num_ro5_violations"]),
    }
}

/// Gene symbol embedded in a target name, if it is one of the PGx targets.
pub fn pgx_target_symbol(target_name: &str) -> Option<&'static str> {
    let upper = target_name.to_ascii_uppercase();
    PGX_TARGETS.iter().find(|gene| upper.contains(**gene)).copied()
}

fn map_pgx_bioactivity(activity: &Value) -> Option<Bioactivity> {
    let target_name = str_field(activity, "target_pref_name")?;
    let gene_symbol = pgx_target_symbol(&target_name)?;
    Some(Bioactivity {
        target_chembl_id: str_field(activity, "target_chembl_id"),
        target_name,
        target_gene_symbol: Some(gene_symbol.to_string()),
        target_type: str_field(activity, "target_type"),
        target_organism: str_field(activity, "target_organism"),
        assay_type: str_field(activity, "assay_type"),
        bioactivity_type: str_field(activity, "standard_type"),
        value: extract::number_any(activity, &["standard_value"]),
        units: str_field(activity, "standard_units"),
        relation: str_field(activity, "standard_relation"),
        assay_description: str_field(activity, "assay_description").map(|d| {
            if d.len() > 200 {
                d.chars().take(200).collect()
            } else {
                d
            }
        }),
    })
}

fn distinct_targets(activities: &[Value], limit: usize) -> Vec<TargetInteraction> {
    let mut out: Vec<TargetInteraction> = Vec::new();
    for activity in activities {
        let Some(id) = str_field(activity, "target_chembl_id") else {
            continue;
        };
        if out.iter().any(|t| t.target_chembl_id == id) {
            continue;
        }
        out.push(TargetInteraction {
            target_chembl_id: id,
            target_name: str_field(activity, "target_pref_name").unwrap_or_default(),
            target_type: str_field(activity, "target_type"),
            target_organism: str_field(activity, "target_organism"),
        });
        if out.len() >= limit {
            break;
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
    fn molecule_score_applies_ranking_formula() {
        let approved = json!({"max_phase": "4", "max_phase_for_ind": "4", "first_approval": 1997});
        assert!((molecule_score(&approved) - 144.0).abs() < f64::EPSILON);

        let withdrawn = json!({"max_phase": 4, "withdrawn_flag": true});
        assert!((molecule_score(&withdrawn) - (-46.0)).abs() < f64::EPSILON);

        let experimental = json!({"max_phase": 1});
        assert!((molecule_score(&experimental) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn best_molecule_wins_by_score() {
        let molecules = vec![
            json!({"molecule_chembl_id": "CHEMBL2", "max_phase": 2}),
            json!({"molecule_chembl_id": "CHEMBL1", "max_phase": 4, "first_approval": 1997}),
        ];
        let best = pick_best_molecule(&molecules).unwrap();
        assert_eq!(best["molecule_chembl_id"], "CHEMBL1");
    }

    #[test]
    fn compound_info_reads_admet_properties_from_strings() {
        let molecule = json!({
            "pref_name": "CLOPIDOGREL",
            "molecule_type": "Small molecule",
            "max_phase": "4",
            "first_approval": 1997,
            "molecule_properties": {
                "mw_freebase": "321.82",
                "alogp": "3.64",
                "hbd": "0",
                "hba": "4",
                "psa": "57.0",
                "rtb": "4",
                "num_ro5_violations": "0"
            }
        });
        let info = compound_info(&molecule);
        assert_eq!(info.pref_name.as_deref(), Some("CLOPIDOGREL"));
        assert_eq!(info.molecular_weight, Some(321.82));
        assert_eq!(info.hydrogen_bond_donors, Some(0.0));
        assert_eq!(info.ro5_violations, Some(0.0));
        assert_eq!(info.first_approval, Some(1997));
    }

    #[test]
    fn only_pgx_targets_survive_bioactivity_mapping() {
        let rows = vec![
            json!({"target_pref_name": "Cytochrome P450 2C19 (CYP2C19)", "target_chembl_id": "CHEMBL3622", "standard_type": "IC50", "standard_value": "12.0", "standard_units": "uM"}),
            json!({"target_pref_name": "Beta-2 adrenergic receptor", "target_chembl_id": "CHEMBL210", "standard_type": "Ki"}),
        ];
        let mapped: Vec<Bioactivity> = rows.iter().filter_map(map_pgx_bioactivity).collect();
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0].target_gene_symbol.as_deref(), Some("CYP2C19"));
        assert_eq!(mapped[0].value, Some(12.0));
    }

    #[tokio::test]
    async fn enrich_drug_assembles_all_sections() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/molecule.json"))
            .and(query_param(
                "molecule_synonyms__molecule_synonym__iexact",
                "clopidogrel",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "molecules": [{
                    "molecule_chembl_id": "CHEMBL1771",
                    "pref_name": "CLOPIDOGREL",
                    "max_phase": 4,
                    "first_approval": 1997,
                    "molecule_properties": {"mw_freebase": "321.82"}
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/activity.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "activities": [{
                    "target_chembl_id": "CHEMBL3622",
                    "target_pref_name": "Cytochrome P450 2C19",
                    "standard_type": "IC50",
                    "standard_value": "50",
                    "standard_units": "uM"
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/mechanism.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "mechanisms": [{
                    "mechanism_of_action": "P2Y12 receptor antagonist",
                    "target_chembl_id": "CHEMBL2001",
                    "action_type": "ANTAGONIST"
                }]
            })))
            .mount(&server)
            .await;

        let client = ChemblClient::new_for_test(server.uri()).unwrap();
        let enrichment = client
            .enrich_drug("clopidogrel")
            .await
            .unwrap()
            .expect("enrichment");
        assert_eq!(enrichment.chembl_id, "CHEMBL1771");
        assert_eq!(enrichment.pgx_bioactivities.len(), 1);
        assert_eq!(enrichment.mechanism_of_action.len(), 1);
        assert_eq!(enrichment.target_interactions.len(), 1);
    }

    #[tokio::test]
    async fn unknown_drug_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/molecule.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"molecules": []})))
            .mount(&server)
            .await;

        let client = ChemblClient::new_for_test(server.uri()).unwrap();
        assert!(client.enrich_drug("notadrug").await.unwrap().is_none());
    }
}
