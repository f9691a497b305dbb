//! Profile normaliser and assembler (C8).
//!
//! `normalize_dashboard_profile` turns an externally entered profile into
//! the canonical JSON-LD envelope; `Assembler` attaches the enriched
//! variants, linking results, population context and summaries after
//! fan-in, and writes the comprehensive outputs.

use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::entities::link::LinkingResult;
use crate::entities::patient::{ClinicalInformation, primary_ethnicity};
use crate::entities::profile::{ClinicalSummary, LiteratureSummary, PharmacogenomicsProfile};
use crate::entities::variant::{PopulationSignificance, Variant, is_canonical_rsid};
use crate::error::PgxError;
use crate::extract;
use crate::phases::{timestamp_now, write_json};
use crate::resolve::IdResolver;

pub const DATA_SOURCE: &str =
    "EMBL-EBI Proteins API + UniProt + ClinVar + PharmGKB + OpenFDA + Europe PMC";

/// Fixed `@context` of the canonical patient document, including the
/// project term aliases for the population-context properties.
pub fn canonical_context() -> Value {
    json!({
        "foaf": "http://xmlns.com/foaf/0.1/",
        "schema": "http://schema.org/",
        "pgx": "http://pgx-kg.org/",
        "sdisco": "http://ugent.be/sdisco/",
        "snomed": "http://snomed.info/id/",
        "drugbank": "https://go.drugbank.com/drugs/",
        "ugent": "http://ugent.be/person/",
        "dbsnp": "https://identifiers.org/dbsnp/",
        "ncbigene": "https://identifiers.org/ncbigene/",
        "clinpgx": "https://www.clinpgx.org/haplotype/",
        "gn": "http://www.geonames.org/ontology#",
        "skos": "http://www.w3.org/2004/02/skos/core#",
        "xsd": "http://www.w3.org/2001/XMLSchema#",
        "population_frequencies": "pgx:populationFrequencies",
        "patient_population_frequency": "pgx:patientPopulationFrequency",
        "population_significance": "pgx:populationSignificance",
        "ethnicity_context": "pgx:ethnicityContext",
        "ethnicity_medication_adjustments": "pgx:ethnicityMedicationAdjustments",
        "ethnicity_snomed": "pgx:ethnicitySnomed"
    })
}

fn str_at<'a>(value: &'a Value, pointer: &[&str]) -> Option<&'a str> {
    let mut current = value;
    for key in pointer {
        current = current.get(key)?;
    }
    current.as_str().map(str::trim).filter(|v| !v.is_empty())
}

/// Stable id for a profile: the MRN when present, an explicit identifier
/// otherwise, and finally a deterministic `AUTO_` id derived from the
/// profile content — same input, same id.
pub fn stable_profile_id(profile: &Value) -> String {
    for candidate in [
        str_at(profile, &["demographics", "mrn"]),
        str_at(profile, &["clinical_information", "demographics", "mrn"]),
        str_at(profile, &["mrn"]),
        str_at(profile, &["identifier"]),
        str_at(profile, &["patient_id"]),
    ]
    .into_iter()
    .flatten()
    {
        return candidate.to_string();
    }

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    profile.to_string().hash(&mut hasher);
    format!("AUTO_{:08x}", (hasher.finish() & 0xffff_ffff) as u32)
}

fn quantitative_value(value: f64, unit_code: &str, unit_text: &str) -> Value {
    json!({
        "@type": "schema:QuantitativeValue",
        "schema:value": value,
        "schema:unitCode": unit_code,
        "schema:unitText": unit_text
    })
}

fn numeric_or_quantitative(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::Object(map) => map.get("schema:value").and_then(Value::as_f64),
        _ => None,
    }
}

/// Canonicalises a dashboard-entered or legacy profile into the JSON-LD
/// envelope the pipeline emits. Idempotent on everything but
/// `dateCreated`.
pub fn normalize_dashboard_profile(profile: &Value) -> Value {
    let patient_id = stable_profile_id(profile);
    let source_ci = profile.get("clinical_information").cloned().unwrap_or(json!({}));

    let mut clinical_information = Map::new();

    // Shallow demographics → foaf/schema properties.
    let demographics_in = profile
        .get("demographics")
        .or_else(|| source_ci.get("demographics"))
        .cloned()
        .unwrap_or(Value::Null);
    if demographics_in.is_object() {
        let first = str_at(&demographics_in, &["first_name"])
            .or_else(|| str_at(&demographics_in, &["givenName"]))
            .or_else(|| str_at(&demographics_in, &["schema:givenName"]))
            .or_else(|| str_at(&demographics_in, &["foaf:firstName"]))
            .unwrap_or("");
        let last = str_at(&demographics_in, &["last_name"])
            .or_else(|| str_at(&demographics_in, &["familyName"]))
            .or_else(|| str_at(&demographics_in, &["schema:familyName"]))
            .or_else(|| str_at(&demographics_in, &["foaf:familyName"]))
            .unwrap_or("");

        let mut demographics = Map::new();
        demographics.insert("@id".into(), json!("http://ugent.be/person/demographics"));
        demographics.insert("foaf:firstName".into(), json!(first));
        demographics.insert("foaf:familyName".into(), json!(last));
        demographics.insert("schema:givenName".into(), json!(first));
        demographics.insert("schema:familyName".into(), json!(last));

        if let Some(birth_date) = str_at(&demographics_in, &["birthDate"])
            .or_else(|| str_at(&demographics_in, &["schema:birthDate"]))
        {
            demographics.insert("schema:birthDate".into(), json!(birth_date));
        }
        if let Some(gender) = str_at(&demographics_in, &["gender"])
            .or_else(|| str_at(&demographics_in, &["schema:gender"]))
        {
            demographics.insert("schema:gender".into(), json!(gender));
        }
        if let Some(weight) = numeric_or_quantitative(
            demographics_in
                .get("weight")
                .or_else(|| demographics_in.get("schema:weight")),
        ) {
            demographics.insert(
                "schema:weight".into(),
                quantitative_value(weight, "kg", "kilograms"),
            );
        }
        if let Some(height) = numeric_or_quantitative(
            demographics_in
                .get("height")
                .or_else(|| demographics_in.get("schema:height")),
        ) {
            demographics.insert(
                "schema:height".into(),
                quantitative_value(height, "cm", "centimeters"),
            );
        }
        if let Some(age) = demographics_in.get("age").and_then(Value::as_f64) {
            demographics.insert("age".into(), json!(age as i64));
        }
        if let Some(mrn) = str_at(&demographics_in, &["mrn"]) {
            demographics.insert("mrn".into(), json!(mrn));
        }
        if let Some(ethnicity) = demographics_in.get("ethnicity") {
            demographics.insert("ethnicity".into(), ethnicity.clone());
        }
        clinical_information.insert("demographics".into(), Value::Object(demographics));
    }

    // Carry the clinical subtrees verbatim, from either location.
    for key in [
        "current_conditions",
        "current_medications",
        "organ_function",
        "lifestyle_factors",
        "manual_enrichment",
    ] {
        if let Some(subtree) = profile.get(key).or_else(|| source_ci.get(key)) {
            clinical_information.insert(key.to_string(), subtree.clone());
        }
    }

    json!({
        "@context": canonical_context(),
        "@id": format!("http://ugent.be/person/{patient_id}"),
        "@type": ["foaf:Person", "schema:Person", "schema:Patient"],
        "identifier": patient_id,
        "patient_id": patient_id,
        "name": "Comprehensive Pharmacogenomics Patient Profile",
        "description": "Dashboard-provided clinical profile (normalized to canonical schema)",
        "dateCreated": timestamp_now(),
        "clinical_information": Value::Object(clinical_information),
        "pharmacogenomics_profile": {
            "genes_analyzed": [],
            "total_variants": 0,
            "variants_by_gene": {},
            "affected_drugs": [],
            "associated_diseases": [],
            "clinical_summary": {},
            "literature_summary": {}
        },
        "variants": [],
        "dashboard_source": true,
        "dataSource": "Dashboard → PGx pipeline"
    })
}

/// Final rsID pass: accept a canonical `rs<digits>` id, otherwise recover
/// one from an allele-matching xref or a nested ClinVar block in the raw
/// payload. Never invents an rsID; unrecoverable ids are cleared.
pub fn assign_exact_rsid(variants: &mut [Variant]) {
    for variant in variants.iter_mut() {
        if variant
            .rsid
            .as_deref()
            .is_some_and(is_canonical_rsid)
        {
            continue;
        }

        let mut recovered: Option<String> = None;
        if let Some(raw) = variant.raw_uniprot_data.as_ref() {
            let alt = variant
                .alternative_sequence
                .as_deref()
                .map(str::to_uppercase);
            if let Some(xrefs) = raw.get("xrefs").and_then(Value::as_array) {
                for xref in xrefs {
                    let name = xref
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_lowercase();
                    if name != "dbsnp" && name != "rsid" {
                        continue;
                    }
                    let Some(candidate) = xref
                        .get("id")
                        .and_then(Value::as_str)
                        .and_then(extract::canonical_rsid)
                    else {
                        continue;
                    };
                    let xref_allele = xref
                        .get("allele")
                        .and_then(Value::as_str)
                        .map(str::to_uppercase);
                    let allele_compatible = match (alt.as_deref(), xref_allele.as_deref()) {
                        (Some(alt), Some(allele)) => alt == allele,
                        _ => true,
                    };
                    if allele_compatible {
                        recovered = Some(candidate);
                        break;
                    }
                }
            }
            if recovered.is_none() {
                if let Some(clinvar) = raw.get("clinvar") {
                    for key in ["rsid", "dbsnp", "dbsnp_id"] {
                        if let Some(candidate) = clinvar
                            .get(key)
                            .and_then(Value::as_str)
                            .and_then(extract::canonical_rsid)
                        {
                            recovered = Some(candidate);
                            break;
                        }
                    }
                }
            }
        }
        variant.rsid = recovered;
    }
}

/// Ethnicity-aware medication adjustment hints. Advisory only; the rule
/// table is closed and conservative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EthnicityAdjustment {
    pub drug: String,
    pub gene: String,
    pub adjustment: String,
    pub strength: String,
    pub rationale: String,
    #[serde(rename = "snomed:code", skip_serializing_if = "Option::is_none")]
    pub snomed_code: Option<String>,
    #[serde(rename = "snomed:uri", skip_serializing_if = "Option::is_none")]
    pub snomed_uri: Option<String>,
}

fn has_gene(variants: &[Variant], gene: &str) -> bool {
    variants.iter().any(|variant| variant.gene_symbol == gene)
}

pub fn suggest_ethnicity_adjustments(
    variants: &[Variant],
    ethnicity: Option<&str>,
) -> Vec<EthnicityAdjustment> {
    let Some(ethnicity) = ethnicity else {
        return Vec::new();
    };
    let mut out = Vec::new();

    let adjustment = |drug: &str, gene: &str, adjustment: &str, strength: &str, rationale: &str| {
        EthnicityAdjustment {
            drug: drug.to_string(),
            gene: gene.to_string(),
            adjustment: adjustment.to_string(),
            strength: strength.to_string(),
            rationale: rationale.to_string(),
            snomed_code: None,
            snomed_uri: None,
        }
    };

    // CYP2C19 ↔ clopidogrel: loss-of-function alleles are far more
    // common in East Asian populations.
    if ethnicity == "East Asian" && has_gene(variants, "CYP2C19") {
        out.push(adjustment(
            "Clopidogrel",
            "CYP2C19",
            "consider alternative",
            "consider",
            "CYP2C19 loss-of-function alleles (*2, *3) are very common in East Asian populations; reduced activation of clopidogrel may occur. Consider an alternative antiplatelet agent.",
        ));
    } else if matches!(ethnicity, "South Asian" | "Southeast Asian")
        && has_gene(variants, "CYP2C19")
    {
        out.push(adjustment(
            "Clopidogrel",
            "CYP2C19",
            "monitor closely",
            "suggestion",
            "CYP2C19 loss-of-function alleles occur in South and Southeast Asian populations; monitor for reduced clopidogrel efficacy.",
        ));
    }

    // CYP3A5 ↔ tacrolimus: high expressor alleles frequent in African
    // populations.
    if ethnicity == "African" && has_gene(variants, "CYP3A5") {
        out.push(adjustment(
            "Tacrolimus",
            "CYP3A5",
            "increase dose / monitor",
            "consider",
            "High CYP3A5 expression is frequent in African populations; tacrolimus clearance may be higher. Monitor trough levels and adjust.",
        ));
    }

    // CYP2D6 ↔ codeine/tramadol for non-European ancestries.
    if matches!(
        ethnicity,
        "African" | "South Asian" | "East Asian" | "Southeast Asian"
    ) && has_gene(variants, "CYP2D6")
    {
        out.push(adjustment(
            "Codeine/Tramadol",
            "CYP2D6",
            "monitor closely",
            "suggestion",
            "CYP2D6 activity distribution varies by population; risk of altered morphine exposure. Monitor efficacy and adverse events.",
        ));
    }

    // Warfarin sensitivity varies by ancestry regardless of observed
    // variants.
    if matches!(
        ethnicity,
        "African" | "South Asian" | "East Asian" | "Southeast Asian"
    ) {
        out.push(adjustment(
            "Warfarin",
            "VKORC1/CYP2C9",
            "monitor closely",
            "suggestion",
            "Warfarin sensitivity varies by ancestry; consider closer INR monitoring and genotype-guided dosing when available.",
        ));
    }

    out
}

/// Patient-specific population context: frequency in the primary
/// ethnicity, significance banding, and a one-line summary per variant.
pub fn attach_population_context(variants: &mut [Variant], ethnicity: Option<&str>) {
    for variant in variants.iter_mut() {
        variant.patient_population_frequency = ethnicity
            .and_then(|ethnicity| variant.population_frequencies.get(ethnicity))
            .copied();
        variant.population_significance =
            PopulationSignificance::classify(variant.patient_population_frequency);
        variant.ethnicity_context = Some(variant.compose_ethnicity_context(ethnicity));
    }
}

/// Missing-SNOMED summary over the clinical information subtrees.
pub fn snomed_validation(clinical: &ClinicalInformation) -> Value {
    let missing_conditions: Vec<String> = clinical
        .current_conditions
        .iter()
        .filter(|condition| condition.snomed_code.is_none())
        .map(|condition| condition.display_label().to_string())
        .collect();
    let missing_medications: Vec<String> = clinical
        .current_medications
        .iter()
        .filter(|medication| medication.snomed_code.is_none())
        .map(|medication| medication.name.clone())
        .collect();
    let missing_lifestyle: Vec<String> = clinical
        .lifestyle_factors
        .iter()
        .filter(|factor| {
            factor.snomed_code.is_none()
                && matches!(
                    factor.factor_type.as_deref(),
                    Some("smoking") | Some("alcohol") | Some("diet")
                )
        })
        .map(|factor| {
            factor
                .label
                .clone()
                .or_else(|| factor.factor_type.clone())
                .unwrap_or_default()
        })
        .collect();

    json!({
        "totals": {
            "conditions": clinical.current_conditions.len(),
            "medications": clinical.current_medications.len(),
            "lifestyle": clinical.lifestyle_factors.len(),
        },
        "missing_counts": {
            "conditions": missing_conditions.len(),
            "medications": missing_medications.len(),
            "lifestyle": missing_lifestyle.len(),
        },
        "missing_examples": {
            "conditions": missing_conditions.into_iter().take(5).collect::<Vec<_>>(),
            "medications": missing_medications.into_iter().take(5).collect::<Vec<_>>(),
            "lifestyle": missing_lifestyle.into_iter().take(5).collect::<Vec<_>>(),
        }
    })
}

pub struct Assembler {
    resolver: Arc<IdResolver>,
    output_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AssembledOutputs {
    pub comprehensive_jsonld: PathBuf,
    pub summary_json: PathBuf,
    pub drug_matrix_json: PathBuf,
    pub conflicts_json: PathBuf,
}

impl Assembler {
    pub fn new(resolver: Arc<IdResolver>, output_dir: PathBuf) -> Self {
        Self {
            resolver,
            output_dir,
        }
    }

    /// Builds the comprehensive patient document after fan-in and
    /// linking, and writes the four comprehensive outputs.
    #[allow(clippy::too_many_arguments)]
    pub async fn assemble(
        &self,
        patient_id: &str,
        genes: &[String],
        mut variants: Vec<Variant>,
        affected_drugs: &BTreeSet<String>,
        associated_diseases: &BTreeSet<String>,
        linking: &LinkingResult,
        dashboard_profile: Option<&Value>,
    ) -> Result<(Value, AssembledOutputs), PgxError> {
        assign_exact_rsid(&mut variants);

        let mut clinical_info = dashboard_profile
            .and_then(|profile| profile.get("clinical_information"))
            .cloned()
            .unwrap_or(json!({}));

        // Demographics ethnicity labels get SNOMED codes where they
        // resolve.
        let ethnicity_labels: Vec<String> = clinical_info
            .get("demographics")
            .and_then(|demo| demo.get("ethnicity"))
            .map(|ethnicity| match ethnicity {
                Value::String(v) => vec![v.clone()],
                Value::Array(rows) => rows
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
                _ => Vec::new(),
            })
            .unwrap_or_default();
        if !ethnicity_labels.is_empty() {
            let mut enriched = Vec::new();
            for label in &ethnicity_labels {
                match self.resolver.resolve_snomed(label).await? {
                    Some(concept) => enriched.push(json!({
                        "label": label,
                        "snomed:code": concept.code,
                        "snomed:uri": concept.uri,
                    })),
                    None => enriched.push(json!({"label": label})),
                }
            }
            if let Some(obj) = clinical_info.as_object_mut() {
                obj.insert("ethnicity_snomed".to_string(), json!(enriched));
            }
        }

        let typed_clinical: ClinicalInformation =
            serde_json::from_value(clinical_info.clone()).unwrap_or_default();
        if let Some(obj) = clinical_info.as_object_mut() {
            obj.insert(
                "snomed_validation".to_string(),
                snomed_validation(&typed_clinical),
            );
        }

        // Population context plus ethnicity-aware adjustment hints.
        let wrapper = json!({"clinical_information": clinical_info.clone()});
        let ethnicity = primary_ethnicity(&wrapper);
        attach_population_context(&mut variants, ethnicity.as_deref());
        let mut adjustments =
            suggest_ethnicity_adjustments(&variants, ethnicity.as_deref());
        for adjustment in adjustments.iter_mut() {
            if let Some(concept) = self.resolver.resolve_drug_snomed(&adjustment.drug).await? {
                adjustment.snomed_uri = Some(concept.uri.clone());
                adjustment.snomed_code = Some(concept.code);
            }
        }

        // MRN preference for the canonical entity id.
        let mrn = str_at(&clinical_info, &["demographics", "mrn"]).map(str::to_string);
        let canonical_id = mrn.clone().unwrap_or_else(|| patient_id.to_string());

        let first = str_at(&clinical_info, &["demographics", "foaf:firstName"]).unwrap_or("");
        let last = str_at(&clinical_info, &["demographics", "foaf:familyName"]).unwrap_or("");
        let profile_name = if !first.is_empty() && !last.is_empty() {
            format!("{first} {last} - Pharmacogenomics Profile")
        } else {
            "Comprehensive Pharmacogenomics Patient Profile".to_string()
        };

        let pgx_profile = PharmacogenomicsProfile {
            genes_analyzed: genes.to_vec(),
            total_variants: variants.len(),
            variants_by_gene: genes
                .iter()
                .map(|gene| {
                    (
                        gene.clone(),
                        variants
                            .iter()
                            .filter(|variant| variant.gene_symbol == *gene)
                            .count(),
                    )
                })
                .collect(),
            affected_drugs: affected_drugs.iter().cloned().collect(),
            associated_diseases: associated_diseases.iter().cloned().collect(),
            clinical_summary: ClinicalSummary::from_variants(&variants),
            literature_summary: LiteratureSummary::from_variants(&variants),
        };

        let mut document = Map::new();
        document.insert("@context".into(), canonical_context());
        document.insert(
            "@id".into(),
            json!(format!("http://ugent.be/person/{canonical_id}")),
        );
        document.insert(
            "@type".into(),
            json!(["foaf:Person", "schema:Person", "schema:Patient"]),
        );
        document.insert("identifier".into(), json!(canonical_id));
        if canonical_id != patient_id {
            document.insert(
                "other_identifiers".into(),
                json!({"legacy_patient_id": patient_id}),
            );
        }
        document.insert("patient_id".into(), json!(canonical_id));
        document.insert(
            "dashboard_source".into(),
            json!(dashboard_profile.is_some()),
        );
        document.insert("name".into(), json!(profile_name));
        document.insert(
            "description".into(),
            json!(format!(
                "Multi-gene pharmacogenomics profile covering {} genes with {} variants",
                genes.len(),
                variants.len()
            )),
        );
        document.insert("dateCreated".into(), json!(timestamp_now()));
        document.insert("clinical_information".into(), clinical_info);
        document.insert(
            "pharmacogenomics_profile".into(),
            serde_json::to_value(&pgx_profile)?,
        );
        document.insert("variants".into(), serde_json::to_value(&variants)?);
        document.insert("variant_linking".into(), serde_json::to_value(linking)?);
        if !adjustments.is_empty() {
            document.insert(
                "ethnicity_medication_adjustments".into(),
                serde_json::to_value(&adjustments)?,
            );
        }
        document.insert("dataSource".into(), json!(DATA_SOURCE));

        let document = Value::Object(document);
        let outputs = self.write_outputs(&canonical_id, &document, &variants, linking).await?;
        Ok((document, outputs))
    }

    async fn write_outputs(
        &self,
        patient_id: &str,
        document: &Value,
        variants: &[Variant],
        linking: &LinkingResult,
    ) -> Result<AssembledOutputs, PgxError> {
        let dir = self.output_dir.join("comprehensive");

        let comprehensive_jsonld = dir.join(format!("{patient_id}_comprehensive.jsonld"));
        write_json(&comprehensive_jsonld, document).await?;

        let summary_json = dir.join(format!("{patient_id}_summary.json"));
        write_json(
            &summary_json,
            &json!({
                "patient_id": patient_id,
                "genes": document["pharmacogenomics_profile"]["genes_analyzed"],
                "total_variants": variants.len(),
                "clinical_summary": document["pharmacogenomics_profile"]["clinical_summary"],
                "conflicts": serde_json::to_value(&linking.summary.conflicts)?,
                "links": serde_json::to_value(&linking.summary.total_links)?,
                "generated": timestamp_now(),
            }),
        )
        .await?;

        let drug_matrix_json = dir.join(format!("{patient_id}_drug_matrix.json"));
        write_json(&drug_matrix_json, &drug_matrix(variants)).await?;

        let conflicts_json = dir.join(format!("{patient_id}_conflicts.json"));
        write_json(
            &conflicts_json,
            &json!({
                "conflicts": serde_json::to_value(&linking.conflicts)?,
                "summary": serde_json::to_value(&linking.summary.conflicts)?,
            }),
        )
        .await?;

        Ok(AssembledOutputs {
            comprehensive_jsonld,
            summary_json,
            drug_matrix_json,
            conflicts_json,
        })
    }
}

/// Drug-centric matrix: for each affected drug, the genes, variants,
/// evidence levels and recommendations behind it.
pub fn drug_matrix(variants: &[Variant]) -> Value {
    let mut matrix: Map<String, Value> = Map::new();
    for variant in variants {
        for drug in variant.affected_drugs() {
            let entry = matrix
                .entry(drug.name.to_lowercase())
                .or_insert_with(|| {
                    json!({
                        "name": drug.name,
                        "genes": [],
                        "variants": [],
                        "evidence_levels": [],
                        "recommendations": [],
                    })
                });
            let push_unique = |list: &mut Vec<Value>, value: Value| {
                if !list.contains(&value) {
                    list.push(value);
                }
            };
            if let Some(genes) = entry.get_mut("genes").and_then(Value::as_array_mut) {
                push_unique(genes, json!(variant.gene_symbol));
            }
            if let Some(ids) = entry.get_mut("variants").and_then(Value::as_array_mut) {
                push_unique(ids, json!(variant.best_identifier()));
            }
            if let Some(levels) = entry.get_mut("evidence_levels").and_then(Value::as_array_mut)
            {
                if let Some(level) = drug.evidence_level.as_deref() {
                    push_unique(levels, json!(level));
                }
            }
            if let Some(recommendations) = entry
                .get_mut("recommendations")
                .and_then(Value::as_array_mut)
            {
                if !drug.recommendation.is_empty() {
                    push_unique(recommendations, json!(drug.recommendation));
                }
            }
        }
    }
    Value::Object(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_date(mut value: Value) -> Value {
        if let Some(obj) = value.as_object_mut() {
            obj.remove("dateCreated");
        }
        value
    }

    #[test]
    fn normalize_is_idempotent_modulo_date_created() {
        let raw = json!({
            "demographics": {
                "mrn": "MRN-12345",
                "first_name": "Mei",
                "last_name": "Chen",
                "gender": "female",
                "weight": 61.5,
                "height": 164,
                "age": 54,
                "ethnicity": ["East Asian"]
            },
            "current_medications": [{"name": "Clopidogrel", "rxnorm_cui": "32968"}],
            "current_conditions": [{"snomed:code": "394659003", "rdfs:label": "Acute coronary syndrome"}]
        });
        let once = normalize_dashboard_profile(&raw);
        let twice = normalize_dashboard_profile(&once);
        assert_eq!(strip_date(once.clone()), strip_date(twice));

        assert_eq!(once["patient_id"], json!("MRN-12345"));
        assert_eq!(once["@id"], json!("http://ugent.be/person/MRN-12345"));
        assert_eq!(
            once["clinical_information"]["demographics"]["schema:weight"]["schema:value"],
            json!(61.5)
        );
        assert_eq!(
            once["clinical_information"]["current_medications"][0]["name"],
            json!("Clopidogrel")
        );
    }

    #[test]
    fn profiles_without_mrn_get_stable_generated_ids() {
        let raw = json!({"current_medications": [{"name": "Warfarin"}]});
        let id_a = stable_profile_id(&raw);
        let id_b = stable_profile_id(&raw);
        assert_eq!(id_a, id_b);
        assert!(id_a.starts_with("AUTO_"));

        let different = stable_profile_id(&json!({"current_medications": []}));
        assert_ne!(id_a, different);
    }

    #[test]
    fn assign_exact_rsid_never_invents() {
        let mut variants = vec![
            Variant {
                gene_symbol: "CYP2C19".into(),
                variant_id: "ok".into(),
                rsid: Some("rs4244285".into()),
                ..Default::default()
            },
            Variant {
                gene_symbol: "CYP2C19".into(),
                variant_id: "from_xref".into(),
                rsid: Some("not-an-rsid".into()),
                alternative_sequence: Some("A".into()),
                raw_uniprot_data: Some(json!({
                    "xrefs": [
                        {"name": "dbSNP", "id": "rs999", "allele": "T"},
                        {"name": "dbSNP", "id": "rs12248560", "allele": "A"}
                    ]
                })),
                ..Default::default()
            },
            Variant {
                gene_symbol: "CYP2C19".into(),
                variant_id: "from_clinvar".into(),
                raw_uniprot_data: Some(json!({"clinvar": {"dbsnp_id": "rs4986893"}})),
                ..Default::default()
            },
            Variant {
                gene_symbol: "CYP2C19".into(),
                variant_id: "hopeless".into(),
                rsid: Some("garbage".into()),
                ..Default::default()
            },
        ];
        assign_exact_rsid(&mut variants);
        assert_eq!(variants[0].rsid.as_deref(), Some("rs4244285"));
        // The allele-matching xref wins over the mismatching one.
        assert_eq!(variants[1].rsid.as_deref(), Some("rs12248560"));
        assert_eq!(variants[2].rsid.as_deref(), Some("rs4986893"));
        assert_eq!(variants[3].rsid, None);
    }

    #[test]
    fn east_asian_cyp2c19_gets_clopidogrel_adjustment() {
        let variants = vec![Variant {
            gene_symbol: "CYP2C19".into(),
            variant_id: "rs4244285".into(),
            ..Default::default()
        }];
        let adjustments = suggest_ethnicity_adjustments(&variants, Some("East Asian"));
        let clopidogrel = adjustments
            .iter()
            .find(|a| a.drug == "Clopidogrel")
            .expect("clopidogrel adjustment");
        assert_eq!(clopidogrel.gene, "CYP2C19");
        assert_eq!(clopidogrel.adjustment, "consider alternative");
        assert_eq!(clopidogrel.strength, "consider");
        // Warfarin monitoring applies for non-European ancestries.
        assert!(adjustments.iter().any(|a| a.drug == "Warfarin"));
    }

    #[test]
    fn no_ethnicity_no_adjustments() {
        let variants = vec![Variant {
            gene_symbol: "CYP2C19".into(),
            variant_id: "v".into(),
            ..Default::default()
        }];
        assert!(suggest_ethnicity_adjustments(&variants, None).is_empty());
    }

    #[test]
    fn population_context_attaches_frequency_and_band() {
        let mut variants = vec![Variant {
            gene_symbol: "CYP2C19".into(),
            variant_id: "rs4244285".into(),
            rsid: Some("rs4244285".into()),
            population_frequencies: std::collections::BTreeMap::from([
                ("East Asian".to_string(), 0.31),
                ("European".to_string(), 0.15),
            ]),
            ..Default::default()
        }];
        attach_population_context(&mut variants, Some("East Asian"));
        assert_eq!(variants[0].patient_population_frequency, Some(0.31));
        assert_eq!(
            variants[0].population_significance,
            Some(PopulationSignificance::Common)
        );
        assert!(
            variants[0]
                .ethnicity_context
                .as_deref()
                .unwrap()
                .contains("East Asian")
        );

        attach_population_context(&mut variants, Some("African"));
        assert_eq!(variants[0].patient_population_frequency, None);
        assert_eq!(variants[0].population_significance, None);
    }

    #[test]
    fn drug_matrix_groups_by_drug() {
        use crate::entities::drug::AffectedDrug;
        use crate::entities::variant::PharmGkbBlock;

        let mut drug = AffectedDrug::new("clopidogrel");
        drug.evidence_level = Some("1A".into());
        drug.recommendation = "Avoid clopidogrel".into();
        let variant_a = Variant {
            gene_symbol: "CYP2C19".into(),
            variant_id: "rs4244285".into(),
            pharmgkb: Some(PharmGkbBlock {
                drugs: vec![drug.clone()],
                ..Default::default()
            }),
            ..Default::default()
        };
        let variant_b = Variant {
            gene_symbol: "CYP2D6".into(),
            variant_id: "rs1065852".into(),
            pharmgkb: Some(PharmGkbBlock {
                drugs: vec![drug],
                ..Default::default()
            }),
            ..Default::default()
        };

        let matrix = drug_matrix(&[variant_a, variant_b]);
        let entry = &matrix["clopidogrel"];
        assert_eq!(entry["genes"].as_array().unwrap().len(), 2);
        assert_eq!(entry["variants"].as_array().unwrap().len(), 2);
        assert_eq!(entry["evidence_levels"], json!(["1A"]));
    }

    #[test]
    fn snomed_validation_counts_missing_codes() {
        let clinical: ClinicalInformation = serde_json::from_value(json!({
            "current_conditions": [
                {"snomed:code": "394659003", "rdfs:label": "ACS"},
                {"rdfs:label": "Mystery condition"}
            ],
            "current_medications": [{"name": "Clopidogrel"}],
            "lifestyle_factors": [{"factor_type": "smoking"}]
        }))
        .unwrap();
        let validation = snomed_validation(&clinical);
        assert_eq!(validation["missing_counts"]["conditions"], json!(1));
        assert_eq!(validation["missing_counts"]["medications"], json!(1));
        assert_eq!(validation["missing_counts"]["lifestyle"], json!(1));
        assert_eq!(validation["totals"]["conditions"], json!(2));
    }
}
