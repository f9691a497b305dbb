use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A patient condition. The SNOMED code, when present, is the join key
/// to variant-derived diseases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Condition {
    #[serde(
        rename = "snomed:code",
        alias = "snomed_code",
        skip_serializing_if = "Option::is_none"
    )]
    pub snomed_code: Option<String>,
    #[serde(
        rename = "rdfs:label",
        alias = "preferred_label",
        alias = "label",
        alias = "skos:prefLabel",
        skip_serializing_if = "Option::is_none"
    )]
    pub label: Option<String>,
    #[serde(alias = "search_term", skip_serializing_if = "Option::is_none")]
    pub search_term: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Condition {
    pub fn display_label(&self) -> &str {
        self.label
            .as_deref()
            .or(self.search_term.as_deref())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedicationSource {
    EvidenceBased,
    Chembl,
    Rxnorm,
    #[default]
    Manual,
}

/// A prescribed medication. Owned by the patient; link edges reference it
/// by display name only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Medication {
    #[serde(
        alias = "drug_name",
        alias = "rdfs:label",
        alias = "schema:name",
        default
    )]
    pub name: String,
    #[serde(
        rename = "snomed:code",
        alias = "snomed_code",
        skip_serializing_if = "Option::is_none"
    )]
    pub snomed_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rxnorm_cui: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chembl_id: Option<String>,
    #[serde(
        rename = "drugbank:id",
        alias = "drugbank_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub drugbank_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dose: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub treats_condition_snomed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default)]
    pub source: MedicationSource,
}

/// Lab results and lifestyle factors are carried through unchanged; only
/// the SNOMED code is read (for the validation summary).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifestyleFactor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub factor_type: Option<String>,
    #[serde(
        rename = "rdfs:label",
        alias = "label",
        alias = "skos:prefLabel",
        skip_serializing_if = "Option::is_none"
    )]
    pub label: Option<String>,
    #[serde(
        rename = "snomed:code",
        alias = "snomed_code",
        skip_serializing_if = "Option::is_none"
    )]
    pub snomed_code: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Typed view over a profile's `clinical_information` subtree. The
/// envelope itself stays dynamic JSON; this view is what the linker and
/// the validation summary read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClinicalInformation {
    #[serde(default)]
    pub current_conditions: Vec<Condition>,
    #[serde(default)]
    pub current_medications: Vec<Medication>,
    #[serde(default)]
    pub lifestyle_factors: Vec<LifestyleFactor>,
}

impl ClinicalInformation {
    /// Best-effort read from a profile document. Unparseable subtrees
    /// degrade to empty lists rather than failing the run.
    pub fn from_profile(profile: &Value) -> Self {
        profile
            .get("clinical_information")
            .cloned()
            .and_then(|ci| serde_json::from_value(ci).ok())
            .unwrap_or_default()
    }
}

/// Primary ethnicity from the demographics block: either a plain string
/// or the first entry of a list.
pub fn primary_ethnicity(profile: &Value) -> Option<String> {
    let ethnicity = profile
        .get("clinical_information")?
        .get("demographics")?
        .get("ethnicity")?;
    match ethnicity {
        Value::String(v) => {
            let v = v.trim();
            (!v.is_empty()).then(|| v.to_string())
        }
        Value::Array(rows) => rows
            .first()
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn medication_name_accepts_key_variants() {
        let medication: Medication =
            serde_json::from_value(json!({"drug_name": "Clopidogrel"})).unwrap();
        assert_eq!(medication.name, "Clopidogrel");

        let medication: Medication =
            serde_json::from_value(json!({"rdfs:label": "Warfarin", "snomed:code": "372756006"}))
                .unwrap();
        assert_eq!(medication.name, "Warfarin");
        assert_eq!(medication.snomed_code.as_deref(), Some("372756006"));
    }

    #[test]
    fn clinical_information_reads_from_profile_envelope() {
        let profile = json!({
            "clinical_information": {
                "current_conditions": [
                    {"snomed:code": "394659003", "rdfs:label": "Acute coronary syndrome"}
                ],
                "current_medications": [
                    {"name": "Clopidogrel", "rxnorm_cui": "32968"}
                ]
            }
        });
        let info = ClinicalInformation::from_profile(&profile);
        assert_eq!(info.current_conditions.len(), 1);
        assert_eq!(info.current_conditions[0].display_label(), "Acute coronary syndrome");
        assert_eq!(info.current_medications[0].name, "Clopidogrel");
    }

    #[test]
    fn missing_clinical_information_degrades_to_empty() {
        let info = ClinicalInformation::from_profile(&json!({}));
        assert!(info.current_conditions.is_empty());
        assert!(info.current_medications.is_empty());
    }

    #[test]
    fn primary_ethnicity_handles_string_and_list() {
        let profile = json!({"clinical_information": {"demographics": {"ethnicity": ["East Asian", "Other"]}}});
        assert_eq!(primary_ethnicity(&profile).as_deref(), Some("East Asian"));

        let profile = json!({"clinical_information": {"demographics": {"ethnicity": "African"}}});
        assert_eq!(primary_ethnicity(&profile).as_deref(), Some("African"));

        assert!(primary_ethnicity(&json!({})).is_none());
    }

    #[test]
    fn medication_source_round_trips_snake_case() {
        let source: MedicationSource = serde_json::from_value(json!("evidence_based")).unwrap();
        assert_eq!(source, MedicationSource::EvidenceBased);
        assert_eq!(
            serde_json::to_value(MedicationSource::Manual).unwrap(),
            json!("manual")
        );
    }
}
