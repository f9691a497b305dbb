use serde::{Deserialize, Serialize};

/// Keywords that escalate a conflict straight to CRITICAL.
pub const CRITICAL_KEYWORDS: &[&str] = &["contraindicated", "avoid", "do not use"];

/// Keywords that mark a conflict as at least WARNING.
pub const WARNING_KEYWORDS: &[&str] = &[
    "risk",
    "toxicity",
    "adverse",
    "reduced efficacy",
    "ineffective",
    "not recommended",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkType {
    PatientMedicationAffectedByVariant,
    ConditionMatchesVariantDisease,
    VariantAssociatedWithPhenotype,
    DrugAffectedByVariant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchMethod {
    ExactName,
    SnomedCtCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Severity is monotone in the strongest keyword found across the
/// affecting variants' recommendations. Matching is case-insensitive
/// substring, so compound phrases like "contraindicated in poor
/// metabolizers" register.
pub fn severity_for_recommendations<'a, I>(recommendations: I) -> Severity
where
    I: IntoIterator<Item = &'a str>,
{
    let combined = recommendations
        .into_iter()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if CRITICAL_KEYWORDS.iter().any(|kw| combined.contains(kw)) {
        Severity::Critical
    } else if WARNING_KEYWORDS.iter().any(|kw| combined.contains(kw)) {
        Severity::Warning
    } else {
        Severity::Info
    }
}

/// Reference to a variant from a link or conflict, rich enough that the
/// database loader can resolve the gene without re-reading the variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantRef {
    pub gene: String,
    pub variant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinical_significance: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicationLink {
    pub medication: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drugbank_id: Option<String>,
    pub gene: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diplotype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phenotype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinical_significance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    pub variant: VariantRef,
    pub drug_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snomed_code: Option<String>,
    pub link_type: LinkType,
    pub match_method: MatchMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionLink {
    pub patient_condition: String,
    pub variant_disease: String,
    pub gene: Option<String>,
    pub snomed_code: String,
    pub link_type: LinkType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhenotypeLink {
    pub variant_id: String,
    pub gene: Option<String>,
    pub phenotype_text: String,
    pub source: String,
    pub link_type: LinkType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrugLink {
    pub drug_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snomed_code: Option<String>,
    pub variant: VariantRef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_levels: Vec<String>,
    pub link_type: LinkType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Links {
    #[serde(default)]
    pub medication_to_variant: Vec<MedicationLink>,
    #[serde(default)]
    pub condition_to_disease: Vec<ConditionLink>,
    #[serde(default)]
    pub variant_to_phenotype: Vec<PhenotypeLink>,
    #[serde(default)]
    pub drug_to_variant: Vec<DrugLink>,
}

/// A detected drug–gene conflict. `affecting_variants` is never empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub drug_name: String,
    pub patient_medication_ref: String,
    pub severity: Severity,
    pub affecting_variants: Vec<VariantRef>,
    pub recommendation: String,
    pub match_method: MatchMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snomed_code: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkCounts {
    pub medication_to_variant: usize,
    pub condition_to_disease: usize,
    pub variant_to_phenotype: usize,
    pub drug_to_variant: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConflictCounts {
    pub total: usize,
    pub critical: usize,
    pub warnings: usize,
    pub info: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkingSummary {
    pub total_links: LinkCounts,
    pub conflicts: ConflictCounts,
    pub patient_conditions: usize,
    pub patient_medications: usize,
    pub total_variants: usize,
    pub variants_with_drug_data: usize,
    pub analysis_timestamp: String,
}

/// Output of the variant–phenotype–drug linker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkingResult {
    pub links: Links,
    pub conflicts: Vec<Conflict>,
    pub summary: LinkingSummary,
}
