use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entities::drug::AffectedDrug;
use crate::entities::publication::Publication;
use crate::sources::bioportal::SnomedConcept;
use crate::sources::clinvar::ClinVarRecord;
use crate::sources::pharmgkb::PharmGkbAnnotation;

/// Banding of the allele frequency in the patient's primary ethnicity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopulationSignificance {
    Common,
    LowFrequency,
    Rare,
    UltraRare,
}

impl PopulationSignificance {
    /// common ≥5%, low-frequency 1–5%, rare 0.1–1%, ultra-rare <0.1%.
    pub fn classify(frequency: Option<f64>) -> Option<Self> {
        let frequency = frequency?;
        Some(if frequency >= 0.05 {
            Self::Common
        } else if frequency >= 0.01 {
            Self::LowFrequency
        } else if frequency >= 0.001 {
            Self::Rare
        } else {
            Self::UltraRare
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Common => "common",
            Self::LowFrequency => "low_frequency",
            Self::Rare => "rare",
            Self::UltraRare => "ultra_rare",
        }
    }
}

/// PharmGKB evidence block on a variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PharmGkbBlock {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<PharmGkbAnnotation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drugs: Vec<AffectedDrug>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phenotypes: Vec<String>,
}

/// Literature attached in Phase 3: gene-level, variant-specific, and
/// per-drug publications. De-duplication by PMID happens at assembly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantLiterature {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gene_publications: Vec<Publication>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variant_publications: Vec<Publication>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub drug_publications: BTreeMap<String, Vec<Publication>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiseaseAssociation {
    pub name: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snomed: Option<SnomedConcept>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_phenotype: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhenotypeMapping {
    pub phenotype_text: String,
    pub clinical_finding: SnomedConcept,
}

/// Metabolizer phenotype call for the gene's diplotype.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetabolizerCall {
    pub phenotype: String,
    pub diplotype: String,
    pub functionality: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub star_alleles: Vec<String>,
    pub source: String,
}

/// The richest entity in the system. Identity fields come from Phase 1,
/// evidence blocks accrete over Phases 2 and 3, population context is
/// attached at fan-in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Variant {
    #[serde(alias = "gene")]
    pub gene_symbol: String,
    pub variant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protein_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinical_significance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consequence_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wild_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternative_sequence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub begin_position: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_position: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genomic_notation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hgvs_notation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinvar: Option<ClinVarRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pharmgkb: Option<PharmGkbBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub literature: Option<VariantLiterature>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub population_frequencies: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_population_frequency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub population_significance: Option<PopulationSignificance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ethnicity_context: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disease_associations: Vec<DiseaseAssociation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phenotypes_snomed: Vec<PhenotypeMapping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metabolizer_phenotype: Option<MetabolizerCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_confidence: Option<crate::evidence::OverallConfidence>,
    /// Raw upstream payloads, carried for faithful re-emission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_uniprot_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_pharmgkb_data: Option<Value>,
}

static RSID_RE: OnceLock<regex::Regex> = OnceLock::new();

pub fn is_canonical_rsid(value: &str) -> bool {
    let re = RSID_RE.get_or_init(|| regex::Regex::new(r"^rs\d+$").expect("rsid regex"));
    re.is_match(value)
}

impl Variant {
    /// Best identifier for display and search, in the same preference
    /// order everywhere: explicit id, rsID, genomic notation, protein
    /// position.
    pub fn best_identifier(&self) -> &str {
        if !self.variant_id.is_empty() {
            return &self.variant_id;
        }
        if let Some(rsid) = self.rsid.as_deref() {
            return rsid;
        }
        if let Some(notation) = self.genomic_notation.as_deref() {
            return notation;
        }
        "Unknown"
    }

    /// rsID usable as a dbSNP triple key; variants without one are kept
    /// in the variant array but stay out of triple-keyed views.
    pub fn triple_rsid(&self) -> Option<&str> {
        self.rsid.as_deref().filter(|rsid| is_canonical_rsid(rsid))
    }

    pub fn affected_drugs(&self) -> &[AffectedDrug] {
        self.pharmgkb
            .as_ref()
            .map(|block| block.drugs.as_slice())
            .unwrap_or(&[])
    }

    /// One-sentence population context for reports.
    pub fn compose_ethnicity_context(&self, ethnicity: Option<&str>) -> String {
        let id = self.best_identifier();
        match (ethnicity, self.patient_population_frequency) {
            (Some(ethnicity), Some(frequency)) => {
                let band = PopulationSignificance::classify(Some(frequency))
                    .map(|b| b.as_str().replace('_', "-"))
                    .unwrap_or_else(|| "unknown".to_string());
                format!(
                    "{id} has an allele frequency of {frequency:.4} in the {ethnicity} population ({band})."
                )
            }
            (Some(ethnicity), None) => {
                if self.population_frequencies.is_empty() {
                    format!("No population frequency data available for {id}.")
                } else {
                    format!(
                        "No {ethnicity} population frequency is recorded for {id}; frequencies are available for {} other population(s).",
                        self.population_frequencies.len()
                    )
                }
            }
            (None, _) => format!("No patient ethnicity on record to contextualise {id}."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn population_significance_bands() {
        assert_eq!(
            PopulationSignificance::classify(Some(0.2)),
            Some(PopulationSignificance::Common)
        );
        assert_eq!(
            PopulationSignificance::classify(Some(0.05)),
            Some(PopulationSignificance::Common)
        );
        assert_eq!(
            PopulationSignificance::classify(Some(0.02)),
            Some(PopulationSignificance::LowFrequency)
        );
        assert_eq!(
            PopulationSignificance::classify(Some(0.005)),
            Some(PopulationSignificance::Rare)
        );
        assert_eq!(
            PopulationSignificance::classify(Some(0.0001)),
            Some(PopulationSignificance::UltraRare)
        );
        assert_eq!(PopulationSignificance::classify(None), None);
    }

    #[test]
    fn population_significance_serialises_snake_case() {
        assert_eq!(
            serde_json::to_value(PopulationSignificance::UltraRare).unwrap(),
            serde_json::json!("ultra_rare")
        );
    }

    #[test]
    fn canonical_rsid_is_strict() {
        assert!(is_canonical_rsid("rs4244285"));
        assert!(!is_canonical_rsid("rs"));
        assert!(!is_canonical_rsid("4244285"));
        assert!(!is_canonical_rsid("rs4244285a"));
    }

    #[test]
    fn triple_rsid_excludes_malformed_ids() {
        let mut variant = Variant {
            gene_symbol: "CYP2C19".into(),
            variant_id: "VAR_001".into(),
            ..Default::default()
        };
        assert!(variant.triple_rsid().is_none());

        variant.rsid = Some("rs4244285".into());
        assert_eq!(variant.triple_rsid(), Some("rs4244285"));

        variant.rsid = Some("VCV000001".into());
        assert!(variant.triple_rsid().is_none());
    }

    #[test]
    fn ethnicity_context_mentions_frequency_band() {
        let variant = Variant {
            gene_symbol: "CYP2C19".into(),
            variant_id: "rs4244285".into(),
            patient_population_frequency: Some(0.31),
            ..Default::default()
        };
        let context = variant.compose_ethnicity_context(Some("East Asian"));
        assert!(context.contains("East Asian"));
        assert!(context.contains("0.3100"));
        assert!(context.contains("common"));

        let no_data = Variant {
            gene_symbol: "CYP2C19".into(),
            variant_id: "rs1".into(),
            ..Default::default()
        };
        assert!(
            no_data
                .compose_ethnicity_context(Some("African"))
                .contains("No population frequency data")
        );
    }

    #[test]
    fn gene_alias_deserialises() {
        let variant: Variant = serde_json::from_value(serde_json::json!({
            "gene": "CYP2D6",
            "variant_id": "rs1065852"
        }))
        .unwrap();
        assert_eq!(variant.gene_symbol, "CYP2D6");
    }
}
