use serde::{Deserialize, Serialize};

use crate::evidence::EvidenceInterpretation;
use crate::sources::chembl::ChemblEnrichment;
use crate::sources::openfda::FdaLabel;
use crate::sources::rxnorm::RxNormConcept;

/// A drug affected by one or more variants, with whatever identifier and
/// enrichment data the pipeline managed to attach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffectedDrug {
    pub name: String,
    /// Recommendation prose from the owning PharmGKB annotation.
    #[serde(default)]
    pub recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_interpretation: Option<EvidenceInterpretation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pharmgkb_annotation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chembl_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rxnorm_cui: Option<String>,
    #[serde(
        rename = "snomed:code",
        alias = "snomed_code",
        skip_serializing_if = "Option::is_none"
    )]
    pub snomed_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chembl_data: Option<ChemblEnrichment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fda_label: Option<FdaLabel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rxnorm: Option<RxNormConcept>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adverse_reactions_snomed: Vec<AdverseReactionSnomed>,
}

/// A label-mined adverse reaction and its SNOMED mapping, when found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdverseReactionSnomed {
    pub reaction: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snomed: Option<crate::sources::bioportal::SnomedConcept>,
}

impl AffectedDrug {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            recommendation: String::new(),
            evidence_level: None,
            evidence_interpretation: None,
            pharmgkb_annotation_id: None,
            chembl_id: None,
            rxnorm_cui: None,
            snomed_code: None,
            chembl_data: None,
            fda_label: None,
            rxnorm: None,
            adverse_reactions_snomed: Vec::new(),
        }
    }

    /// Stable graph key: ChEMBL id preferred, RxNorm CUI as fallback.
    /// Drugs with neither stay out of triple-keyed views.
    pub fn graph_key(&self) -> Option<String> {
        if let Some(chembl_id) = self.chembl_id.as_deref().or_else(|| {
            self.chembl_data
                .as_ref()
                .map(|enrichment| enrichment.chembl_id.as_str())
        }) {
            return Some(format!("chembl:{chembl_id}"));
        }
        self.rxnorm_cui
            .as_deref()
            .or_else(|| self.rxnorm.as_ref().map(|concept| concept.cui.as_str()))
            .map(|cui| format!("rxnorm:{cui}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_key_prefers_chembl_over_rxnorm() {
        let mut drug = AffectedDrug::new("clopidogrel");
        assert!(drug.graph_key().is_none());

        drug.rxnorm_cui = Some("32968".into());
        assert_eq!(drug.graph_key().as_deref(), Some("rxnorm:32968"));

        drug.chembl_id = Some("CHEMBL1771".into());
        assert_eq!(drug.graph_key().as_deref(), Some("chembl:CHEMBL1771"));
    }
}
