//! Phase 2 — clinical validation.
//!
//! Turns the selected Phase-1 features into [`Variant`] entities, then
//! attaches ClinVar submission summaries, PharmGKB annotations with drug
//! recommendations, and the metabolizer phenotype for the diplotype.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::entities::drug::AffectedDrug;
use crate::entities::variant::{MetabolizerCall, PharmGkbBlock, Variant};
use crate::error::PgxError;
use crate::events::{EventBus, stage};
use crate::evidence;
use crate::extract;
use crate::phases::discovery::DiscoveryOutput;
use crate::phases::metabolizer;
use crate::sources::clinvar::ClinVarClient;
use crate::sources::pharmgkb::{self, PharmGkbClient};

const MAX_ANNOTATIONS_PER_VARIANT: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicalOutput {
    pub gene_symbol: String,
    pub protein_id: String,
    pub total_variants: usize,
    pub variants: Vec<Variant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metabolizer_phenotype: Option<MetabolizerCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gene_level_phenotypes: Vec<String>,
    pub timestamp: String,
}

pub struct ClinicalValidator {
    clinvar: Arc<ClinVarClient>,
    pharmgkb: Arc<PharmGkbClient>,
    events: EventBus,
    output_dir: PathBuf,
}

impl ClinicalValidator {
    pub fn new(
        clinvar: Arc<ClinVarClient>,
        pharmgkb: Arc<PharmGkbClient>,
        events: EventBus,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            clinvar,
            pharmgkb,
            events,
            output_dir,
        }
    }

    pub async fn run(&self, discovery: &DiscoveryOutput) -> Result<ClinicalOutput, PgxError> {
        let gene = discovery.gene_symbol.as_str();
        let mut variants: Vec<Variant> = discovery
            .selected_diplotype
            .variants
            .iter()
            .map(|feature| variant_from_feature(gene, &discovery.protein_id, feature))
            .collect();

        // Gene-level annotations are shared by every variant of the gene.
        let gene_annotations = match self.pharmgkb.gene_annotations(gene).await {
            Ok(annotations) => annotations,
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                self.events.warn(
                    stage::NGS,
                    stage::CLINICAL_VALIDATION,
                    format!("PharmGKB gene annotations unavailable for {gene}: {err}"),
                );
                Vec::new()
            }
        };
        let gene_level_phenotypes = pharmgkb::extract_phenotypes(&gene_annotations);

        for variant in variants.iter_mut() {
            // ClinVar, when an rsID is available.
            if let Some(rsid) = variant.rsid.clone() {
                match self.clinvar.fetch_by_rsid(&rsid).await {
                    Ok(Some(record)) => variant.clinvar = Some(record),
                    Ok(None) => {}
                    Err(err) if err.is_transient() => {
                        self.events.warn(
                            stage::NGS,
                            stage::CLINICAL_VALIDATION,
                            format!("ClinVar lookup failed for {rsid}: {err}"),
                        );
                    }
                    Err(err) if err.is_cancelled() => return Err(err),
                    Err(err) => {
                        warn!(rsid = %rsid, "ClinVar lookup rejected: {err}");
                    }
                }
            }

            // Variant-level PharmGKB rows, merged with the gene-level set.
            let mut annotations = Vec::new();
            if let Some(rsid) = variant.rsid.as_deref() {
                match self.pharmgkb.variant_annotations(rsid).await {
                    Ok(rows) => annotations.extend(rows),
                    Err(err) if err.is_transient() => {
                        self.events.warn(
                            stage::NGS,
                            stage::CLINICAL_VALIDATION,
                            format!("PharmGKB variant lookup failed for {rsid}: {err}"),
                        );
                    }
                    Err(err) if err.is_cancelled() => return Err(err),
                    Err(err) => warn!(rsid = %rsid, "PharmGKB variant lookup rejected: {err}"),
                }
            }
            annotations.extend(gene_annotations.iter().cloned());

            let drugs: Vec<AffectedDrug> = pharmgkb::extract_drugs(&annotations)
                .into_iter()
                .map(affected_drug_from_pharmgkb)
                .collect();
            let phenotypes = pharmgkb::extract_phenotypes(&annotations);
            annotations.truncate(MAX_ANNOTATIONS_PER_VARIANT);

            variant.pharmgkb = Some(PharmGkbBlock {
                annotations,
                drugs,
                phenotypes,
            });
        }

        let call = metabolizer::determine_metabolizer_phenotype(gene, &variants);
        for variant in variants.iter_mut() {
            variant.metabolizer_phenotype = Some(call.clone());
        }

        let output = ClinicalOutput {
            gene_symbol: gene.to_string(),
            protein_id: discovery.protein_id.clone(),
            total_variants: variants.len(),
            variants,
            metabolizer_phenotype: Some(call),
            gene_level_phenotypes,
            timestamp: super::timestamp_now(),
        };

        let path = self.output_dir.join(format!("{gene}_clinical.json"));
        super::write_json(&path, &output).await?;
        Ok(output)
    }
}

/// Best-available variant identifier, in fixed preference order.
pub fn extract_variant_id(feature: &Value) -> String {
    if let Some(ft_id) = feature.get("ftId").and_then(Value::as_str) {
        if !ft_id.trim().is_empty() {
            return ft_id.trim().to_string();
        }
    }
    if let Some(rsid) = extract::rsid_from_xrefs(feature) {
        return rsid;
    }
    if let Some(clinvar_id) = extract::xref_id(feature, "ClinVar") {
        return clinvar_id.to_string();
    }
    if let Some(genomic) = extract::genomic_locations(feature).into_iter().next() {
        return genomic;
    }
    if let Some(change) = extract::protein_change(feature) {
        return change.to_string();
    }
    let begin = extract::number_any(feature, &["begin"]);
    let alternative = extract::str_any(feature, &["alternativeSequence"]);
    if let (Some(begin), Some(alternative)) = (begin, alternative) {
        return format!("pos_{}_{}", begin as i64, alternative);
    }
    "Unknown".to_string()
}

/// Builds the entity view of a raw UniProt feature. The raw payload is
/// carried on the variant for downstream re-emission.
pub fn variant_from_feature(gene_symbol: &str, protein_id: &str, feature: &Value) -> Variant {
    Variant {
        gene_symbol: gene_symbol.to_string(),
        variant_id: extract_variant_id(feature),
        rsid: extract::rsid_from_xrefs(feature),
        protein_id: Some(protein_id.to_string()),
        clinical_significance: extract::clinical_significances(feature).into_iter().next(),
        consequence_type: extract::str_any(feature, &["consequenceType"]).map(str::to_string),
        wild_type: extract::str_any(feature, &["wildType"]).map(str::to_string),
        alternative_sequence: extract::str_any(feature, &["alternativeSequence", "mutatedType"])
            .map(str::to_string),
        begin_position: extract::number_any(feature, &["begin"]).map(|v| v as i64),
        end_position: extract::number_any(feature, &["end"]).map(|v| v as i64),
        codon: extract::str_any(feature, &["codon"]).map(str::to_string),
        genomic_notation: extract::genomic_locations(feature).into_iter().next(),
        hgvs_notation: extract::protein_change(feature).map(str::to_string),
        population_frequencies: extract::population_frequencies(feature),
        raw_uniprot_data: Some(feature.clone()),
        ..Default::default()
    }
}

fn affected_drug_from_pharmgkb(drug: pharmgkb::PharmGkbDrug) -> AffectedDrug {
    let evidence_interpretation = drug
        .evidence_level
        .as_deref()
        .map(evidence::interpret_pharmgkb_level);
    AffectedDrug {
        recommendation: drug.recommendation,
        evidence_level: drug.evidence_level,
        evidence_interpretation,
        pharmgkb_annotation_id: drug.annotation_id,
        ..AffectedDrug::new(drug.name)
    }
}
