//! Variant–phenotype–drug linker with conflict detection (C7).
//!
//! Cross-maps patient conditions and medications with variant-derived
//! drugs, diseases and phenotypes using SNOMED CT codes plus normalised
//! names. Conflicts are detected first by exact (case-insensitive) name
//! match, then by SNOMED substance code for pairs the name match missed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entities::link::{
    Conflict, ConditionLink, ConflictCounts, DrugLink, LinkCounts, LinkType, LinkingResult,
    LinkingSummary, Links, MatchMethod, MedicationLink, PhenotypeLink, Severity, VariantRef,
    severity_for_recommendations,
};
use crate::entities::patient::{ClinicalInformation, Condition, Medication};
use crate::entities::variant::Variant;
use crate::error::PgxError;
use crate::phases::timestamp_now;
use crate::resolve::IdResolver;

/// Drugs grouped across variants by lower-cased name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantDrugGroup {
    pub name: String,
    pub variants: Vec<VariantRef>,
    pub recommendations: Vec<String>,
    pub evidence_levels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantPhenotype {
    pub text: String,
    pub gene: String,
    pub variant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allele: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantDisease {
    pub name: String,
    pub gene: String,
    pub variant_id: String,
    pub source: String,
}

pub struct VariantLinker {
    resolver: Arc<IdResolver>,
}

impl VariantLinker {
    pub fn new(resolver: Arc<IdResolver>) -> Self {
        Self { resolver }
    }

    /// Main entry: link a patient profile to the aggregated variants and
    /// detect drug–gene conflicts.
    pub async fn link(
        &self,
        profile: &Value,
        variants: &[Variant],
    ) -> Result<LinkingResult, PgxError> {
        let clinical = ClinicalInformation::from_profile(profile);

        let drug_groups = extract_variant_drugs(variants);
        let phenotypes = extract_variant_phenotypes(variants);
        let diseases = extract_variant_diseases(variants);

        let condition_codes = self.map_conditions(&clinical.current_conditions).await?;
        let medication_codes = self.map_medications(&clinical.current_medications).await?;
        let drug_codes = self.map_drug_groups(&drug_groups).await?;
        let disease_codes = self.map_diseases(&diseases).await?;

        let conflicts = detect_conflicts(
            &clinical.current_medications,
            &medication_codes,
            &drug_groups,
            &drug_codes,
        );

        let links = build_links(
            &clinical,
            &condition_codes,
            &medication_codes,
            &drug_groups,
            &drug_codes,
            &diseases,
            &disease_codes,
            &phenotypes,
            variants,
        );

        let summary = build_summary(&clinical, variants, &links, &conflicts);

        Ok(LinkingResult {
            links,
            conflicts,
            summary,
        })
    }

    async fn map_conditions(
        &self,
        conditions: &[Condition],
    ) -> Result<BTreeMap<String, String>, PgxError> {
        // label (lower) → SNOMED code
        let mut out = BTreeMap::new();
        for condition in conditions {
            let label = condition.display_label().to_string();
            if let Some(code) = condition.snomed_code.clone() {
                out.insert(label.to_lowercase(), code);
                continue;
            }
            if label.is_empty() {
                continue;
            }
            if let Some(concept) = self.resolver.resolve_snomed(&label).await? {
                out.insert(label.to_lowercase(), concept.code);
            }
        }
        Ok(out)
    }

    async fn map_medications(
        &self,
        medications: &[Medication],
    ) -> Result<BTreeMap<String, String>, PgxError> {
        let mut out = BTreeMap::new();
        for medication in medications {
            if medication.name.is_empty() {
                continue;
            }
            if let Some(code) = medication.snomed_code.clone() {
                out.insert(medication.name.to_lowercase(), code);
                continue;
            }
            if let Some(concept) = self.resolver.resolve_drug_snomed(&medication.name).await? {
                out.insert(medication.name.to_lowercase(), concept.code);
            }
        }
        Ok(out)
    }

    async fn map_drug_groups(
        &self,
        groups: &[VariantDrugGroup],
    ) -> Result<BTreeMap<String, String>, PgxError> {
        let mut out = BTreeMap::new();
        for group in groups {
            if let Some(concept) = self.resolver.resolve_drug_snomed(&group.name).await? {
                out.insert(group.name.to_lowercase(), concept.code);
            }
        }
        Ok(out)
    }

    async fn map_diseases(
        &self,
        diseases: &[VariantDisease],
    ) -> Result<BTreeMap<String, String>, PgxError> {
        let mut out = BTreeMap::new();
        for disease in diseases {
            let key = disease.name.to_lowercase();
            if out.contains_key(&key) {
                continue;
            }
            if let Some(concept) = self.resolver.resolve_snomed(&disease.name).await? {
                out.insert(key, concept.code);
            }
        }
        Ok(out)
    }
}

/// Groups every PharmGKB-asserted drug across variants by lower-cased
/// name, keeping per-variant recommendations and evidence levels.
pub fn extract_variant_drugs(variants: &[Variant]) -> Vec<VariantDrugGroup> {
    let mut groups: Vec<VariantDrugGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for variant in variants {
        for drug in variant.affected_drugs() {
            if drug.name.is_empty() {
                continue;
            }
            let key = drug.name.to_lowercase();
            let position = *index.entry(key).or_insert_with(|| {
                groups.push(VariantDrugGroup {
                    name: drug.name.clone(),
                    variants: Vec::new(),
                    recommendations: Vec::new(),
                    evidence_levels: Vec::new(),
                });
                groups.len() - 1
            });
            let group = &mut groups[position];
            group.variants.push(variant_ref(variant, Some(drug.recommendation.clone()), drug.evidence_level.clone()));
            if !drug.recommendation.is_empty() {
                group.recommendations.push(drug.recommendation.clone());
            }
            if let Some(level) = drug.evidence_level.clone() {
                group.evidence_levels.push(level);
            }
        }
    }
    groups
}

fn variant_ref(
    variant: &Variant,
    recommendation: Option<String>,
    evidence_level: Option<String>,
) -> VariantRef {
    VariantRef {
        gene: variant.gene_symbol.clone(),
        variant_id: variant.best_identifier().to_string(),
        rsid: variant.rsid.clone(),
        recommendation: recommendation.filter(|r| !r.is_empty()),
        evidence_level,
        clinical_significance: variant.clinical_significance.clone(),
    }
}

/// Phenotype records from PharmGKB (direct and annotation-level) and
/// ClinVar.
pub fn extract_variant_phenotypes(variants: &[Variant]) -> Vec<VariantPhenotype> {
    let mut out = Vec::new();
    for variant in variants {
        let variant_id = variant.best_identifier().to_string();
        if let Some(block) = variant.pharmgkb.as_ref() {
            for text in &block.phenotypes {
                out.push(VariantPhenotype {
                    text: text.clone(),
                    gene: variant.gene_symbol.clone(),
                    variant_id: variant_id.clone(),
                    allele: None,
                    source: "PharmGKB".to_string(),
                });
            }
            for annotation in &block.annotations {
                for allele_phenotype in &annotation.allele_phenotypes {
                    out.push(VariantPhenotype {
                        text: allele_phenotype.phenotype.clone(),
                        gene: variant.gene_symbol.clone(),
                        variant_id: variant_id.clone(),
                        allele: allele_phenotype.allele.clone(),
                        source: "PharmGKB Annotation".to_string(),
                    });
                }
            }
        }
        if let Some(clinvar) = variant.clinvar.as_ref() {
            for text in &clinvar.phenotypes {
                out.push(VariantPhenotype {
                    text: text.clone(),
                    gene: variant.gene_symbol.clone(),
                    variant_id: variant_id.clone(),
                    allele: None,
                    source: "ClinVar".to_string(),
                });
            }
        }
    }
    out
}

/// Diseases from Phase-3 associations plus PharmGKB annotation-level
/// related diseases, de-duplicated per gene.
pub fn extract_variant_diseases(variants: &[Variant]) -> Vec<VariantDisease> {
    let mut out = Vec::new();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();

    for variant in variants {
        let variant_id = variant.best_identifier().to_string();
        for association in &variant.disease_associations {
            let key = format!("{}:{}", variant.gene_symbol, association.name.to_lowercase());
            if seen.insert(key) {
                out.push(VariantDisease {
                    name: association.name.clone(),
                    gene: variant.gene_symbol.clone(),
                    variant_id: variant_id.clone(),
                    source: association.source.clone(),
                });
            }
        }
        if let Some(block) = variant.pharmgkb.as_ref() {
            for annotation in &block.annotations {
                for disease in &annotation.related_diseases {
                    let key = format!("{}:{}", variant.gene_symbol, disease.to_lowercase());
                    if seen.insert(key) {
                        out.push(VariantDisease {
                            name: disease.clone(),
                            gene: variant.gene_symbol.clone(),
                            variant_id: variant_id.clone(),
                            source: "PharmGKB".to_string(),
                        });
                    }
                }
            }
        }
    }
    out
}

fn conflict_from_group(
    medication: &Medication,
    group: &VariantDrugGroup,
    match_method: MatchMethod,
    snomed_code: Option<String>,
) -> Option<Conflict> {
    if group.variants.is_empty() {
        return None;
    }
    let severity: Severity = severity_for_recommendations(
        group
            .recommendations
            .iter()
            .map(String::as_str),
    );
    Some(Conflict {
        drug_name: group.name.clone(),
        patient_medication_ref: medication.name.clone(),
        severity,
        affecting_variants: group.variants.clone(),
        recommendation: group.recommendations.first().cloned().unwrap_or_default(),
        match_method,
        snomed_code,
        timestamp: timestamp_now(),
    })
}

/// Name matches first; SNOMED code matches cover pairs the names missed.
pub fn detect_conflicts(
    medications: &[Medication],
    medication_codes: &BTreeMap<String, String>,
    drug_groups: &[VariantDrugGroup],
    drug_codes: &BTreeMap<String, String>,
) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    let group_by_name: HashMap<String, &VariantDrugGroup> = drug_groups
        .iter()
        .map(|group| (group.name.to_lowercase(), group))
        .collect();

    for medication in medications {
        let med_key = medication.name.to_lowercase();
        if med_key.is_empty() {
            continue;
        }
        if let Some(group) = group_by_name.get(&med_key) {
            if let Some(conflict) =
                conflict_from_group(medication, group, MatchMethod::ExactName, None)
            {
                conflicts.push(conflict);
                continue;
            }
        }

        // SNOMED code match for this medication.
        let Some(med_code) = medication
            .snomed_code
            .clone()
            .or_else(|| medication_codes.get(&med_key).cloned())
        else {
            continue;
        };
        for group in drug_groups {
            let group_key = group.name.to_lowercase();
            if group_key == med_key {
                continue;
            }
            let Some(group_code) = drug_codes.get(&group_key) else {
                continue;
            };
            if *group_code != med_code {
                continue;
            }
            if let Some(conflict) = conflict_from_group(
                medication,
                group,
                MatchMethod::SnomedCtCode,
                Some(med_code.clone()),
            ) {
                conflicts.push(conflict);
            }
        }
    }

    conflicts
}

fn gene_metabolizer(variants: &[Variant], gene: &str) -> (Option<String>, Option<String>) {
    for variant in variants {
        if variant.gene_symbol == gene {
            if let Some(call) = variant.metabolizer_phenotype.as_ref() {
                return (Some(call.phenotype.clone()), Some(call.diplotype.clone()));
            }
        }
    }
    (None, None)
}

#[allow(clippy::too_many_arguments)]
fn build_links(
    clinical: &ClinicalInformation,
    condition_codes: &BTreeMap<String, String>,
    medication_codes: &BTreeMap<String, String>,
    drug_groups: &[VariantDrugGroup],
    drug_codes: &BTreeMap<String, String>,
    diseases: &[VariantDisease],
    disease_codes: &BTreeMap<String, String>,
    phenotypes: &[VariantPhenotype],
    variants: &[Variant],
) -> Links {
    let mut links = Links::default();

    let medications_by_name: HashMap<String, &Medication> = clinical
        .current_medications
        .iter()
        .map(|medication| (medication.name.to_lowercase(), medication))
        .collect();

    // PATIENT_MEDICATION_AFFECTED_BY_VARIANT, name matches first.
    let mut linked_medications: std::collections::HashSet<String> =
        std::collections::HashSet::new();
    for group in drug_groups {
        let group_key = group.name.to_lowercase();
        if let Some(medication) = medications_by_name.get(&group_key) {
            linked_medications.insert(group_key.clone());
            push_medication_links(
                &mut links,
                medication,
                group,
                variants,
                MatchMethod::ExactName,
                None,
            );
        }
    }

    // SNOMED code matches for medications not already linked by name.
    for (med_key, med_code) in medication_codes {
        if linked_medications.contains(med_key) {
            continue;
        }
        let Some(medication) = medications_by_name.get(med_key) else {
            continue;
        };
        for group in drug_groups {
            let group_key = group.name.to_lowercase();
            let Some(group_code) = drug_codes.get(&group_key) else {
                continue;
            };
            if group_code == med_code {
                push_medication_links(
                    &mut links,
                    medication,
                    group,
                    variants,
                    MatchMethod::SnomedCtCode,
                    Some(med_code.clone()),
                );
            }
        }
    }

    // CONDITION_MATCHES_VARIANT_DISEASE via shared SNOMED codes.
    for condition in &clinical.current_conditions {
        let label = condition.display_label().to_lowercase();
        let Some(condition_code) = condition
            .snomed_code
            .clone()
            .or_else(|| condition_codes.get(&label).cloned())
        else {
            continue;
        };
        for disease in diseases {
            let Some(disease_code) = disease_codes.get(&disease.name.to_lowercase()) else {
                continue;
            };
            if *disease_code == condition_code {
                links.condition_to_disease.push(ConditionLink {
                    patient_condition: condition.display_label().to_string(),
                    variant_disease: disease.name.clone(),
                    gene: Some(disease.gene.clone()),
                    snomed_code: condition_code.clone(),
                    link_type: LinkType::ConditionMatchesVariantDisease,
                });
            }
        }
    }

    // VARIANT_ASSOCIATED_WITH_PHENOTYPE.
    for phenotype in phenotypes {
        links.variant_to_phenotype.push(PhenotypeLink {
            variant_id: phenotype.variant_id.clone(),
            gene: Some(phenotype.gene.clone()),
            phenotype_text: phenotype.text.clone(),
            source: phenotype.source.clone(),
            link_type: LinkType::VariantAssociatedWithPhenotype,
        });
    }

    // DRUG_AFFECTED_BY_VARIANT, drug-centric.
    for group in drug_groups {
        let snomed_code = drug_codes.get(&group.name.to_lowercase()).cloned();
        for variant in &group.variants {
            links.drug_to_variant.push(DrugLink {
                drug_name: group.name.clone(),
                snomed_code: snomed_code.clone(),
                variant: variant.clone(),
                recommendations: group.recommendations.clone(),
                evidence_levels: group.evidence_levels.clone(),
                link_type: LinkType::DrugAffectedByVariant,
            });
        }
    }

    links
}

fn push_medication_links(
    links: &mut Links,
    medication: &Medication,
    group: &VariantDrugGroup,
    variants: &[Variant],
    match_method: MatchMethod,
    snomed_code: Option<String>,
) {
    for variant in &group.variants {
        let (phenotype, diplotype) = gene_metabolizer(variants, &variant.gene);
        links.medication_to_variant.push(MedicationLink {
            medication: medication.name.clone(),
            drugbank_id: medication.drugbank_id.clone(),
            gene: Some(variant.gene.clone()),
            diplotype,
            phenotype,
            clinical_significance: group.evidence_levels.first().cloned(),
            recommendation: group.recommendations.first().cloned(),
            variant: variant.clone(),
            drug_name: group.name.clone(),
            snomed_code: snomed_code.clone(),
            link_type: LinkType::PatientMedicationAffectedByVariant,
            match_method,
        });
    }
}

fn build_summary(
    clinical: &ClinicalInformation,
    variants: &[Variant],
    links: &Links,
    conflicts: &[Conflict],
) -> LinkingSummary {
    let critical = conflicts
        .iter()
        .filter(|c| c.severity == Severity::Critical)
        .count();
    let warnings = conflicts
        .iter()
        .filter(|c| c.severity == Severity::Warning)
        .count();

    LinkingSummary {
        total_links: LinkCounts {
            medication_to_variant: links.medication_to_variant.len(),
            condition_to_disease: links.condition_to_disease.len(),
            variant_to_phenotype: links.variant_to_phenotype.len(),
            drug_to_variant: links.drug_to_variant.len(),
        },
        conflicts: ConflictCounts {
            total: conflicts.len(),
            critical,
            warnings,
            info: conflicts.len() - critical - warnings,
        },
        patient_conditions: clinical.current_conditions.len(),
        patient_medications: clinical.current_medications.len(),
        total_variants: variants.len(),
        variants_with_drug_data: variants
            .iter()
            .filter(|variant| !variant.affected_drugs().is_empty())
            .count(),
        analysis_timestamp: timestamp_now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::entities::drug::AffectedDrug;
    use crate::entities::variant::{MetabolizerCall, PharmGkbBlock};
    use crate::sources::HttpContext;

    fn cyp2c19_variant() -> Variant {
        let mut drug = AffectedDrug::new("clopidogrel");
        drug.recommendation = "Avoid clopidogrel; consider alternative antiplatelet".into();
        drug.evidence_level = Some("1A".into());
        Variant {
            gene_symbol: "CYP2C19".into(),
            variant_id: "rs4244285".into(),
            rsid: Some("rs4244285".into()),
            clinical_significance: Some("Drug response".into()),
            metabolizer_phenotype: Some(MetabolizerCall {
                phenotype: "Poor Metabolizer".into(),
                diplotype: "*2/*2".into(),
                functionality: "Decreased/Decreased".into(),
                star_alleles: vec!["*2".into(), "*2".into()],
                source: "PharmGKB/CPIC".into(),
            }),
            pharmgkb: Some(PharmGkbBlock {
                drugs: vec![drug],
                phenotypes: vec!["Poor metabolizer phenotype".into()],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn profile_with_medication(name: &str) -> Value {
        json!({
            "clinical_information": {
                "current_medications": [{"name": name, "rxnorm_cui": "32968"}]
            }
        })
    }

    async fn linker_with_empty_snomed(server: &MockServer) -> VariantLinker {
        Mock::given(method("GET"))
            .and(path("/snomed_ct/v3/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([0, [], null, []])))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rxcui.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"idGroup": {}})))
            .mount(server)
            .await;
        unsafe {
            std::env::set_var("PGXKG_UNIPROT_BASE", server.uri());
            std::env::set_var("PGXKG_EBI_VARIATION_BASE", server.uri());
            std::env::set_var("PGXKG_BIOPORTAL_BASE", server.uri());
            std::env::set_var("PGXKG_CLINICAL_TABLES_BASE", server.uri());
            std::env::set_var("PGXKG_RXNAV_BASE", server.uri());
        }
        let http = HttpContext::new().unwrap();
        VariantLinker::new(Arc::new(IdResolver::new(&http, None).await.unwrap()))
    }

    #[tokio::test]
    async fn clopidogrel_name_match_is_a_critical_conflict() {
        let _guard = crate::sources::test_env::ENV_LOCK.lock().await;
        let server = MockServer::start().await;
        let linker = linker_with_empty_snomed(&server).await;

        let profile = profile_with_medication("Clopidogrel");
        let variants = vec![cyp2c19_variant()];
        let result = linker.link(&profile, &variants).await.unwrap();

        assert_eq!(result.conflicts.len(), 1);
        let conflict = &result.conflicts[0];
        assert_eq!(conflict.drug_name, "clopidogrel");
        assert_eq!(conflict.patient_medication_ref, "Clopidogrel");
        assert_eq!(conflict.severity, Severity::Critical);
        assert_eq!(conflict.match_method, MatchMethod::ExactName);
        assert_eq!(conflict.affecting_variants.len(), 1);
        assert_eq!(conflict.affecting_variants[0].gene, "CYP2C19");
        assert_eq!(
            conflict.affecting_variants[0].rsid.as_deref(),
            Some("rs4244285")
        );

        // The medication link carries the metabolizer context.
        assert_eq!(result.links.medication_to_variant.len(), 1);
        let link = &result.links.medication_to_variant[0];
        assert_eq!(link.phenotype.as_deref(), Some("Poor Metabolizer"));
        assert_eq!(link.diplotype.as_deref(), Some("*2/*2"));
        assert_eq!(link.match_method, MatchMethod::ExactName);
        assert_eq!(result.summary.conflicts.critical, 1);
    }

    #[tokio::test]
    async fn snomed_code_match_without_name_match() {
        let _guard = crate::sources::test_env::ENV_LOCK.lock().await;
        let server = MockServer::start().await;
        // Both "Plavix" and "clopidogrel" resolve to the same substance.
        Mock::given(method("GET"))
            .and(path("/snomed_ct/v3/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                1, ["387253001"], null, [["387253001", "Clopidogrel (substance)"]]
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rxcui.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"idGroup": {}})))
            .mount(&server)
            .await;
        unsafe {
            std::env::set_var("PGXKG_BIOPORTAL_BASE", server.uri());
            std::env::set_var("PGXKG_CLINICAL_TABLES_BASE", server.uri());
            std::env::set_var("PGXKG_RXNAV_BASE", server.uri());
        }
        let http = HttpContext::new().unwrap();
        let linker = VariantLinker::new(Arc::new(IdResolver::new(&http, None).await.unwrap()));

        let profile = profile_with_medication("Plavix");
        let variants = vec![cyp2c19_variant()];
        let result = linker.link(&profile, &variants).await.unwrap();

        assert_eq!(result.conflicts.len(), 1);
        let conflict = &result.conflicts[0];
        assert_eq!(conflict.match_method, MatchMethod::SnomedCtCode);
        assert_eq!(conflict.snomed_code.as_deref(), Some("387253001"));
        assert_eq!(conflict.patient_medication_ref, "Plavix");
    }

    #[tokio::test]
    async fn no_medications_means_no_conflicts_or_medication_links() {
        let _guard = crate::sources::test_env::ENV_LOCK.lock().await;
        let server = MockServer::start().await;
        let linker = linker_with_empty_snomed(&server).await;

        let result = linker
            .link(&json!({}), &[cyp2c19_variant()])
            .await
            .unwrap();
        assert!(result.conflicts.is_empty());
        assert!(result.links.medication_to_variant.is_empty());
        // Drug-centric and phenotype links still exist.
        assert_eq!(result.links.drug_to_variant.len(), 1);
        assert!(!result.links.variant_to_phenotype.is_empty());
        assert_eq!(result.summary.variants_with_drug_data, 1);
    }

    #[test]
    fn drug_groups_merge_across_variants_by_lowercased_name() {
        let mut second = cyp2c19_variant();
        second.variant_id = "rs12248560".into();
        second.rsid = Some("rs12248560".into());
        if let Some(block) = second.pharmgkb.as_mut() {
            block.drugs[0].name = "Clopidogrel".into();
            block.drugs[0].recommendation = "Reduced efficacy possible".into();
        }

        let groups = extract_variant_drugs(&[cyp2c19_variant(), second]);
        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.variants.len(), 2);
        assert_eq!(group.recommendations.len(), 2);
        assert_eq!(group.evidence_levels, vec!["1A", "1A"]);
    }

    #[test]
    fn phenotype_extraction_covers_pharmgkb_and_clinvar() {
        let mut variant = cyp2c19_variant();
        variant.clinvar = Some(crate::sources::clinvar::ClinVarRecord {
            clinvar_id: "VCV1".into(),
            clinical_significance: None,
            review_status: "practice guideline".into(),
            star_rating: 4,
            phenotypes: vec!["Clopidogrel response".into()],
        });
        let phenotypes = extract_variant_phenotypes(&[variant]);
        assert!(phenotypes.iter().any(|p| p.source == "PharmGKB"));
        assert!(phenotypes.iter().any(|p| p.source == "ClinVar"));
    }

    #[test]
    fn conflict_detection_requires_affecting_variants() {
        let medication = Medication {
            name: "clopidogrel".into(),
            ..Default::default()
        };
        let empty_group = VariantDrugGroup {
            name: "clopidogrel".into(),
            variants: Vec::new(),
            recommendations: Vec::new(),
            evidence_levels: Vec::new(),
        };
        let conflicts = detect_conflicts(
            &[medication],
            &BTreeMap::new(),
            &[empty_group],
            &BTreeMap::new(),
        );
        assert!(conflicts.is_empty());
    }
}
