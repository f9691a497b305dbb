//! Phase 3 — drug/disease enrichment and literature.
//!
//! Per variant: ChEMBL compound data for each affected drug, OpenFDA
//! label mining, Europe PMC literature hydration, identifier mapping
//! (RxNorm, SNOMED substance codes), SNOMED clinical-finding mapping,
//! disease extraction, and evidence grading. Every sub-record failure
//! degrades with a warning event; the phase carries on.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::entities::drug::AdverseReactionSnomed;
use crate::entities::publication::Publication;
use crate::entities::variant::{DiseaseAssociation, PhenotypeMapping, Variant, VariantLiterature};
use crate::error::PgxError;
use crate::events::{EventBus, stage};
use crate::evidence;
use crate::extract;
use crate::phases::clinical::ClinicalOutput;
use crate::resolve::IdResolver;
use crate::sources::bioportal;
use crate::sources::chembl::ChemblClient;
use crate::sources::europepmc::EuropePmcClient;
use crate::sources::openfda::OpenFdaClient;

const VARIANT_SEARCH_RESULTS: usize = 3;
const DRUG_SEARCH_RESULTS: usize = 2;
const MAX_DRUG_SEARCHES: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct EnrichmentFeatures {
    pub chembl: bool,
    pub openfda: bool,
    pub europepmc: bool,
}

pub struct DrugDiseaseEnricher {
    resolver: Arc<IdResolver>,
    chembl: Arc<ChemblClient>,
    openfda: Arc<OpenFdaClient>,
    europepmc: Arc<EuropePmcClient>,
    features: EnrichmentFeatures,
    events: EventBus,
    output_dir: PathBuf,
}

impl DrugDiseaseEnricher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resolver: Arc<IdResolver>,
        chembl: Arc<ChemblClient>,
        openfda: Arc<OpenFdaClient>,
        europepmc: Arc<EuropePmcClient>,
        features: EnrichmentFeatures,
        events: EventBus,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            resolver,
            chembl,
            openfda,
            europepmc,
            features,
            events,
            output_dir,
        }
    }

    pub async fn run(&self, clinical: &ClinicalOutput) -> Result<ClinicalOutput, PgxError> {
        let gene = clinical.gene_symbol.as_str();
        let mut output = clinical.clone();

        for variant in output.variants.iter_mut() {
            self.enrich_drugs(variant).await?;
            self.enrich_literature(gene, variant).await?;
            self.map_snomed(gene, variant).await?;
            grade_evidence(variant);
        }

        let path = self.output_dir.join(format!("{gene}_enriched.json"));
        super::write_json(&path, &output).await?;
        Ok(output)
    }

    async fn enrich_drugs(&self, variant: &mut Variant) -> Result<(), PgxError> {
        let Some(block) = variant.pharmgkb.as_mut() else {
            return Ok(());
        };

        for drug in block.drugs.iter_mut() {
            if self.features.chembl {
                match self.chembl.enrich_drug(&drug.name).await {
                    Ok(Some(enrichment)) => {
                        drug.chembl_id = Some(enrichment.chembl_id.clone());
                        drug.chembl_data = Some(enrichment);
                    }
                    Ok(None) => debug!(drug = %drug.name, "No ChEMBL molecule"),
                    Err(err) if err.is_cancelled() => return Err(err),
                    Err(err) => {
                        self.events.warn(
                            stage::ANNOTATION,
                            stage::DRUG_DISEASE_CONTEXT,
                            format!("ChEMBL enrichment failed for {}: {err}", drug.name),
                        );
                    }
                }
            }

            if self.features.openfda {
                match self.openfda.fetch_label(&drug.name).await {
                    Ok(Some(label)) => {
                        let mut mapped = Vec::new();
                        for reaction in &label.mentioned_reactions {
                            let snomed = self.resolver.resolve_snomed(reaction).await?;
                            mapped.push(AdverseReactionSnomed {
                                reaction: reaction.clone(),
                                snomed,
                            });
                        }
                        drug.adverse_reactions_snomed = mapped;
                        drug.fda_label = Some(label);
                    }
                    Ok(None) => {}
                    Err(err) if err.is_cancelled() => return Err(err),
                    Err(err) => {
                        self.events.warn(
                            stage::ANNOTATION,
                            stage::DRUG_DISEASE_CONTEXT,
                            format!("OpenFDA label unavailable for {}: {err}", drug.name),
                        );
                    }
                }
            }

            // Identifier mapping: RxNorm CUI and SNOMED substance code.
            if let Some(concept) = self.resolver.resolve_rxnorm(&drug.name).await? {
                drug.rxnorm_cui = Some(concept.cui.clone());
                drug.rxnorm = Some(concept);
            }
            if let Some(concept) = self.resolver.resolve_drug_snomed(&drug.name).await? {
                drug.snomed_code = Some(concept.code.clone());
            }
        }

        Ok(())
    }

    async fn enrich_literature(&self, gene: &str, variant: &mut Variant) -> Result<(), PgxError> {
        if !self.features.europepmc {
            return Ok(());
        }

        let mut literature = VariantLiterature::default();
        let mut seen_pmids: std::collections::HashSet<String> = std::collections::HashSet::new();

        // PubMed ids embedded in the UniProt evidences, hydrated one by
        // one. A failed hydration keeps the PMID with a placeholder.
        let pmids = variant
            .raw_uniprot_data
            .as_ref()
            .map(extract::evidence_pubmed_ids)
            .unwrap_or_default();
        for pmid in pmids {
            if !seen_pmids.insert(pmid.clone()) {
                continue;
            }
            let mut publication = match self.europepmc.hydrate_pmid(&pmid).await {
                Ok(Some(publication)) => publication,
                Ok(None) => Publication::uniprot_fallback(&pmid),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    self.events.warn(
                        stage::ANNOTATION,
                        stage::DRUG_DISEASE_CONTEXT,
                        format!("Europe PMC hydration failed for PMID {pmid}: {err}"),
                    );
                    Publication::uniprot_fallback(&pmid)
                }
            };
            publication.source = Some("UniProt".to_string());
            literature.gene_publications.push(publication);
        }

        // Variant-specific search.
        let identifiers = variant_identifiers(variant);
        if !identifiers.is_empty() {
            match self
                .europepmc
                .search_variant_literature(gene, &identifiers, VARIANT_SEARCH_RESULTS)
                .await
            {
                Ok(publications) => {
                    for publication in publications {
                        if let Some(pmid) = publication.pmid.clone() {
                            if !seen_pmids.insert(pmid) {
                                continue;
                            }
                        }
                        literature.variant_publications.push(publication);
                    }
                }
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    self.events.warn(
                        stage::ANNOTATION,
                        stage::DRUG_DISEASE_CONTEXT,
                        format!("Variant literature search failed for {gene}: {err}"),
                    );
                }
            }
        }

        // Drug-specific searches, bounded to the first few drugs.
        let drug_names: Vec<String> = variant
            .affected_drugs()
            .iter()
            .take(MAX_DRUG_SEARCHES)
            .map(|drug| drug.name.clone())
            .collect();
        if let Some(identifier) = identifiers.first() {
            for drug_name in drug_names {
                match self
                    .europepmc
                    .search_variant_drug_literature(gene, identifier, &drug_name, DRUG_SEARCH_RESULTS)
                    .await
                {
                    Ok(publications) => {
                        let fresh: Vec<Publication> = publications
                            .into_iter()
                            .filter(|publication| match publication.pmid.clone() {
                                Some(pmid) => seen_pmids.insert(pmid),
                                None => true,
                            })
                            .collect();
                        if !fresh.is_empty() {
                            literature
                                .drug_publications
                                .insert(drug_name.to_lowercase(), fresh);
                        }
                    }
                    Err(err) if err.is_cancelled() => return Err(err),
                    Err(err) => {
                        self.events.warn(
                            stage::ANNOTATION,
                            stage::DRUG_DISEASE_CONTEXT,
                            format!("Drug literature search failed for {drug_name}: {err}"),
                        );
                    }
                }
            }
        }

        variant.literature = Some(literature);
        Ok(())
    }

    async fn map_snomed(&self, gene: &str, variant: &mut Variant) -> Result<(), PgxError> {
        let mut associations: Vec<DiseaseAssociation> = Vec::new();
        let mut phenotype_mappings: Vec<PhenotypeMapping> = Vec::new();

        let clinvar_phenotypes: Vec<String> = variant
            .clinvar
            .as_ref()
            .map(|record| record.phenotypes.clone())
            .unwrap_or_default();
        let pharmgkb_phenotypes: Vec<String> = variant
            .pharmgkb
            .as_ref()
            .map(|block| block.phenotypes.clone())
            .unwrap_or_default();
        let drug_names: Vec<String> = variant
            .affected_drugs()
            .iter()
            .map(|drug| drug.name.clone())
            .collect();

        // ClinVar phenotypes are usually disease names already.
        for phenotype in &clinvar_phenotypes {
            if phenotype.trim().len() <= 3 {
                continue;
            }
            let snomed = self.resolver.resolve_snomed(phenotype).await?;
            associations.push(DiseaseAssociation {
                name: phenotype.clone(),
                source: "clinvar_phenotype".to_string(),
                snomed,
                original_phenotype: None,
            });

            let drug = extract_drug_from_phenotype(phenotype, &drug_names);
            if let Some(finding) = self
                .resolver
                .map_phenotype(phenotype, Some(gene), drug.as_deref())
                .await?
            {
                phenotype_mappings.push(PhenotypeMapping {
                    phenotype_text: phenotype.clone(),
                    clinical_finding: finding,
                });
            }
        }

        // PharmGKB phenotype prose goes through the pattern library.
        for phenotype in &pharmgkb_phenotypes {
            for disease in bioportal::extract_pharmgkb_diseases(phenotype) {
                if associations
                    .iter()
                    .any(|assoc| assoc.name.eq_ignore_ascii_case(&disease))
                {
                    continue;
                }
                let snomed = self.resolver.resolve_snomed(&disease).await?;
                associations.push(DiseaseAssociation {
                    name: disease,
                    source: "pharmgkb_phenotype".to_string(),
                    snomed,
                    original_phenotype: Some(truncate(phenotype, 100)),
                });
            }

            let drug = extract_drug_from_phenotype(phenotype, &drug_names);
            if let Some(finding) = self
                .resolver
                .map_phenotype(phenotype, Some(gene), drug.as_deref())
                .await?
            {
                phenotype_mappings.push(PhenotypeMapping {
                    phenotype_text: phenotype.clone(),
                    clinical_finding: finding,
                });
            }
        }

        variant.disease_associations = associations;
        variant.phenotypes_snomed = phenotype_mappings;
        Ok(())
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Identifiers worth searching literature for: rsID, protein change,
/// simplified genomic change.
pub fn variant_identifiers(variant: &Variant) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(rsid) = variant.rsid.as_deref() {
        out.push(rsid.to_string());
    }
    if let Some(change) = variant.hgvs_notation.as_deref() {
        out.push(change.to_string());
    }
    if let Some(genomic) = variant.genomic_notation.as_deref() {
        if let Some((_, tail)) = genomic.split_once(':') {
            let simplified = tail.strip_prefix("g.").unwrap_or(tail);
            if !simplified.is_empty() {
                out.push(simplified.to_string());
            }
        }
    }
    out.truncate(3);
    out
}

static DRUG_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

/// Finds the drug a phenotype sentence talks about: first by whole-word
/// match against the variant's own drug list (longest name first), then
/// by prose patterns like "treated with X" or "X therapy".
pub fn extract_drug_from_phenotype(phenotype: &str, drug_names: &[String]) -> Option<String> {
    let lower = phenotype.to_lowercase();
    let mut sorted: Vec<&String> = drug_names.iter().collect();
    sorted.sort_by_key(|name| std::cmp::Reverse(name.len()));
    for name in sorted {
        let name_lower = name.to_lowercase();
        if name_lower.is_empty() {
            continue;
        }
        let pattern = format!(r"\b{}\b", regex::escape(&name_lower));
        if Regex::new(&pattern).is_ok_and(|re| re.is_match(&lower)) {
            return Some(name.clone());
        }
    }

    let patterns = DRUG_PATTERNS.get_or_init(|| {
        [
            r"(?i)treated with ([A-Z][a-z]+(?:\s+[a-z]+)?)",
            r"(?i)([A-Z][a-z]+(?:\s+[a-z]+)?)\s+clearance",
            r"(?i)response to\s+([A-Z][a-z]+(?:\s+[a-z]+)?)",
            r"(?i)metabolism of\s+([A-Z][a-z]+(?:\s+[a-z]+)?)",
            r"(?i)concentrations of\s+([A-Z][a-z]+(?:\s+[a-z]+)?)",
            r"(?i)([A-Z][a-z]+(?:\s+[a-z]+)?)\s+therapy",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("drug pattern"))
        .collect()
    });
    const STOP_WORDS: &[&str] = &["patients", "may", "have", "the", "this", "that"];
    for pattern in patterns {
        if let Some(captures) = pattern.captures(phenotype) {
            let candidate = captures.get(1)?.as_str().trim();
            if !STOP_WORDS.contains(&candidate.to_lowercase().as_str()) {
                return Some(candidate.to_string());
            }
        }
    }
    None
}

/// Evidence grading: per-drug PharmGKB interpretations already exist;
/// this attaches the combined confidence across PharmGKB, ClinVar and
/// (when derivable) CPIC sources.
pub fn grade_evidence(variant: &mut Variant) {
    let pharmgkb_level = variant
        .affected_drugs()
        .iter()
        .filter_map(|drug| drug.evidence_level.clone())
        .next();
    let clinvar_stars = variant.clinvar.as_ref().map(|record| record.star_rating);
    if pharmgkb_level.is_none() && clinvar_stars.is_none() {
        return;
    }
    variant.evidence_confidence = Some(evidence::overall_confidence(
        pharmgkb_level.as_deref(),
        clinvar_stars,
        None,
    ));
}
