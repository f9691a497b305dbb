//! Pipeline orchestrator (C5).
//!
//! Fans a bounded worker pool out over genes, drives each gene through
//! phases P1–P5, aggregates the results in completion order, then runs
//! the linker and the assembler. Workers share nothing per gene; the
//! rate limiter is the primary backpressure, the pool the secondary one.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::assemble::{Assembler, stable_profile_id};
use crate::config::Config;
use crate::entities::variant::Variant;
use crate::error::PgxError;
use crate::events::{EventBus, stage};
use crate::linker::VariantLinker;
use crate::phases::clinical::{ClinicalOutput, ClinicalValidator};
use crate::phases::discovery::VariantDiscoverer;
use crate::phases::enrichment::{DrugDiseaseEnricher, EnrichmentFeatures};
use crate::phases::export::JsonLdExporter;
use crate::phases::graph;
use crate::resolve::IdResolver;
use crate::sources::HttpContext;
use crate::sources::chembl::ChemblClient;
use crate::sources::clinvar::ClinVarClient;
use crate::sources::europepmc::EuropePmcClient;
use crate::sources::openfda::OpenFdaClient;
use crate::sources::pharmgkb::PharmGkbClient;

const MAX_WORKERS: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneRunResult {
    pub success: bool,
    pub gene: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protein_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<Variant>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub drugs: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub diseases: BTreeSet<String>,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsonld_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiGeneOutcome {
    pub success: bool,
    pub patient_id: String,
    pub genes: Vec<String>,
    pub total_variants: usize,
    pub affected_drugs: usize,
    pub associated_diseases: usize,
    pub duration_secs: f64,
    pub gene_results: BTreeMap<String, GeneRunResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comprehensive_profile: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Pipeline {
    events: EventBus,
    cancel: CancellationToken,
    resolver: Arc<IdResolver>,
    discoverer: Arc<VariantDiscoverer>,
    validator: Arc<ClinicalValidator>,
    enricher: Arc<DrugDiseaseEnricher>,
    exporter: Arc<JsonLdExporter>,
    linker: VariantLinker,
    assembler: Assembler,
}

impl Pipeline {
    pub async fn new(config: Config) -> Result<Self, PgxError> {
        let cancel = CancellationToken::new();
        let events = EventBus::new();
        let http = HttpContext::with_cancel(cancel.clone())?;

        let resolver = Arc::new(
            IdResolver::new(&http, config.bioportal_api_key.clone()).await?,
        );
        let clinvar = Arc::new(
            ClinVarClient::new(&http, config.ncbi_api_key.clone(), config.ncbi_email.clone())
                .await?,
        );
        let pharmgkb = Arc::new(PharmGkbClient::new(&http).await?);
        let chembl = Arc::new(ChemblClient::new(&http).await?);
        let openfda = Arc::new(OpenFdaClient::new(&http).await?);
        let europepmc = Arc::new(EuropePmcClient::new(&http).await?);

        let discoverer = Arc::new(VariantDiscoverer::new(
            resolver.clone(),
            config.phase_dir(1),
        ));
        let validator = Arc::new(ClinicalValidator::new(
            clinvar,
            pharmgkb,
            events.clone(),
            config.phase_dir(2),
        ));
        let enricher = Arc::new(DrugDiseaseEnricher::new(
            resolver.clone(),
            chembl,
            openfda,
            europepmc,
            EnrichmentFeatures {
                chembl: config.enable_chembl,
                openfda: config.enable_openfda,
                europepmc: config.enable_europepmc,
            },
            events.clone(),
            config.phase_dir(3),
        ));
        let exporter = Arc::new(JsonLdExporter::new(config.output_dir.join("json")));
        let linker = VariantLinker::new(resolver.clone());
        let assembler = Assembler::new(resolver.clone(), config.output_dir.clone());

        Ok(Self {
            events,
            cancel,
            resolver,
            discoverer,
            validator,
            enricher,
            exporter,
            linker,
            assembler,
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn resolver(&self) -> Arc<IdResolver> {
        self.resolver.clone()
    }

    /// Drives one gene through P1–P5. Phase-level failures are terminal
    /// for the gene, never for the whole run.
    pub async fn run_gene(&self, gene_symbol: &str, protein_id: Option<&str>) -> GeneRunResult {
        run_gene_task(
            gene_symbol.trim().to_string(),
            protein_id.map(str::to_string),
            self.discoverer.clone(),
            self.validator.clone(),
            self.enricher.clone(),
            self.exporter.clone(),
            self.events.clone(),
            self.cancel.clone(),
        )
        .await
    }

    /// Single-gene entry point: one gene, then linking and assembly.
    pub async fn run(
        &self,
        gene_symbol: &str,
        protein_id: Option<&str>,
        patient_profile: Option<&Value>,
    ) -> MultiGeneOutcome {
        self.events.info(
            stage::LAB_PREP,
            stage::SINGLE_GENE,
            format!("Starting analysis for {gene_symbol}..."),
            0.0,
        );
        self.run_multi_inner(&[gene_symbol.to_string()], protein_id, patient_profile)
            .await
    }

    /// Multi-gene fan-out/fan-in.
    pub async fn run_multi(
        &self,
        gene_symbols: &[String],
        patient_profile: Option<&Value>,
    ) -> MultiGeneOutcome {
        self.events.info(
            stage::LAB_PREP,
            stage::INIT,
            format!(
                "Starting multi-gene analysis for {} genes...",
                gene_symbols.len()
            ),
            0.0,
        );
        self.run_multi_inner(gene_symbols, None, patient_profile).await
    }

    async fn run_multi_inner(
        &self,
        gene_symbols: &[String],
        protein_id: Option<&str>,
        patient_profile: Option<&Value>,
    ) -> MultiGeneOutcome {
        let started = std::time::Instant::now();
        let patient_id = determine_patient_id(patient_profile);
        let genes: Vec<String> = gene_symbols
            .iter()
            .map(|gene| gene.trim().to_string())
            .filter(|gene| !gene.is_empty())
            .collect();

        let worker_count = worker_pool_size(genes.len());
        if worker_count > 0 {
            info!(
                genes = genes.len(),
                workers = worker_count,
                "Running gene pipelines in parallel"
            );
        }

        let mut gene_results: BTreeMap<String, GeneRunResult> = BTreeMap::new();
        let mut all_variants: Vec<Variant> = Vec::new();
        let mut all_drugs: BTreeSet<String> = BTreeSet::new();
        let mut all_diseases: BTreeSet<String> = BTreeSet::new();

        if !genes.is_empty() {
            let semaphore = Arc::new(Semaphore::new(worker_count));
            let mut tasks: JoinSet<GeneRunResult> = JoinSet::new();

            for gene in genes.clone() {
                let semaphore = semaphore.clone();
                let discoverer = self.discoverer.clone();
                let validator = self.validator.clone();
                let enricher = self.enricher.clone();
                let exporter = self.exporter.clone();
                let events = self.events.clone();
                let cancel = self.cancel.clone();
                let protein_override = if genes.len() == 1 {
                    protein_id.map(str::to_string)
                } else {
                    None
                };

                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    run_gene_task(
                        gene,
                        protein_override,
                        discoverer,
                        validator,
                        enricher,
                        exporter,
                        events,
                        cancel,
                    )
                    .await
                });
            }

            // Aggregation happens in completion order, not submission
            // order.
            let mut completed = 0usize;
            while let Some(joined) = tasks.join_next().await {
                let result = match joined {
                    Ok(result) => result,
                    Err(err) => {
                        warn!("Gene worker panicked: {err}");
                        continue;
                    }
                };
                completed += 1;
                let progress = 0.1 + 0.6 * completed as f64 / genes.len() as f64;
                let event_stage = if completed * 2 <= genes.len() {
                    stage::NGS
                } else {
                    stage::ANNOTATION
                };
                self.events.info(
                    event_stage,
                    stage::PROCESSING,
                    format!(
                        "Completed gene {} ({completed}/{})",
                        result.gene,
                        genes.len()
                    ),
                    progress,
                );

                if result.success {
                    all_variants.extend(result.variants.iter().cloned());
                    all_drugs.extend(result.drugs.iter().cloned());
                    all_diseases.extend(result.diseases.iter().cloned());
                } else {
                    warn!(
                        gene = %result.gene,
                        "Gene pipeline failed: {}",
                        result.error.as_deref().unwrap_or("unknown error")
                    );
                }
                gene_results.insert(result.gene.clone(), result);
            }
        }

        if self.cancel.is_cancelled() {
            self.events.error(
                stage::ERROR,
                stage::PIPELINE,
                "Multi-gene pipeline cancelled",
            );
            return MultiGeneOutcome {
                success: false,
                patient_id,
                genes,
                total_variants: all_variants.len(),
                affected_drugs: all_drugs.len(),
                associated_diseases: all_diseases.len(),
                duration_secs: started.elapsed().as_secs_f64(),
                gene_results,
                comprehensive_profile: None,
                outputs: BTreeMap::new(),
                error: Some("cancelled".to_string()),
            };
        }

        // Fan-in: profile generation, linking, assembly.
        self.events.info(
            stage::ENRICHMENT,
            stage::PROFILE_GENERATION,
            "Creating comprehensive patient profile...",
            0.75,
        );

        let empty_profile = serde_json::json!({});
        let profile_for_linking = patient_profile.unwrap_or(&empty_profile);

        self.events.info(
            stage::ENRICHMENT,
            stage::VARIANT_LINKING,
            "Linking patient profile to variants...",
            0.85,
        );
        let linking = match self.linker.link(profile_for_linking, &all_variants).await {
            Ok(linking) => linking,
            Err(err) => {
                return self.fail(
                    started.elapsed().as_secs_f64(),
                    patient_id,
                    genes,
                    gene_results,
                    err,
                );
            }
        };

        self.events.info(
            stage::REPORT,
            stage::EXPORT,
            "Generating all output formats...",
            0.95,
        );
        let assembled = self
            .assembler
            .assemble(
                &patient_id,
                &genes,
                all_variants.clone(),
                &all_drugs,
                &all_diseases,
                &linking,
                patient_profile,
            )
            .await;
        let (document, output_paths) = match assembled {
            Ok(out) => out,
            Err(err) => {
                return self.fail(
                    started.elapsed().as_secs_f64(),
                    patient_id,
                    genes,
                    gene_results,
                    err,
                );
            }
        };

        let mut outputs = BTreeMap::new();
        outputs.insert(
            "comprehensive_jsonld".to_string(),
            output_paths.comprehensive_jsonld.display().to_string(),
        );
        outputs.insert(
            "summary_json".to_string(),
            output_paths.summary_json.display().to_string(),
        );
        outputs.insert(
            "drug_matrix_json".to_string(),
            output_paths.drug_matrix_json.display().to_string(),
        );
        outputs.insert(
            "conflicts_json".to_string(),
            output_paths.conflicts_json.display().to_string(),
        );

        self.events.info(
            stage::REPORT,
            stage::COMPLETE,
            "Analysis complete!",
            1.0,
        );

        MultiGeneOutcome {
            success: true,
            patient_id,
            genes,
            total_variants: all_variants.len(),
            affected_drugs: all_drugs.len(),
            associated_diseases: all_diseases.len(),
            duration_secs: started.elapsed().as_secs_f64(),
            gene_results,
            comprehensive_profile: Some(document),
            outputs,
            error: None,
        }
    }

    fn fail(
        &self,
        duration_secs: f64,
        patient_id: String,
        genes: Vec<String>,
        gene_results: BTreeMap<String, GeneRunResult>,
        err: PgxError,
    ) -> MultiGeneOutcome {
        let message = if err.is_cancelled() {
            "cancelled".to_string()
        } else {
            err.to_string()
        };
        self.events.error(
            stage::ERROR,
            stage::PIPELINE,
            format!("Multi-gene pipeline error: {message}"),
        );
        MultiGeneOutcome {
            success: false,
            patient_id,
            genes,
            total_variants: 0,
            affected_drugs: 0,
            associated_diseases: 0,
            duration_secs,
            gene_results,
            comprehensive_profile: None,
            outputs: BTreeMap::new(),
            error: Some(message),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_gene_task(
    gene: String,
    protein_id: Option<String>,
    discoverer: Arc<VariantDiscoverer>,
    validator: Arc<ClinicalValidator>,
    enricher: Arc<DrugDiseaseEnricher>,
    exporter: Arc<JsonLdExporter>,
    events: EventBus,
    cancel: CancellationToken,
) -> GeneRunResult {
    let started = std::time::Instant::now();
    let outcome: Result<(ClinicalOutput, String), PgxError> = async {
        if cancel.is_cancelled() {
            return Err(PgxError::Cancelled);
        }
        events.info(
            stage::LAB_PREP,
            stage::VARIANT_DISCOVERY,
            format!("Discovering variants for {gene}..."),
            0.1,
        );
        let discovery = discoverer.run(&gene, protein_id.as_deref()).await?;

        if cancel.is_cancelled() {
            return Err(PgxError::Cancelled);
        }
        events.info(
            stage::NGS,
            stage::CLINICAL_VALIDATION,
            format!("Validating clinical significance for {gene}..."),
            0.3,
        );
        let clinical = validator.run(&discovery).await?;

        if cancel.is_cancelled() {
            return Err(PgxError::Cancelled);
        }
        events.info(
            stage::ANNOTATION,
            stage::DRUG_DISEASE_CONTEXT,
            format!("Adding drug and disease context for {gene}..."),
            0.5,
        );
        let enriched = enricher.run(&clinical).await?;

        events.info(
            stage::ENRICHMENT,
            stage::RDF_ASSEMBLY,
            format!("Assembling knowledge graph for {gene}..."),
            0.7,
        );
        let knowledge_graph = graph::build_graph(&gene, &enriched.protein_id, &enriched.variants);

        events.info(
            stage::REPORT,
            stage::EXPORT,
            format!("Exporting JSON-LD for {gene}..."),
            0.9,
        );
        let (jsonld_path, _) = exporter
            .run(
                &gene,
                &enriched.protein_id,
                &enriched.variants,
                enriched.metabolizer_phenotype.as_ref(),
                &knowledge_graph,
            )
            .await?;
        Ok((enriched, jsonld_path.display().to_string()))
    }
    .await;

    match outcome {
        Ok((clinical, jsonld_output)) => {
            let (drugs, diseases) = extract_drugs_diseases(&clinical);
            GeneRunResult {
                success: true,
                gene,
                protein_id: Some(clinical.protein_id.clone()),
                variants: clinical.variants,
                drugs,
                diseases,
                duration_secs: started.elapsed().as_secs_f64(),
                jsonld_output: Some(jsonld_output),
                error: None,
            }
        }
        Err(err) => {
            if !err.is_cancelled() {
                events.error(
                    stage::ERROR,
                    stage::PIPELINE,
                    format!("Pipeline error for {gene}: {err}"),
                );
            }
            GeneRunResult {
                success: false,
                gene,
                protein_id,
                variants: Vec::new(),
                drugs: BTreeSet::new(),
                diseases: BTreeSet::new(),
                duration_secs: started.elapsed().as_secs_f64(),
                jsonld_output: None,
                error: Some(err.to_string()),
            }
        }
    }
}

/// `W = min(len(genes), min(2·CPU, 8))` — I/O-bound workers, bounded so
/// upstream APIs are not overwhelmed.
pub fn worker_pool_size(gene_count: usize) -> usize {
    let cpu_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    gene_count.min((cpu_count * 2).min(MAX_WORKERS))
}

/// Unique drug names plus disease terms from ClinVar phenotypes, Phase-3
/// associations and gene-level phenotype prose.
pub fn extract_drugs_diseases(clinical: &ClinicalOutput) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut drugs = BTreeSet::new();
    let mut diseases = BTreeSet::new();

    for variant in &clinical.variants {
        for drug in variant.affected_drugs() {
            drugs.insert(drug.name.clone());
        }
        if let Some(clinvar) = variant.clinvar.as_ref() {
            diseases.extend(clinvar.phenotypes.iter().cloned());
        }
        for association in &variant.disease_associations {
            diseases.insert(association.name.clone());
        }
    }

    for phenotype in &clinical.gene_level_phenotypes {
        let lower = phenotype.to_lowercase();
        if lower.contains("toxicity") {
            diseases.insert("Drug toxicity".to_string());
        } else if lower.contains("deficiency") {
            diseases.insert("Enzyme deficiency".to_string());
        } else if lower.contains("cancer") {
            diseases.insert("Cancer".to_string());
        } else if ["disease", "disorder", "syndrome"]
            .iter()
            .any(|term| lower.contains(term))
        {
            let mut term = phenotype.clone();
            if term.len() > 100 {
                let mut end = 100;
                while !term.is_char_boundary(end) {
                    end -= 1;
                }
                term.truncate(end);
            }
            diseases.insert(term);
        }
    }

    (drugs, diseases)
}

fn determine_patient_id(profile: Option<&Value>) -> String {
    match profile {
        Some(profile) => stable_profile_id(profile),
        None => {
            let now = OffsetDateTime::now_utc();
            format!(
                "comprehensive_patient_{:04}{:02}{:02}_{:02}{:02}{:02}",
                now.year(),
                now.month() as u8,
                now.day(),
                now.hour(),
                now.minute(),
                now.second()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::drug::AffectedDrug;
    use crate::entities::variant::PharmGkbBlock;
    use crate::sources::clinvar::ClinVarRecord;

    #[test]
    fn worker_pool_size_is_bounded() {
        assert_eq!(worker_pool_size(0), 0);
        assert_eq!(worker_pool_size(1), 1);
        assert!(worker_pool_size(100) <= MAX_WORKERS);
    }

    #[test]
    fn drugs_and_diseases_are_aggregated_from_all_sources() {
        let mut drug = AffectedDrug::new("clopidogrel");
        drug.recommendation = "Avoid".into();
        let variant = Variant {
            gene_symbol: "CYP2C19".into(),
            variant_id: "rs4244285".into(),
            clinvar: Some(ClinVarRecord {
                clinvar_id: "VCV1".into(),
                clinical_significance: None,
                review_status: "practice guideline".into(),
                star_rating: 4,
                phenotypes: vec!["Clopidogrel response".into()],
            }),
            pharmgkb: Some(PharmGkbBlock {
                drugs: vec![drug],
                ..Default::default()
            }),
            ..Default::default()
        };
        let clinical = ClinicalOutput {
            gene_symbol: "CYP2C19".into(),
            protein_id: "P33261".into(),
            total_variants: 1,
            variants: vec![variant],
            metabolizer_phenotype: None,
            gene_level_phenotypes: vec![
                "Severe toxicity in poor metabolizers".into(),
                "Enzyme deficiency reported".into(),
            ],
            timestamp: crate::phases::timestamp_now(),
        };

        let (drugs, diseases) = extract_drugs_diseases(&clinical);
        assert!(drugs.contains("clopidogrel"));
        assert!(diseases.contains("Clopidogrel response"));
        assert!(diseases.contains("Drug toxicity"));
        assert!(diseases.contains("Enzyme deficiency"));
    }

    #[tokio::test]
    async fn empty_gene_list_succeeds_with_no_variants_or_conflicts() {
        let base = std::env::temp_dir().join(format!("pgxkg-pipeline-{}", std::process::id()));
        let config = Config {
            data_dir: base.join("data"),
            output_dir: base.join("output"),
            ..Config::default()
        };
        let pipeline = Pipeline::new(config).await.unwrap();
        let outcome = pipeline.run_multi(&[], None).await;
        std::fs::remove_dir_all(&base).ok();

        assert!(outcome.success);
        assert_eq!(outcome.total_variants, 0);
        assert_eq!(outcome.affected_drugs, 0);
        let profile = outcome.comprehensive_profile.expect("profile");
        assert_eq!(profile["variants"].as_array().unwrap().len(), 0);
        assert_eq!(
            profile["variant_linking"]["conflicts"]
                .as_array()
                .unwrap()
                .len(),
            0
        );
        assert!(outcome.patient_id.starts_with("comprehensive_patient_"));
    }

    #[test]
    fn patient_id_prefers_profile_identifiers() {
        let profile = serde_json::json!({
            "clinical_information": {"demographics": {"mrn": "MRN-777"}}
        });
        assert_eq!(determine_patient_id(Some(&profile)), "MRN-777");

        let generated = determine_patient_id(None);
        assert!(generated.starts_with("comprehensive_patient_"));
    }
}
