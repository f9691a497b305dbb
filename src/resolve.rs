//! Identifier resolver: gene symbol → UniProt accession, term → SNOMED CT,
//! drug name → SNOMED CT substance / RxNorm CUI.
//!
//! Every resolver memoises by normalised key (lower-cased, trimmed) for
//! the lifetime of the resolver. Caches are monotone: entries are added,
//! never mutated, and misses are cached too. Transient upstream failures
//! are NOT cached, so a later retry can still succeed.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::error::PgxError;
use crate::sources::HttpContext;
use crate::sources::bioportal::{BioPortalClient, SnomedConcept};
use crate::sources::rxnorm::{RxNormClient, RxNormConcept};
use crate::sources::uniprot::{ResolvedProtein, UniProtClient};

pub struct IdResolver {
    uniprot: UniProtClient,
    bioportal: BioPortalClient,
    rxnorm: RxNormClient,
    uniprot_cache: Mutex<HashMap<String, Option<ResolvedProtein>>>,
    snomed_cache: Mutex<HashMap<String, Option<SnomedConcept>>>,
    drug_snomed_cache: Mutex<HashMap<String, Option<SnomedConcept>>>,
    rxnorm_cache: Mutex<HashMap<String, Option<RxNormConcept>>>,
}

fn cache_key(value: &str) -> String {
    value.trim().to_lowercase()
}

impl IdResolver {
    pub async fn new(
        http: &HttpContext,
        bioportal_api_key: Option<String>,
    ) -> Result<Self, PgxError> {
        Ok(Self {
            uniprot: UniProtClient::new(http).await?,
            bioportal: BioPortalClient::new(http, bioportal_api_key).await?,
            rxnorm: RxNormClient::new(http).await?,
            uniprot_cache: Mutex::new(HashMap::new()),
            snomed_cache: Mutex::new(HashMap::new()),
            drug_snomed_cache: Mutex::new(HashMap::new()),
            rxnorm_cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn uniprot_client(&self) -> &UniProtClient {
        &self.uniprot
    }

    /// Gene symbol → reviewed human UniProt accession. A confirmed miss
    /// is cached and keeps returning `NotFound` without another request.
    pub async fn resolve_uniprot(
        &self,
        gene_symbol: &str,
        organism: &str,
    ) -> Result<ResolvedProtein, PgxError> {
        let key = cache_key(gene_symbol);
        {
            let cache = self.uniprot_cache.lock().await;
            if let Some(entry) = cache.get(&key) {
                return match entry {
                    Some(resolved) => Ok(resolved.clone()),
                    None => Err(PgxError::NotFound {
                        entity: "uniprot accession".into(),
                        id: gene_symbol.trim().to_string(),
                    }),
                };
            }
        }

        match self.uniprot.resolve_accession(gene_symbol, organism).await {
            Ok(resolved) => {
                self.uniprot_cache
                    .lock()
                    .await
                    .entry(key)
                    .or_insert(Some(resolved.clone()));
                Ok(resolved)
            }
            Err(err) if err.is_not_found() => {
                self.uniprot_cache.lock().await.entry(key).or_insert(None);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Free-text term → SNOMED CT concept.
    pub async fn resolve_snomed(&self, term: &str) -> Result<Option<SnomedConcept>, PgxError> {
        let key = cache_key(term);
        if key.is_empty() {
            return Ok(None);
        }
        {
            let cache = self.snomed_cache.lock().await;
            if let Some(entry) = cache.get(&key) {
                return Ok(entry.clone());
            }
        }

        let resolved = self.bioportal.search_snomed(term).await?;
        self.snomed_cache
            .lock()
            .await
            .entry(key)
            .or_insert(resolved.clone());
        Ok(resolved)
    }

    /// Drug name → SNOMED CT substance. Strategies, in order: the
    /// `"<name> (substance)"` query, the plain name, a lower-cased
    /// hyphen-stripped synonym, and finally the RxNorm-standardised
    /// display name.
    pub async fn resolve_drug_snomed(&self, name: &str) -> Result<Option<SnomedConcept>, PgxError> {
        let key = cache_key(name);
        if key.is_empty() {
            return Ok(None);
        }
        {
            let cache = self.drug_snomed_cache.lock().await;
            if let Some(entry) = cache.get(&key) {
                return Ok(entry.clone());
            }
        }

        let mut resolved = self.bioportal.search_drug_snomed(name).await?;
        if resolved.is_none() {
            if let Some(concept) = self.resolve_rxnorm(name).await? {
                if let Some(standard_name) = concept.name.as_deref() {
                    if cache_key(standard_name) != key {
                        resolved = self.bioportal.search_drug_snomed(standard_name).await?;
                    }
                }
            }
        }

        self.drug_snomed_cache
            .lock()
            .await
            .entry(key)
            .or_insert(resolved.clone());
        Ok(resolved)
    }

    /// Drug name → RxNorm concept.
    pub async fn resolve_rxnorm(&self, name: &str) -> Result<Option<RxNormConcept>, PgxError> {
        let key = cache_key(name);
        if key.is_empty() {
            return Ok(None);
        }
        {
            let cache = self.rxnorm_cache.lock().await;
            if let Some(entry) = cache.get(&key) {
                return Ok(entry.clone());
            }
        }

        let resolved = self.rxnorm.resolve(name).await?;
        self.rxnorm_cache
            .lock()
            .await
            .entry(key)
            .or_insert(resolved.clone());
        Ok(resolved)
    }

    /// Phenotype prose → SNOMED CT clinical finding (post-coordinated
    /// where possible). Not cached: the gene/drug context varies per
    /// call site and the underlying concept searches are cached anyway.
    pub async fn map_phenotype(
        &self,
        phenotype_text: &str,
        gene_symbol: Option<&str>,
        drug_name: Option<&str>,
    ) -> Result<Option<SnomedConcept>, PgxError> {
        self.bioportal
            .map_phenotype(phenotype_text, gene_symbol, drug_name)
            .await
    }

    pub fn bioportal(&self) -> &BioPortalClient {
        &self.bioportal
    }
}
