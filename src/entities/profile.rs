use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::entities::variant::Variant;

/// Counts by clinical significance plus the headline numbers reports
/// lead with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClinicalSummary {
    pub total_variants: usize,
    pub by_significance: BTreeMap<String, usize>,
    pub drug_response_variants: usize,
    pub pathogenic_variants: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub high_impact_genes: Vec<String>,
}

impl ClinicalSummary {
    pub fn from_variants(variants: &[Variant]) -> Self {
        let mut summary = ClinicalSummary {
            total_variants: variants.len(),
            ..Default::default()
        };
        let mut gene_impact: BTreeMap<&str, usize> = BTreeMap::new();

        for variant in variants {
            let significance = variant
                .clinical_significance
                .as_deref()
                .unwrap_or("Unknown");
            *summary
                .by_significance
                .entry(significance.to_string())
                .or_default() += 1;

            let lower = significance.to_lowercase();
            if lower.contains("drug response") {
                summary.drug_response_variants += 1;
            }
            if lower.contains("pathogenic") {
                summary.pathogenic_variants += 1;
            }

            *gene_impact.entry(variant.gene_symbol.as_str()).or_default() +=
                variant.affected_drugs().len();
        }

        // High impact: more than three drug interactions for the gene.
        summary.high_impact_genes = gene_impact
            .into_iter()
            .filter(|(_, impact)| *impact > 3)
            .map(|(gene, _)| gene.to_string())
            .collect();
        summary
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopPublication {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,
    pub title: String,
    pub citation_count: u64,
    pub gene: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiteratureCoverage {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub genes_covered: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants_covered: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drugs_covered: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiteratureSummary {
    pub total_publications: usize,
    pub gene_publications: usize,
    pub variant_specific_publications: usize,
    pub drug_publications: usize,
    pub genes_with_literature: usize,
    pub variants_with_literature: usize,
    pub drugs_with_literature: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_publications: Vec<TopPublication>,
    pub coverage: LiteratureCoverage,
}

const TOP_PUBLICATION_CITATIONS: u64 = 50;

impl LiteratureSummary {
    pub fn from_variants(variants: &[Variant]) -> Self {
        let mut summary = LiteratureSummary::default();
        let mut genes: BTreeSet<String> = BTreeSet::new();
        let mut covered_variants: BTreeSet<String> = BTreeSet::new();
        let mut drugs: BTreeSet<String> = BTreeSet::new();
        let mut top: Vec<TopPublication> = Vec::new();

        for variant in variants {
            let Some(literature) = variant.literature.as_ref() else {
                continue;
            };
            summary.gene_publications += literature.gene_publications.len();
            summary.variant_specific_publications += literature.variant_publications.len();

            if !literature.gene_publications.is_empty()
                || !literature.variant_publications.is_empty()
            {
                genes.insert(variant.gene_symbol.clone());
            }
            if !literature.variant_publications.is_empty() {
                covered_variants.insert(format!(
                    "{}:{}",
                    variant.gene_symbol,
                    variant.best_identifier()
                ));
            }

            for publication in &literature.gene_publications {
                if publication.citation_count > TOP_PUBLICATION_CITATIONS {
                    let mut title = publication.title.clone();
                    if title.len() > 100 {
                        let mut end = 100;
                        while !title.is_char_boundary(end) {
                            end -= 1;
                        }
                        title = format!("{}...", &title[..end]);
                    }
                    top.push(TopPublication {
                        pmid: publication.pmid.clone(),
                        title,
                        citation_count: publication.citation_count,
                        gene: variant.gene_symbol.clone(),
                    });
                }
            }

            for (drug, publications) in &literature.drug_publications {
                summary.drug_publications += publications.len();
                if !publications.is_empty() {
                    drugs.insert(drug.clone());
                }
            }
        }

        summary.total_publications = summary.gene_publications
            + summary.variant_specific_publications
            + summary.drug_publications;
        summary.genes_with_literature = genes.len();
        summary.variants_with_literature = covered_variants.len();
        summary.drugs_with_literature = drugs.len();

        top.sort_by(|a, b| b.citation_count.cmp(&a.citation_count));
        top.truncate(10);
        summary.top_publications = top;
        summary.coverage = LiteratureCoverage {
            genes_covered: genes.into_iter().collect(),
            variants_covered: covered_variants.into_iter().take(10).collect(),
            drugs_covered: drugs.into_iter().take(10).collect(),
        };
        summary
    }
}

/// The `pharmacogenomics_profile` block of the assembled document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PharmacogenomicsProfile {
    pub genes_analyzed: Vec<String>,
    pub total_variants: usize,
    pub variants_by_gene: BTreeMap<String, usize>,
    pub affected_drugs: Vec<String>,
    pub associated_diseases: Vec<String>,
    pub clinical_summary: ClinicalSummary,
    pub literature_summary: LiteratureSummary,
}
