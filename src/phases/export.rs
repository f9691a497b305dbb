//! Phase 5 — per-gene JSON-LD export.

use std::path::PathBuf;

use serde_json::{Map, Value, json};

use crate::entities::variant::{MetabolizerCall, Variant};
use crate::error::PgxError;
use crate::phases::graph::KnowledgeGraph;

pub struct JsonLdExporter {
    output_dir: PathBuf,
}

/// Canonical `@context` for per-gene documents.
pub fn build_context() -> Value {
    json!({
        "@vocab": "http://schema.org/",
        "foaf": "http://xmlns.com/foaf/0.1/",
        "sio": "http://semanticscience.org/resource/",
        "obo": "http://purl.obolibrary.org/obo/",
        "dbsnp": "https://identifiers.org/dbsnp:",
        "uniprot": "https://identifiers.org/uniprot:",
        "rxnorm": "https://identifiers.org/rxnorm:",
        "snomed": "http://snomed.info/id/",
        "clinvar": "https://identifiers.org/clinvar:",
        "chembl": "https://www.ebi.ac.uk/chembl/compound_report_card/",
        "pubmed": "https://pubmed.ncbi.nlm.nih.gov/",
        "hasVariant": "sio:SIO_000008",
        "hasGenotype": "sio:SIO_000228",
        "affectsDrug": "sio:SIO_000253",
        "hasClinicalFinding": "sio:SIO_000668",
        "associatedWithDisease": "sio:SIO_000001",
        "hasEvidence": "sio:SIO_000772"
    })
}

impl JsonLdExporter {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    /// Emits `output/json/<gene>_knowledge_graph.jsonld`. The `@graph`
    /// carries the triple-keyed nodes and edges from Phase 4; the
    /// `variants` array carries every variant, including those without a
    /// resolvable rsID.
    pub async fn run(
        &self,
        gene_symbol: &str,
        protein_id: &str,
        variants: &[Variant],
        metabolizer: Option<&MetabolizerCall>,
        graph: &KnowledgeGraph,
    ) -> Result<(PathBuf, Value), PgxError> {
        let document = build_document(gene_symbol, protein_id, variants, metabolizer, graph)?;
        let path = self
            .output_dir
            .join(format!("{gene_symbol}_knowledge_graph.jsonld"));
        super::write_json(&path, &document).await?;
        Ok((path, document))
    }
}

pub fn build_document(
    gene_symbol: &str,
    protein_id: &str,
    variants: &[Variant],
    metabolizer: Option<&MetabolizerCall>,
    graph: &KnowledgeGraph,
) -> Result<Value, PgxError> {
    let genotype_id = format!(
        "http://pgx-kg.org/genotype/geno_{}_001",
        gene_symbol.to_lowercase()
    );

    let drug_response = variants
        .iter()
        .filter(|variant| {
            variant
                .clinical_significance
                .as_deref()
                .is_some_and(|s| s.to_lowercase().contains("drug response"))
        })
        .count();
    let pathogenic = variants
        .iter()
        .filter(|variant| {
            variant
                .clinical_significance
                .as_deref()
                .is_some_and(|s| s.to_lowercase().contains("pathogenic"))
        })
        .count();
    let affected_drugs: std::collections::BTreeSet<String> = variants
        .iter()
        .flat_map(|variant| variant.affected_drugs())
        .map(|drug| drug.name.to_lowercase())
        .collect();

    let mut genotype_node = Map::new();
    genotype_node.insert("@id".to_string(), json!(genotype_id));
    genotype_node.insert("@type".to_string(), json!("obo:GENO_0000536"));
    genotype_node.insert(
        "label".to_string(),
        json!(format!("Pharmacogenomics Genotype Profile for {gene_symbol}")),
    );
    genotype_node.insert("dateCreated".to_string(), json!(super::timestamp_now()));
    genotype_node.insert(
        "hasVariant".to_string(),
        json!(
            variants
                .iter()
                .filter_map(|variant| variant.triple_rsid())
                .map(|rsid| json!({"@id": format!("dbsnp:{rsid}")}))
                .collect::<Vec<Value>>()
        ),
    );
    genotype_node.insert(
        "summary".to_string(),
        json!({
            "totalVariants": variants.len(),
            "drugResponseVariants": drug_response,
            "pathogenicVariants": pathogenic,
            "affectedDrugsCount": affected_drugs.len(),
        }),
    );
    if let Some(call) = metabolizer {
        genotype_node.insert("metabolizerPhenotype".to_string(), json!(call.phenotype));
        genotype_node.insert("diplotype".to_string(), json!(call.diplotype));
        genotype_node.insert("functionality".to_string(), json!(call.functionality));
        if !call.star_alleles.is_empty() {
            genotype_node.insert("starAlleles".to_string(), json!(call.star_alleles));
        }
    }

    let gene_node = json!({
        "@id": format!("uniprot:{protein_id}"),
        "@type": "obo:SO_0000704",
        "identifier": protein_id,
        "label": gene_symbol,
        "name": gene_symbol,
    });

    Ok(json!({
        "@context": build_context(),
        "@id": format!("http://pgx-kg.org/graph/{}", gene_symbol.to_lowercase()),
        "gene": gene_node,
        "genotype": Value::Object(genotype_node),
        "@graph": {
            "nodes": serde_json::to_value(&graph.nodes)?,
            "edges": serde_json::to_value(&graph.edges)?,
        },
        "variants": serde_json::to_value(variants)?,
        "dataSource": "EMBL-EBI Proteins API + UniProt + ClinVar + PharmGKB + ChEMBL + OpenFDA + Europe PMC",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::graph::build_graph;

    fn variants() -> Vec<Variant> {
        vec![
            Variant {
                gene_symbol: "CYP2C19".into(),
                variant_id: "VAR_1".into(),
                rsid: Some("rs4244285".into()),
                clinical_significance: Some("Drug response".into()),
                ..Default::default()
            },
            Variant {
                gene_symbol: "CYP2C19".into(),
                variant_id: "VAR_NO_RSID".into(),
                clinical_significance: Some("Pathogenic".into()),
                ..Default::default()
            },
        ]
    }

    #[test]
    fn document_keeps_all_variants_but_only_rsid_triples() {
        let variants = variants();
        let graph = build_graph("CYP2C19", "P33261", &variants);
        let call = MetabolizerCall {
            phenotype: "Ultrarapid Metabolizer".into(),
            diplotype: "*1/*17".into(),
            functionality: "Normal/Increased".into(),
            star_alleles: vec!["*1".into(), "*17".into()],
            source: "PharmGKB/CPIC".into(),
        };
        let document =
            build_document("CYP2C19", "P33261", &variants, Some(&call), &graph).unwrap();

        assert_eq!(document["variants"].as_array().unwrap().len(), 2);
        let variant_refs = document["genotype"]["hasVariant"].as_array().unwrap();
        assert_eq!(variant_refs.len(), 1);
        assert_eq!(variant_refs[0]["@id"], json!("dbsnp:rs4244285"));

        assert_eq!(
            document["genotype"]["metabolizerPhenotype"],
            json!("Ultrarapid Metabolizer")
        );
        assert_eq!(document["genotype"]["diplotype"], json!("*1/*17"));
        assert_eq!(
            document["genotype"]["summary"]["drugResponseVariants"],
            json!(1)
        );
        assert_eq!(
            document["genotype"]["summary"]["pathogenicVariants"],
            json!(1)
        );

        let context = &document["@context"];
        assert_eq!(context["affectsDrug"], json!("sio:SIO_000253"));
        assert_eq!(context["snomed"], json!("http://snomed.info/id/"));
    }
}
