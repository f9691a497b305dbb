//! Phase 4 — knowledge-graph assembly.
//!
//! Nodes and edges are arena-like collections keyed by stable ids
//! (`dbsnp:`, `uniprot:`, `chembl:`/`rxnorm:`, `snomed:`, `pubmed:`);
//! edges reference nodes by id, never by pointer, so serialisation is
//! trivial and cycles cannot form. Variants without a canonical rsID are
//! not given dbSNP-keyed nodes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::entities::variant::Variant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
    Gene,
    Variant,
    Drug,
    ClinicalFinding,
    Disease,
    Publication,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EdgeType {
    HasVariant,
    AffectsDrug,
    HasClinicalFinding,
    AssociatedWithDisease,
    HasEvidence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub node_type: NodeType,
    pub label: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphEdge {
    pub subject: String,
    pub predicate: EdgeType,
    pub object: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl KnowledgeGraph {
    fn add_node(&mut self, node: GraphNode) {
        if !self.nodes.iter().any(|existing| existing.id == node.id) {
            self.nodes.push(node);
        }
    }

    fn add_edge(&mut self, subject: &str, predicate: EdgeType, object: &str) {
        let edge = GraphEdge {
            subject: subject.to_string(),
            predicate,
            object: object.to_string(),
        };
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn edges_from(&self, subject: &str) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter().filter(move |edge| edge.subject == subject)
    }
}

/// Builds the per-gene graph from enriched variants.
pub fn build_graph(gene_symbol: &str, protein_id: &str, variants: &[Variant]) -> KnowledgeGraph {
    let mut graph = KnowledgeGraph::default();

    let gene_id = format!("uniprot:{protein_id}");
    graph.add_node(GraphNode {
        id: gene_id.clone(),
        node_type: NodeType::Gene,
        label: gene_symbol.to_string(),
        properties: Map::from_iter([("accession".to_string(), json!(protein_id))]),
    });

    for variant in variants {
        // Variants without a canonical rsID stay out of the triple store.
        let Some(rsid) = variant.triple_rsid() else {
            continue;
        };
        let variant_id = format!("dbsnp:{rsid}");

        let mut properties = Map::new();
        properties.insert("rsid".to_string(), json!(rsid));
        if let Some(significance) = variant.clinical_significance.as_deref() {
            properties.insert("clinicalSignificance".to_string(), json!(significance));
        }
        if let Some(change) = variant.hgvs_notation.as_deref() {
            properties.insert("proteinChange".to_string(), json!(change));
        }
        if let Some(clinvar) = variant.clinvar.as_ref() {
            properties.insert("clinvarId".to_string(), json!(clinvar.clinvar_id));
            properties.insert("starRating".to_string(), json!(clinvar.star_rating));
        }
        graph.add_node(GraphNode {
            id: variant_id.clone(),
            node_type: NodeType::Variant,
            label: format!("{gene_symbol} ({rsid})"),
            properties,
        });
        graph.add_edge(&gene_id, EdgeType::HasVariant, &variant_id);

        for drug in variant.affected_drugs() {
            let Some(drug_id) = drug.graph_key() else {
                continue;
            };
            let mut properties = Map::new();
            if !drug.recommendation.is_empty() {
                properties.insert("recommendation".to_string(), json!(drug.recommendation));
            }
            if let Some(level) = drug.evidence_level.as_deref() {
                properties.insert("evidenceLevel".to_string(), json!(level));
            }
            graph.add_node(GraphNode {
                id: drug_id.clone(),
                node_type: NodeType::Drug,
                label: drug.name.clone(),
                properties,
            });
            graph.add_edge(&variant_id, EdgeType::AffectsDrug, &drug_id);
        }

        for mapping in &variant.phenotypes_snomed {
            let finding_id = format!("snomed:{}", mapping.clinical_finding.code);
            let mut properties = Map::new();
            properties.insert(
                "phenotypeText".to_string(),
                json!(truncate(&mapping.phenotype_text, 200)),
            );
            if let Some(expression) = mapping.clinical_finding.expression.as_deref() {
                properties.insert("expression".to_string(), json!(expression));
            }
            graph.add_node(GraphNode {
                id: finding_id.clone(),
                node_type: NodeType::ClinicalFinding,
                label: mapping.clinical_finding.label.clone(),
                properties,
            });
            graph.add_edge(&variant_id, EdgeType::HasClinicalFinding, &finding_id);
        }

        for association in &variant.disease_associations {
            let Some(snomed) = association.snomed.as_ref() else {
                continue;
            };
            let disease_id = format!("snomed:{}", snomed.code);
            graph.add_node(GraphNode {
                id: disease_id.clone(),
                node_type: NodeType::Disease,
                label: snomed.label.clone(),
                properties: Map::from_iter([(
                    "source".to_string(),
                    json!(association.source),
                )]),
            });
            graph.add_edge(&variant_id, EdgeType::AssociatedWithDisease, &disease_id);
        }

        let mut cited: BTreeSet<String> = BTreeSet::new();
        if let Some(literature) = variant.literature.as_ref() {
            for publication in literature
                .gene_publications
                .iter()
                .chain(literature.variant_publications.iter())
                .chain(literature.drug_publications.values().flatten())
            {
                let Some(pmid) = publication.pmid.as_deref() else {
                    continue;
                };
                if !cited.insert(pmid.to_string()) {
                    continue;
                }
                let publication_id = format!("pubmed:{pmid}");
                graph.add_node(GraphNode {
                    id: publication_id.clone(),
                    node_type: NodeType::Publication,
                    label: publication.title.clone(),
                    properties: Map::from_iter([(
                        "citationCount".to_string(),
                        json!(publication.citation_count),
                    )]),
                });
                graph.add_edge(&variant_id, EdgeType::HasEvidence, &publication_id);
            }
        }
    }

    graph
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::drug::AffectedDrug;
    use crate::entities::publication::Publication;
    use crate::entities::variant::{PharmGkbBlock, VariantLiterature};
    use crate::sources::bioportal::{SnomedConcept, SnomedMatchType};

    fn enriched_variant() -> Variant {
        let mut drug = AffectedDrug::new("clopidogrel");
        drug.chembl_id = Some("CHEMBL1771".into());
        drug.recommendation = "Avoid clopidogrel".into();

        let mut keyless = AffectedDrug::new("mystery-compound");
        keyless.recommendation = "n/a".into();

        Variant {
            gene_symbol: "CYP2C19".into(),
            variant_id: "VAR_1".into(),
            rsid: Some("rs4244285".into()),
            clinical_significance: Some("Drug response".into()),
            pharmgkb: Some(PharmGkbBlock {
                drugs: vec![drug, keyless],
                ..Default::default()
            }),
            disease_associations: vec![crate::entities::variant::DiseaseAssociation {
                name: "Acute coronary syndrome".into(),
                source: "pharmgkb_phenotype".into(),
                snomed: Some(SnomedConcept {
                    code: "394659003".into(),
                    label: "Acute coronary syndrome".into(),
                    uri: "http://snomed.info/id/394659003".into(),
                    match_type: SnomedMatchType::Exact,
                    expression: None,
                }),
                original_phenotype: None,
            }],
            literature: Some(VariantLiterature {
                gene_publications: vec![
                    Publication::uniprot_fallback("1"),
                    Publication::uniprot_fallback("1"),
                ],
                variant_publications: vec![Publication::uniprot_fallback("2")],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn graph_keys_follow_the_id_scheme() {
        let graph = build_graph("CYP2C19", "P33261", &[enriched_variant()]);
        assert!(graph.node("uniprot:P33261").is_some());
        assert!(graph.node("dbsnp:rs4244285").is_some());
        assert!(graph.node("chembl:CHEMBL1771").is_some());
        assert!(graph.node("snomed:394659003").is_some());
        assert!(graph.node("pubmed:1").is_some());
        assert!(graph.node("pubmed:2").is_some());
    }

    #[test]
    fn variants_without_rsid_are_skipped() {
        let mut variant = enriched_variant();
        variant.rsid = None;
        let graph = build_graph("CYP2C19", "P33261", &[variant]);
        assert_eq!(graph.nodes.len(), 1); // just the gene
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn edges_are_deduplicated_and_typed() {
        let variant = enriched_variant();
        let graph = build_graph("CYP2C19", "P33261", &[variant.clone(), variant]);

        let from_variant: Vec<&GraphEdge> = graph.edges_from("dbsnp:rs4244285").collect();
        // affectsDrug + associatedWithDisease + 2×hasEvidence.
        assert_eq!(from_variant.len(), 4);
        assert_eq!(
            graph
                .edges
                .iter()
                .filter(|e| e.predicate == EdgeType::HasVariant)
                .count(),
            1
        );
        // Duplicate PMID "1" collapsed to one evidence edge.
        assert_eq!(
            from_variant
                .iter()
                .filter(|e| e.predicate == EdgeType::HasEvidence)
                .count(),
            2
        );
    }

    #[test]
    fn drugs_without_stable_ids_stay_out() {
        let graph = build_graph("CYP2C19", "P33261", &[enriched_variant()]);
        assert!(
            graph
                .nodes
                .iter()
                .all(|node| node.label != "mystery-compound")
        );
    }

    #[test]
    fn edge_type_serialises_semantic_names() {
        assert_eq!(
            serde_json::to_value(EdgeType::AffectsDrug).unwrap(),
            json!("affectsDrug")
        );
        assert_eq!(
            serde_json::to_value(EdgeType::HasClinicalFinding).unwrap(),
            json!("hasClinicalFinding")
        );
    }
}
