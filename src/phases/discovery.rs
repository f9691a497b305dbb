//! Phase 1 — variant discovery.
//!
//! Resolves the UniProt accession, downloads the variation payload,
//! keeps the clinically significant variants, and selects a realistic
//! two-allele diplotype for the virtual patient.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::PgxError;
use crate::extract;
use crate::resolve::IdResolver;
use crate::sources::uniprot;

/// Categories in decreasing order of clinical interest; diplotype
/// selection walks this list.
pub const PRIORITY_CATEGORIES: &[&str] = &[
    "Drug response",
    "Pathogenic",
    "Likely pathogenic",
    "Variant of uncertain significance",
    "Benign",
    "Likely benign",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedDiplotype {
    pub variants: Vec<Value>,
    pub count: usize,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantCatalog {
    pub categories: BTreeMap<String, Vec<Value>>,
    pub pubmed_evidence: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryOutput {
    pub gene_symbol: String,
    pub protein_id: String,
    pub total_variants: usize,
    pub selected_diplotype: SelectedDiplotype,
    pub variant_catalog: VariantCatalog,
    pub timestamp: String,
}

pub struct VariantDiscoverer {
    resolver: Arc<IdResolver>,
    output_dir: PathBuf,
}

impl VariantDiscoverer {
    pub fn new(resolver: Arc<IdResolver>, output_dir: PathBuf) -> Self {
        Self {
            resolver,
            output_dir,
        }
    }

    /// Runs discovery for one gene. A failed UniProt resolution is
    /// terminal for the gene.
    pub async fn run(
        &self,
        gene_symbol: &str,
        protein_id: Option<&str>,
    ) -> Result<DiscoveryOutput, PgxError> {
        let gene_symbol = gene_symbol.trim();
        if gene_symbol.is_empty() {
            return Err(PgxError::Contract("empty gene symbol".into()));
        }

        let protein_id = match protein_id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => {
                self.resolver
                    .resolve_uniprot(gene_symbol, "human")
                    .await?
                    .accession
            }
        };
        info!(gene = gene_symbol, protein = %protein_id, "Discovering variants");

        let payload = self
            .resolver
            .uniprot_client()
            .fetch_variation(&protein_id)
            .await?;

        let clinical_variants = uniprot::filter_clinical_variants(&payload);
        debug!(
            gene = gene_symbol,
            total = clinical_variants.len(),
            "Filtered to clinically significant variants"
        );

        let categories = uniprot::categorize_by_significance(&clinical_variants);
        let pubmed_evidence = uniprot::extract_pubmed_evidence(&categories);

        let mut selected = select_realistic_diplotype(&categories);
        restore_evidences(&mut selected, &categories);

        let description = diplotype_description(&selected);
        let output = DiscoveryOutput {
            gene_symbol: gene_symbol.to_string(),
            protein_id: protein_id.clone(),
            total_variants: clinical_variants.len(),
            selected_diplotype: SelectedDiplotype {
                count: selected.len(),
                description: description.clone(),
                variants: selected.clone(),
            },
            variant_catalog: VariantCatalog {
                categories,
                pubmed_evidence,
            },
            timestamp: super::timestamp_now(),
        };

        let variants_path = self.output_dir.join(format!("{gene_symbol}_variants.json"));
        super::write_json(&variants_path, &output).await?;

        let virtual_patient = virtual_patient_envelope(gene_symbol, &protein_id, &selected);
        let patient_path = self
            .output_dir
            .join(format!("{gene_symbol}_virtual_patient.json"));
        super::write_json(&patient_path, &virtual_patient).await?;

        Ok(output)
    }
}

fn selection_priority(variant: &Value) -> i64 {
    let mut score = 0;
    if variant
        .get("populationFrequencies")
        .and_then(Value::as_array)
        .is_some_and(|rows| !rows.is_empty())
    {
        score += 10;
    }
    if variant
        .get("evidences")
        .and_then(Value::as_array)
        .is_some_and(|rows| !rows.is_empty())
    {
        score += 5;
    }
    score
}

/// Picks up to two variants walking the priority categories, one per
/// category, preferring variants with population and evidence metadata.
/// A single hit becomes a homozygous diplotype; no hits, a reference
/// diplotype.
pub fn select_realistic_diplotype(categories: &BTreeMap<String, Vec<Value>>) -> Vec<Value> {
    let mut selected: Vec<Value> = Vec::new();

    for category in PRIORITY_CATEGORIES {
        let Some(variants) = categories.get(*category).filter(|v| !v.is_empty()) else {
            continue;
        };
        let mut ranked: Vec<&Value> = variants.iter().collect();
        ranked.sort_by_key(|variant| -selection_priority(variant));

        if selected.len() < 2 {
            selected.push(ranked[0].clone());
        }
        if selected.len() == 2 {
            break;
        }
    }

    if selected.len() == 1 {
        let duplicate = selected[0].clone();
        selected.push(duplicate);
    }
    selected
}

/// Copying variants between category lists can strip `evidences`; match
/// the originals on protein location or genomic location and put them
/// back.
pub fn restore_evidences(selected: &mut [Value], categories: &BTreeMap<String, Vec<Value>>) {
    for variant in selected.iter_mut() {
        if variant
            .get("evidences")
            .and_then(Value::as_array)
            .is_some_and(|rows| !rows.is_empty())
        {
            continue;
        }

        let positions = extract::location_positions(variant);
        let genomic = extract::genomic_locations(variant);

        'search: for originals in categories.values() {
            for original in originals {
                let Some(evidences) = original.get("evidences").filter(|rows| {
                    rows.as_array().is_some_and(|rows| !rows.is_empty())
                }) else {
                    continue;
                };
                let positions_match =
                    !positions.is_empty() && extract::location_positions(original) == positions;
                let genomic_match =
                    !genomic.is_empty() && extract::genomic_locations(original) == genomic;
                if positions_match || genomic_match {
                    variant["evidences"] = evidences.clone();
                    break 'search;
                }
            }
        }
    }
}

pub fn diplotype_description(selected: &[Value]) -> String {
    let ft_id = |v: &Value| {
        v.get("ftId")
            .and_then(Value::as_str)
            .unwrap_or("variant")
            .to_string()
    };
    match selected {
        [] => "Reference diplotype (no variants)".to_string(),
        [only] => format!("Homozygous for {}", ft_id(only)),
        [first, second, ..] => {
            let (a, b) = (ft_id(first), ft_id(second));
            if a == b {
                format!("Homozygous for {a}")
            } else {
                format!("Compound heterozygous: {a} and {b}")
            }
        }
    }
}

fn genotype_summary(selected: &[Value]) -> String {
    fn ft_id(v: &Value) -> &str {
        v.get("ftId").and_then(Value::as_str).unwrap_or("variant")
    }
    match selected {
        [] => "Wild-type/Wild-type".to_string(),
        [only] => format!("{0}/{0} (homozygous)", ft_id(only)),
        [first, second, ..] => {
            let (a, b) = (ft_id(first), ft_id(second));
            if a == b {
                format!("{a}/{a} (homozygous)")
            } else {
                format!("{a}/{b} (heterozygous)")
            }
        }
    }
}

/// Per-gene virtual patient artifact: a compact JSON-LD envelope naming
/// the focus gene/protein and the selected genotype.
pub fn virtual_patient_envelope(gene_symbol: &str, protein_id: &str, selected: &[Value]) -> Value {
    let patient_id = format!("virtual_patient_{}", gene_symbol.to_lowercase());
    let variant_refs: Vec<Value> = selected
        .iter()
        .enumerate()
        .map(|(index, variant)| {
            json!({
                "@id": format!("http://pgx-kg.org/variant/{}", variant.get("ftId").and_then(Value::as_str).unwrap_or(&format!("variant_{}", index + 1))),
                "schema:identifier": variant.get("ftId").cloned().unwrap_or(Value::Null),
                "schema:position": variant.get("begin").cloned().unwrap_or(Value::Null),
                "clinicalSignificance": extract::clinical_significances(variant),
            })
        })
        .collect();

    json!({
        "@context": {
            "foaf": "http://xmlns.com/foaf/0.1/",
            "schema": "http://schema.org/",
            "pgx": "http://pgx-kg.org/",
            "uniprot": "https://identifiers.org/uniprot:",
            "xsd": "http://www.w3.org/2001/XMLSchema#"
        },
        "@id": format!("http://pgx-kg.org/patient/{patient_id}"),
        "@type": ["foaf:Person", "schema:Patient"],
        "identifier": patient_id,
        "name": format!("Virtual Human Patient - {gene_symbol} Profile"),
        "description": format!("Virtual human patient with realistic {gene_symbol} diplotype for pharmacogenomics analysis"),
        "dateCreated": super::timestamp_now(),
        "focusGene": {"schema:name": gene_symbol},
        "focusProtein": {"@id": format!("uniprot:{protein_id}"), "schema:identifier": protein_id},
        "genotype": {
            "description": diplotype_description(selected),
            "genotypeCall": genotype_summary(selected),
            "variantCount": selected.len(),
            "variants": variant_refs,
        },
        "dataSource": ["EMBL-EBI Proteins API", "UniProt"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(ft_id: &str, significance: &str, pop: bool, evidences: bool) -> Value {
        let mut out = json!({
            "ftId": ft_id,
            "clinicalSignificances": [{"type": significance}],
        });
        if pop {
            out["populationFrequencies"] = json!([{"source": "gnomAD", "frequency": 0.1}]);
        }
        if evidences {
            out["evidences"] = json!([{"source": {"name": "pubmed", "id": "1"}}]);
        }
        out
    }

    fn categorize(variants: Vec<Value>) -> BTreeMap<String, Vec<Value>> {
        uniprot::categorize_by_significance(&variants)
    }

    #[test]
    fn diplotype_prefers_priority_categories_and_metadata() {
        let categories = categorize(vec![
            variant("VAR_BENIGN", "Benign", true, true),
            variant("VAR_PLAIN", "Drug response", false, false),
            variant("VAR_RICH", "Drug response", true, true),
            variant("VAR_PATH", "Pathogenic", false, true),
        ]);
        let selected = select_realistic_diplotype(&categories);
        assert_eq!(selected.len(), 2);
        // Within Drug response the metadata-rich variant wins; the
        // second allele comes from the next category (Pathogenic).
        assert_eq!(selected[0]["ftId"], "VAR_RICH");
        assert_eq!(selected[1]["ftId"], "VAR_PATH");
    }

    #[test]
    fn single_variant_becomes_homozygous() {
        let categories = categorize(vec![variant("VAR_ONLY", "Drug response", false, false)]);
        let selected = select_realistic_diplotype(&categories);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0]["ftId"], selected[1]["ftId"]);
        assert_eq!(
            diplotype_description(&selected),
            "Homozygous for VAR_ONLY"
        );
    }

    #[test]
    fn no_variants_is_reference_diplotype() {
        let selected = select_realistic_diplotype(&BTreeMap::new());
        assert!(selected.is_empty());
        assert_eq!(
            diplotype_description(&selected),
            "Reference diplotype (no variants)"
        );
        assert_eq!(genotype_summary(&selected), "Wild-type/Wild-type");
    }

    #[test]
    fn evidences_restored_by_location_match() {
        let with_evidence = json!({
            "ftId": "VAR_A",
            "clinicalSignificances": [{"type": "Drug response"}],
            "locations": [{"position": {"position": {"value": 331}}}],
            "evidences": [{"source": {"name": "pubmed", "id": "123"}}]
        });
        let stripped = json!({
            "ftId": "VAR_A",
            "locations": [{"position": {"position": {"value": 331}}}]
        });
        let mut categories = BTreeMap::new();
        categories.insert("Drug response".to_string(), vec![with_evidence]);

        let mut selected = vec![stripped];
        restore_evidences(&mut selected, &categories);
        assert_eq!(
            selected[0]["evidences"][0]["source"]["id"],
            json!("123")
        );
    }

    #[test]
    fn evidences_restored_by_genomic_location_match() {
        let with_evidence = json!({
            "ftId": "VAR_B",
            "genomicLocation": ["NC_000010.11:g.94781859G>A"],
            "evidences": [{"source": {"name": "pubmed", "id": "9"}}]
        });
        let stripped = json!({
            "ftId": "VAR_B",
            "genomicLocation": ["NC_000010.11:g.94781859G>A"]
        });
        let mut categories = BTreeMap::new();
        categories.insert("Pathogenic".to_string(), vec![with_evidence]);

        let mut selected = vec![stripped];
        restore_evidences(&mut selected, &categories);
        assert!(selected[0].get("evidences").is_some());
    }

    #[test]
    fn compound_heterozygous_description() {
        let selected = vec![
            variant("VAR_1", "Drug response", false, false),
            variant("VAR_2", "Pathogenic", false, false),
        ];
        assert_eq!(
            diplotype_description(&selected),
            "Compound heterozygous: VAR_1 and VAR_2"
        );
        assert_eq!(genotype_summary(&selected), "VAR_1/VAR_2 (heterozygous)");
    }

    #[test]
    fn virtual_patient_envelope_names_gene_and_protein() {
        let envelope = virtual_patient_envelope("CYP2C19", "P33261", &[]);
        assert_eq!(
            envelope["@id"],
            json!("http://pgx-kg.org/patient/virtual_patient_cyp2c19")
        );
        assert_eq!(envelope["focusProtein"]["@id"], json!("uniprot:P33261"));
        assert_eq!(envelope["genotype"]["variantCount"], json!(0));
    }
}
