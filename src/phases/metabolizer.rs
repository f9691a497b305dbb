//! Diplotype → metabolizer phenotype.
//!
//! The allele functionality table is a seed covering CYP2C19 and CYP2D6;
//! broader gene coverage needs a data file that upstream does not ship.
//! Unknown alleles map to `Unknown` and fall through the combination
//! table accordingly.

use std::sync::OnceLock;

use regex::Regex;

use crate::entities::variant::{MetabolizerCall, Variant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlleleFunction {
    Normal,
    Decreased,
    Increased,
    NoFunction,
    Unknown,
}

impl AlleleFunction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Decreased => "Decreased",
            Self::Increased => "Increased",
            Self::NoFunction => "No function",
            Self::Unknown => "Unknown",
        }
    }
}

/// Seeded star-allele functionality assignments (CPIC/PharmGKB).
const ALLELE_FUNCTIONALITY: &[(&str, &str, AlleleFunction)] = &[
    ("CYP2C19", "*1", AlleleFunction::Normal),
    ("CYP2C19", "*2", AlleleFunction::Decreased),
    ("CYP2C19", "*3", AlleleFunction::Decreased),
    ("CYP2C19", "*17", AlleleFunction::Increased),
    ("CYP2D6", "*1", AlleleFunction::Normal),
    ("CYP2D6", "*2", AlleleFunction::Normal),
    ("CYP2D6", "*4", AlleleFunction::Decreased),
    ("CYP2D6", "*10", AlleleFunction::Decreased),
];

/// Seeded rsID → star allele assignments for the same two genes.
const RSID_STAR_ALLELES: &[(&str, &str, &str)] = &[
    ("CYP2C19", "rs4244285", "*2"),
    ("CYP2C19", "rs4986893", "*3"),
    ("CYP2C19", "rs12248560", "*17"),
    ("CYP2D6", "rs1065852", "*10"),
    ("CYP2D6", "rs3892097", "*4"),
    ("CYP2D6", "rs1135840", "*2"),
];

pub fn allele_functionality(gene: &str, allele: &str) -> AlleleFunction {
    ALLELE_FUNCTIONALITY
        .iter()
        .find(|(g, a, _)| g.eq_ignore_ascii_case(gene) && *a == allele)
        .map(|(_, _, f)| *f)
        .unwrap_or(AlleleFunction::Unknown)
}

pub fn star_allele_for_rsid(gene: &str, rsid: &str) -> Option<&'static str> {
    RSID_STAR_ALLELES
        .iter()
        .find(|(g, rs, _)| g.eq_ignore_ascii_case(gene) && rs.eq_ignore_ascii_case(rsid))
        .map(|(_, _, star)| *star)
}

static STAR_RE: OnceLock<Regex> = OnceLock::new();

/// Extracts the first star-allele mention (`*2`, `CYP2C19*17`, ...) from
/// annotation prose.
pub fn star_allele_from_text(text: &str) -> Option<String> {
    let re = STAR_RE.get_or_init(|| Regex::new(r"\*(\d+[A-Z]?)").expect("star allele regex"));
    re.captures(text)
        .and_then(|captures| captures.get(1))
        .map(|m| format!("*{}", m.as_str()))
}

/// Deterministic combination of two functionality classes.
pub fn combine(first: AlleleFunction, second: AlleleFunction) -> &'static str {
    use AlleleFunction::*;
    if first == second {
        return match first {
            Normal => "Normal Metabolizer",
            Decreased | NoFunction => "Poor Metabolizer",
            Increased => "Ultrarapid Metabolizer",
            Unknown => "Unknown Metabolizer",
        };
    }
    let pair = [first, second];
    if pair.contains(&Increased) {
        "Ultrarapid Metabolizer"
    } else if pair.contains(&Decreased) || pair.contains(&NoFunction) {
        if pair.contains(&Normal) {
            "Intermediate Metabolizer"
        } else {
            "Poor Metabolizer"
        }
    } else if pair.contains(&Normal) {
        "Normal Metabolizer"
    } else {
        "Unknown Metabolizer"
    }
}

fn star_allele_for_variant(gene: &str, variant: &Variant) -> Option<String> {
    if let Some(block) = variant.pharmgkb.as_ref() {
        for annotation in &block.annotations {
            for allele_phenotype in &annotation.allele_phenotypes {
                if let Some(allele) = allele_phenotype
                    .allele
                    .as_deref()
                    .filter(|a| a.starts_with('*'))
                {
                    return Some(allele.to_string());
                }
                if let Some(star) = star_allele_from_text(&allele_phenotype.phenotype) {
                    return Some(star);
                }
            }
        }
    }
    variant
        .rsid
        .as_deref()
        .and_then(|rsid| star_allele_for_rsid(gene, rsid))
        .map(str::to_string)
}

/// Metabolizer phenotype for the diplotype formed by the first two
/// variants. Alleles that cannot be assigned default to `*1` (wild-type).
pub fn determine_metabolizer_phenotype(gene: &str, variants: &[Variant]) -> MetabolizerCall {
    if variants.is_empty() {
        return MetabolizerCall {
            phenotype: "Not determined".to_string(),
            diplotype: "Unknown/Unknown".to_string(),
            functionality: "Unknown/Unknown".to_string(),
            star_alleles: Vec::new(),
            source: "No variants found".to_string(),
        };
    }

    let mut star_alleles: Vec<String> = variants
        .iter()
        .take(2)
        .map(|variant| {
            star_allele_for_variant(gene, variant).unwrap_or_else(|| "*1".to_string())
        })
        .collect();
    if star_alleles.len() == 1 {
        star_alleles.push(star_alleles[0].clone());
    }

    let first = allele_functionality(gene, &star_alleles[0]);
    let second = allele_functionality(gene, &star_alleles[1]);

    MetabolizerCall {
        phenotype: combine(first, second).to_string(),
        diplotype: format!("{}/{}", star_alleles[0], star_alleles[1]),
        functionality: format!("{}/{}", first.as_str(), second.as_str()),
        star_alleles,
        source: "PharmGKB/CPIC".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::variant::PharmGkbBlock;
    use crate::sources::pharmgkb::{AllelePhenotype, PharmGkbAnnotation};

    fn variant_with_rsid(gene: &str, rsid: &str) -> Variant {
        Variant {
            gene_symbol: gene.to_string(),
            variant_id: rsid.to_string(),
            rsid: Some(rsid.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn combination_table() {
        use AlleleFunction::*;
        assert_eq!(combine(Normal, Normal), "Normal Metabolizer");
        assert_eq!(combine(Decreased, Decreased), "Poor Metabolizer");
        assert_eq!(combine(NoFunction, NoFunction), "Poor Metabolizer");
        assert_eq!(combine(Increased, Increased), "Ultrarapid Metabolizer");
        assert_eq!(combine(Normal, Decreased), "Intermediate Metabolizer");
        assert_eq!(combine(Normal, NoFunction), "Intermediate Metabolizer");
        assert_eq!(combine(Decreased, Increased), "Ultrarapid Metabolizer");
        assert_eq!(combine(Normal, Increased), "Ultrarapid Metabolizer");
        assert_eq!(combine(Decreased, NoFunction), "Poor Metabolizer");
        assert_eq!(combine(Normal, Unknown), "Normal Metabolizer");
        assert_eq!(combine(Unknown, Unknown), "Unknown Metabolizer");
    }

    #[test]
    fn star_seventeen_diplotype_is_ultrarapid() {
        let variants = vec![
            variant_with_rsid("CYP2C19", "rs99999999"), // unassignable → *1
            variant_with_rsid("CYP2C19", "rs12248560"), // *17
        ];
        let call = determine_metabolizer_phenotype("CYP2C19", &variants);
        assert_eq!(call.diplotype, "*1/*17");
        assert_eq!(call.functionality, "Normal/Increased");
        assert_eq!(call.phenotype, "Ultrarapid Metabolizer");
        assert_eq!(call.source, "PharmGKB/CPIC");
    }

    #[test]
    fn homozygous_loss_of_function_is_poor() {
        let variants = vec![variant_with_rsid("CYP2C19", "rs4244285")];
        let call = determine_metabolizer_phenotype("CYP2C19", &variants);
        assert_eq!(call.diplotype, "*2/*2");
        assert_eq!(call.phenotype, "Poor Metabolizer");
    }

    #[test]
    fn no_variants_yields_not_determined() {
        let call = determine_metabolizer_phenotype("CYP2C19", &[]);
        assert_eq!(call.phenotype, "Not determined");
        assert_eq!(call.diplotype, "Unknown/Unknown");
    }

    #[test]
    fn star_allele_read_from_annotation_text() {
        assert_eq!(
            star_allele_from_text("Patients with CYP2C19*17 show increased activity"),
            Some("*17".to_string())
        );
        assert_eq!(star_allele_from_text("no allele here"), None);

        let mut variant = variant_with_rsid("CYP2C19", "rs0");
        variant.pharmgkb = Some(PharmGkbBlock {
            annotations: vec![PharmGkbAnnotation {
                annotation_id: "1".into(),
                accession_id: None,
                name: None,
                evidence_level: None,
                score: None,
                clinical_annotation_types: Vec::new(),
                related_chemicals: Vec::new(),
                allele_phenotypes: vec![AllelePhenotype {
                    allele: Some("*2".into()),
                    phenotype: "Poor metabolizer".into(),
                }],
                related_diseases: Vec::new(),
                history: Vec::new(),
            }],
            ..Default::default()
        });
        let call = determine_metabolizer_phenotype("CYP2C19", &[variant.clone(), variant]);
        assert_eq!(call.diplotype, "*2/*2");
        assert_eq!(call.phenotype, "Poor Metabolizer");
    }

    #[test]
    fn unknown_gene_alleles_are_unknown_metabolizer() {
        let variants = vec![
            variant_with_rsid("TPMT", "rs1800462"),
            variant_with_rsid("TPMT", "rs1800460"),
        ];
        let call = determine_metabolizer_phenotype("TPMT", &variants);
        // Both alleles default to *1 but TPMT has no functionality rows.
        assert_eq!(call.phenotype, "Unknown Metabolizer");
    }
}
