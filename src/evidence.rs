//! Evidence-level interpretation for PharmGKB, ClinVar and CPIC, plus
//! the combined confidence score. The vocabularies are closed; unknown
//! levels get an explicit "Unknown" record rather than being dropped.

use serde::{Deserialize, Serialize};

const PHARMGKB_URL: &str = "https://www.pharmgkb.org/page/clinAnnLevels";
const CLINVAR_URL: &str = "https://www.ncbi.nlm.nih.gov/clinvar/docs/review_status/";
const CPIC_URL: &str = "https://cpicpgx.org/resources/term-id-tables/";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceInterpretation {
    pub level: String,
    pub source: String,
    pub strength: String,
    pub description: String,
    pub clinical_actionability: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    pub url: String,
}

pub fn interpret_pharmgkb_level(level: &str) -> EvidenceInterpretation {
    let level = level.trim().to_ascii_uppercase();
    let (strength, description, actionability, recommendation) = match level.as_str() {
        "1A" => (
            "High",
            "Variant-drug association supported by a preponderance of evidence, replicated in multiple cohorts.",
            "Strong - Dosing guidelines available",
            "Genetic testing recommended before prescribing",
        ),
        "1B" => (
            "High",
            "Variant-drug association supported by a preponderance of evidence, not yet replicated across cohorts.",
            "Strong - Single well-powered study",
            "Genetic testing may be considered",
        ),
        "2A" => (
            "Moderate",
            "Evidence suggests an association exists but is not definitive.",
            "Moderate - Some clinical evidence",
            "Consider genetic testing in specific populations",
        ),
        "2B" => (
            "Moderate",
            "Evidence suggests an association but is neither definitive nor replicated.",
            "Moderate - Limited replication",
            "Research setting primarily",
        ),
        "3" => (
            "Low",
            "Based on a single significant study or studies with contradictory results.",
            "Low - Conflicting or limited evidence",
            "Not recommended for routine clinical use",
        ),
        "4" => (
            "Very Low",
            "Based on case reports, in vitro or functional assay data, or non-significant statistics.",
            "Very Low - Preliminary evidence only",
            "Research use only",
        ),
        _ => (
            "Unknown",
            "Unknown PharmGKB evidence level.",
            "Cannot determine",
            "Consult PharmGKB documentation",
        ),
    };
    EvidenceInterpretation {
        level,
        source: "PharmGKB".to_string(),
        strength: strength.to_string(),
        description: description.to_string(),
        clinical_actionability: actionability.to_string(),
        recommendation: Some(recommendation.to_string()),
        url: PHARMGKB_URL.to_string(),
    }
}

pub fn interpret_clinvar_stars(stars: u8) -> EvidenceInterpretation {
    let (strength, description, actionability) = match stars {
        0 => (
            "Very Low",
            "No assertion criteria provided, or only case reports and in vitro studies.",
            "Not recommended for clinical use",
        ),
        1 => (
            "Low",
            "Criteria provided by a single submitter with no conflicts.",
            "Limited clinical utility",
        ),
        2 => (
            "Moderate",
            "Criteria provided by multiple submitters with no conflicts.",
            "Moderate clinical utility",
        ),
        3 => (
            "High",
            "Reviewed by an expert panel.",
            "High clinical utility",
        ),
        _ => (
            "Very High",
            "Assertion is part of practice guidelines.",
            "Recommended for clinical use",
        ),
    };
    EvidenceInterpretation {
        level: format!("{} stars", stars.min(4)),
        source: "ClinVar".to_string(),
        strength: strength.to_string(),
        description: description.to_string(),
        clinical_actionability: actionability.to_string(),
        recommendation: None,
        url: CLINVAR_URL.to_string(),
    }
}

pub fn interpret_cpic_level(level: &str) -> EvidenceInterpretation {
    let level = level.trim().to_ascii_uppercase();
    let (strength, description, actionability, recommendation) = match level.as_str() {
        "A" => (
            "Strong",
            "Genetic information should be used to guide therapy.",
            "Genetic testing recommended",
            "Prescribing should be changed based on genotype",
        ),
        "B" => (
            "Moderate",
            "Genetic information could be used to guide therapy.",
            "Genetic testing may be beneficial",
            "Consider alternative therapy or dosing based on genotype",
        ),
        "C" => (
            "Optional",
            "Genetic information may provide additional insight.",
            "Limited clinical benefit",
            "Genotype may provide additional information",
        ),
        "D" => (
            "No Recommendation",
            "Insufficient evidence to recommend genetic testing.",
            "Not recommended",
            "Insufficient evidence for clinical action",
        ),
        _ => (
            "Unknown",
            "Unknown CPIC level.",
            "Cannot determine",
            "Consult CPIC documentation",
        ),
    };
    EvidenceInterpretation {
        level,
        source: "CPIC".to_string(),
        strength: strength.to_string(),
        description: description.to_string(),
        clinical_actionability: actionability.to_string(),
        recommendation: Some(recommendation.to_string()),
        url: CPIC_URL.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverallConfidence {
    pub overall_confidence: String,
    pub score: f64,
    pub max_score: u8,
    pub sources: Vec<String>,
    pub recommendation: String,
    pub evidence_count: usize,
}

fn pharmgkb_score(level: &str) -> f64 {
    match level.trim().to_ascii_uppercase().as_str() {
        "1A" => 5.0,
        "1B" => 4.0,
        "2A" => 3.0,
        "2B" => 2.0,
        "3" => 1.0,
        _ => 0.0,
    }
}

fn cpic_score(level: &str) -> f64 {
    match level.trim().to_ascii_uppercase().as_str() {
        "A" => 5.0,
        "B" => 3.0,
        "C" => 1.0,
        _ => 0.0,
    }
}

/// Mean of the mapped per-source scores, binned:
/// ≥4 Very High, ≥3 High, ≥2 Moderate, ≥1 Low, <1 Very Low.
pub fn overall_confidence(
    pharmgkb_level: Option<&str>,
    clinvar_stars: Option<u8>,
    cpic_level: Option<&str>,
) -> OverallConfidence {
    let mut scores: Vec<f64> = Vec::new();
    let mut sources: Vec<String> = Vec::new();

    if let Some(level) = pharmgkb_level {
        scores.push(pharmgkb_score(level));
        sources.push(format!("PharmGKB {level}"));
    }
    if let Some(stars) = clinvar_stars {
        scores.push(f64::from(stars.min(4)));
        sources.push(format!("ClinVar {stars} stars"));
    }
    if let Some(level) = cpic_level {
        scores.push(cpic_score(level));
        sources.push(format!("CPIC {level}"));
    }

    if scores.is_empty() {
        return OverallConfidence {
            overall_confidence: "Unknown".to_string(),
            score: 0.0,
            max_score: 5,
            sources,
            recommendation: "Insufficient evidence for assessment".to_string(),
            evidence_count: 0,
        };
    }

    let average = scores.iter().sum::<f64>() / scores.len() as f64;
    let (confidence, recommendation) = if average >= 4.0 {
        ("Very High", "Strong evidence - recommended for clinical use")
    } else if average >= 3.0 {
        ("High", "Good evidence - consider for clinical use")
    } else if average >= 2.0 {
        ("Moderate", "Moderate evidence - may be useful in specific contexts")
    } else if average >= 1.0 {
        ("Low", "Limited evidence - research setting primarily")
    } else {
        ("Very Low", "Insufficient evidence - not recommended for clinical use")
    };

    OverallConfidence {
        overall_confidence: confidence.to_string(),
        score: (average * 10.0).round() / 10.0,
        max_score: 5,
        sources,
        recommendation: recommendation.to_string(),
        evidence_count: scores.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pharmgkb_interpretations_track_level() {
        let top = interpret_pharmgkb_level("1a");
        assert_eq!(top.level, "1A");
        assert_eq!(top.strength, "High");

        let unknown = interpret_pharmgkb_level("9Z");
        assert_eq!(unknown.strength, "Unknown");
    }

    #[test]
    fn clinvar_stars_cap_at_four() {
        assert_eq!(interpret_clinvar_stars(4).strength, "Very High");
        assert_eq!(interpret_clinvar_stars(9).level, "4 stars");
        assert_eq!(interpret_clinvar_stars(0).strength, "Very Low");
    }

    #[test]
    fn overall_confidence_averages_and_bins() {
        // 1A (5) + 3 stars (3) + A (5) = 13/3 ≈ 4.3 → Very High.
        let confidence = overall_confidence(Some("1A"), Some(3), Some("A"));
        assert_eq!(confidence.overall_confidence, "Very High");
        assert_eq!(confidence.evidence_count, 3);
        assert_eq!(confidence.score, 4.3);

        // 2A (3) + 2 stars (2) = 2.5 → Moderate.
        let confidence = overall_confidence(Some("2A"), Some(2), None);
        assert_eq!(confidence.overall_confidence, "Moderate");

        // 4 (0) + 1 star (1) = 0.5 → Very Low.
        let confidence = overall_confidence(Some("4"), Some(1), None);
        assert_eq!(confidence.overall_confidence, "Very Low");

        let empty = overall_confidence(None, None, None);
        assert_eq!(empty.overall_confidence, "Unknown");
        assert_eq!(empty.evidence_count, 0);
    }

    #[test]
    fn dropping_the_strongest_source_never_raises_the_score() {
        let with_all = overall_confidence(Some("1A"), Some(2), Some("A"));
        let without_pharmgkb = overall_confidence(None, Some(2), Some("A"));
        let without_cpic = overall_confidence(Some("1A"), Some(2), None);
        assert!(without_pharmgkb.score <= with_all.score);
        assert!(without_cpic.score <= with_all.score);
    }
}
