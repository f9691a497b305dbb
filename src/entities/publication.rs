use serde::{Deserialize, Serialize};

/// A literature reference, content-addressed by PMID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publication {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmcid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub citation_count: u64,
    pub full_text_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    #[serde(default)]
    pub open_access: bool,
    /// Which upstream asserted the reference (e.g. "UniProt").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// ECO code carried from UniProt evidence rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_code: Option<String>,
}

impl Publication {
    /// Placeholder used when hydration against Europe PMC fails: the PMID
    /// and its UniProt provenance survive, everything else stays empty.
    pub fn uniprot_fallback(pmid: &str) -> Self {
        Self {
            pmid: Some(pmid.to_string()),
            pmcid: None,
            doi: None,
            title: format!("UniProt Evidence (PMID:{pmid})"),
            authors: Vec::new(),
            journal: None,
            year: None,
            abstract_text: Some("Direct evidence from UniProt variant annotation".to_string()),
            citation_count: 0,
            full_text_url: None,
            pdf_url: None,
            open_access: false,
            source: Some("UniProt".to_string()),
            evidence_code: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_keeps_pmid_and_emits_null_full_text_url() {
        let publication = Publication::uniprot_fallback("20492469");
        assert_eq!(publication.pmid.as_deref(), Some("20492469"));
        assert_eq!(publication.title, "UniProt Evidence (PMID:20492469)");
        assert!(publication.full_text_url.is_none());

        // full_text_url serialises as an explicit null so downstream
        // consumers can distinguish "no full text" from "not looked up".
        let value = serde_json::to_value(&publication).unwrap();
        assert!(value.get("full_text_url").unwrap().is_null());
    }
}
