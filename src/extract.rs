//! Fallback readers for heterogeneous upstream payloads.
//!
//! Upstream JSON uses inconsistent keys (`gene` vs `gene_symbol` vs
//! `hasGene`, `genomicLocation` singular or plural, xref database names in
//! mixed case). Key-variation handling is centralised here; callers read
//! canonical values and emit only canonical keys.

use serde_json::Value;

/// First non-empty string found under any of the candidate keys.
pub fn str_any<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    for key in keys {
        if let Some(found) = value.get(key).and_then(Value::as_str) {
            let found = found.trim();
            if !found.is_empty() {
                return Some(found);
            }
        }
    }
    None
}

/// Number under any of the candidate keys, accepting numeric strings.
pub fn number_any(value: &Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        match value.get(key) {
            Some(Value::Number(n)) => return n.as_f64(),
            Some(Value::String(s)) => {
                if let Ok(parsed) = s.trim().parse::<f64>() {
                    return Some(parsed);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn gene_symbol(value: &Value) -> Option<&str> {
    str_any(value, &["gene", "gene_symbol", "geneSymbol", "hasGene"])
}

/// `genomicLocation` appears both as a single string and as an array of
/// strings. A `raw_data` copy, when present, takes precedence over the
/// normalised field.
pub fn genomic_locations(value: &Value) -> Vec<String> {
    if let Some(raw) = value.get("raw_data") {
        let from_raw = genomic_locations_direct(raw);
        if !from_raw.is_empty() {
            return from_raw;
        }
    }
    genomic_locations_direct(value)
}

fn genomic_locations_direct(value: &Value) -> Vec<String> {
    match value.get("genomicLocation") {
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        Some(Value::Array(rows)) => rows
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Cross-reference id for a database, matching the name case-insensitively.
pub fn xref_id<'a>(value: &'a Value, database: &str) -> Option<&'a str> {
    let xrefs = value.get("xrefs")?.as_array()?;
    xrefs.iter().find_map(|xref| {
        let name = xref.get("name").and_then(Value::as_str)?;
        if !name.trim().eq_ignore_ascii_case(database) {
            return None;
        }
        xref.get("id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
    })
}

/// dbSNP rsID in canonical `rs<digits>` form. Never fabricated: bare
/// numeric ids get the prefix, anything else is rejected.
pub fn canonical_rsid(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let digits = raw.strip_prefix("rs").unwrap_or(raw);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        Some(format!("rs{digits}"))
    } else {
        None
    }
}

pub fn rsid_from_xrefs(value: &Value) -> Option<String> {
    xref_id(value, "dbSNP").and_then(canonical_rsid)
}

/// Protein-level change (`p.XnY`) from the `locations` array.
pub fn protein_change(value: &Value) -> Option<&str> {
    let locations = value.get("locations")?.as_array()?;
    locations.iter().find_map(|loc| {
        loc.get("loc")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|l| l.starts_with("p."))
    })
}

/// Position keys used to match a copied variant back to its original when
/// the copy was stripped of `evidences`.
pub fn location_positions(value: &Value) -> Vec<i64> {
    let mut out: Vec<i64> = value
        .get("locations")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|loc| {
                    loc.get("position")
                        .and_then(|p| p.get("position"))
                        .and_then(|p| p.get("value"))
                        .and_then(Value::as_i64)
                })
                .collect()
        })
        .unwrap_or_default();
    out.sort_unstable();
    out
}

pub fn clinical_significances(value: &Value) -> Vec<String> {
    value
        .get("clinicalSignificances")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|sig| sig.get("type").and_then(Value::as_str))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Population → allele frequency from an embedded
/// `populationFrequencies` block. Population keys vary (`populationName`
/// vs `population`); the first non-null frequency per population wins.
pub fn population_frequencies(value: &Value) -> std::collections::BTreeMap<String, f64> {
    let mut out = std::collections::BTreeMap::new();
    let Some(rows) = value.get("populationFrequencies").and_then(Value::as_array) else {
        return out;
    };
    for row in rows {
        let Some(population) = str_any(row, &["populationName", "population"]) else {
            continue;
        };
        let Some(frequency) = number_any(row, &["frequency"]) else {
            continue;
        };
        out.entry(population.to_string()).or_insert(frequency);
    }
    out
}

/// PubMed ids referenced by a variant's `evidences`, either as a direct
/// `source.id` or as the tail of a `source.url`.
pub fn evidence_pubmed_ids(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    let Some(evidences) = value.get("evidences").and_then(Value::as_array) else {
        return out;
    };
    for evidence in evidences {
        let Some(source) = evidence.get("source") else {
            continue;
        };
        let name = source.get("name").and_then(Value::as_str).unwrap_or("");
        if !name.trim().eq_ignore_ascii_case("pubmed") {
            continue;
        }
        let pmid = source
            .get("id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| id.bytes().all(|b| b.is_ascii_digit()) && !id.is_empty())
            .map(str::to_string)
            .or_else(|| {
                source
                    .get("url")
                    .and_then(Value::as_str)
                    .and_then(|url| url.rsplit('/').next())
                    .map(str::trim)
                    .filter(|id| id.bytes().all(|b| b.is_ascii_digit()) && !id.is_empty())
                    .map(str::to_string)
            });
        if let Some(pmid) = pmid {
            if !out.contains(&pmid) {
                out.push(pmid);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn str_any_walks_key_variants() {
        let value = json!({"geneSymbol": "CYP2C19"});
        assert_eq!(gene_symbol(&value), Some("CYP2C19"));
        let value = json!({"hasGene": "  CYP2D6  "});
        assert_eq!(gene_symbol(&value), Some("CYP2D6"));
        assert_eq!(gene_symbol(&json!({"gene": ""})), None);
    }

    #[test]
    fn genomic_location_accepts_singular_and_plural() {
        let singular = json!({"genomicLocation": "NC_000022.11:g.42130692G>A"});
        assert_eq!(
            genomic_locations(&singular),
            vec!["NC_000022.11:g.42130692G>A".to_string()]
        );

        let plural = json!({"genomicLocation": ["a", "b"]});
        assert_eq!(genomic_locations(&plural).len(), 2);
    }

    #[test]
    fn raw_data_genomic_location_wins() {
        let value = json!({
            "genomicLocation": "normalised",
            "raw_data": {"genomicLocation": ["NC_000010.11:g.94781859G>A"]}
        });
        assert_eq!(
            genomic_locations(&value),
            vec!["NC_000010.11:g.94781859G>A".to_string()]
        );
    }

    #[test]
    fn rsid_is_canonicalised_never_fabricated() {
        assert_eq!(canonical_rsid("rs4244285").as_deref(), Some("rs4244285"));
        assert_eq!(canonical_rsid("4244285").as_deref(), Some("rs4244285"));
        assert_eq!(canonical_rsid("VCV000012345"), None);
        assert_eq!(canonical_rsid(""), None);
        assert_eq!(canonical_rsid("rs"), None);
    }

    #[test]
    fn xref_lookup_is_case_insensitive() {
        let value = json!({"xrefs": [
            {"name": "dbsnp", "id": "rs1065852"},
            {"name": "ClinVar", "id": "RCV000000001"}
        ]});
        assert_eq!(xref_id(&value, "dbSNP"), Some("rs1065852"));
        assert_eq!(rsid_from_xrefs(&value).as_deref(), Some("rs1065852"));
    }

    #[test]
    fn pubmed_ids_from_evidence_urls_and_ids() {
        let value = json!({"evidences": [
            {"source": {"name": "pubmed", "id": "12345"}},
            {"source": {"name": "pubmed", "url": "https://www.ncbi.nlm.nih.gov/pubmed/67890"}},
            {"source": {"name": "pubmed", "id": "12345"}},
            {"source": {"name": "Ensembl", "id": "ENSP0001"}}
        ]});
        assert_eq!(evidence_pubmed_ids(&value), vec!["12345", "67890"]);
    }

    #[test]
    fn population_frequencies_accept_key_variants() {
        let value = json!({"populationFrequencies": [
            {"populationName": "East Asian", "frequency": 0.31, "source": "gnomAD"},
            {"population": "African", "frequency": "0.17"},
            {"populationName": "European", "frequency": null},
            {"populationName": "East Asian", "frequency": 0.99}
        ]});
        let frequencies = population_frequencies(&value);
        assert_eq!(frequencies.get("East Asian"), Some(&0.31));
        assert_eq!(frequencies.get("African"), Some(&0.17));
        assert!(!frequencies.contains_key("European"));
    }

    #[test]
    fn location_positions_sorted_for_matching() {
        let value = json!({"locations": [
            {"position": {"position": {"value": 331}}},
            {"position": {"position": {"value": 12}}}
        ]});
        assert_eq!(location_positions(&value), vec![12, 331]);
    }
}
