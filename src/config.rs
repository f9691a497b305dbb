use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::PgxError;

const BIOPORTAL_KEY_ENV: &str = "PGXKG_BIOPORTAL_API_KEY";
const NCBI_KEY_ENV: &str = "PGXKG_NCBI_API_KEY";
const NCBI_EMAIL_ENV: &str = "PGXKG_NCBI_EMAIL";
const ENABLE_CHEMBL_ENV: &str = "PGXKG_ENABLE_CHEMBL";
const ENABLE_OPENFDA_ENV: &str = "PGXKG_ENABLE_OPENFDA";
const ENABLE_EUROPEPMC_ENV: &str = "PGXKG_ENABLE_EUROPEPMC";

/// Runtime settings. Secret management and full configuration loading are
/// external collaborators; this reads the environment, optionally merged
/// over a `KEY=VALUE` file passed via `--config`.
#[derive(Debug, Clone)]
pub struct Config {
    pub bioportal_api_key: Option<String>,
    pub ncbi_api_key: Option<String>,
    pub ncbi_email: Option<String>,
    pub enable_chembl: bool,
    pub enable_openfda: bool,
    pub enable_europepmc: bool,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bioportal_api_key: None,
            ncbi_api_key: None,
            ncbi_email: None,
            enable_chembl: true,
            enable_openfda: false,
            enable_europepmc: true,
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("output"),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply(&env_map());
        config
    }

    /// File values are a baseline; the environment wins.
    pub fn from_file(path: &Path) -> Result<Self, PgxError> {
        let text = std::fs::read_to_string(path)?;
        let mut values = parse_key_values(&text);
        for (key, value) in env_map() {
            values.insert(key, value);
        }
        let mut config = Config::default();
        config.apply(&values);
        Ok(config)
    }

    fn apply(&mut self, values: &HashMap<String, String>) {
        self.bioportal_api_key = non_empty(values.get(BIOPORTAL_KEY_ENV));
        self.ncbi_api_key = non_empty(values.get(NCBI_KEY_ENV));
        self.ncbi_email = non_empty(values.get(NCBI_EMAIL_ENV));
        if let Some(value) = values.get(ENABLE_CHEMBL_ENV) {
            self.enable_chembl = parse_flag(value, self.enable_chembl);
        }
        if let Some(value) = values.get(ENABLE_OPENFDA_ENV) {
            self.enable_openfda = parse_flag(value, self.enable_openfda);
        }
        if let Some(value) = values.get(ENABLE_EUROPEPMC_ENV) {
            self.enable_europepmc = parse_flag(value, self.enable_europepmc);
        }
    }

    pub fn phase_dir(&self, phase: u8) -> PathBuf {
        self.data_dir.join(format!("phase{phase}"))
    }
}

fn env_map() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(key, _)| key.starts_with("PGXKG_"))
        .collect()
}

fn parse_key_values(text: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        out.insert(key.trim().to_string(), value.trim().to_string());
    }
    out
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_flag(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_lines_and_skips_comments() {
        let values = parse_key_values(
            "# comment\nPGXKG_BIOPORTAL_API_KEY = abc123\n\nPGXKG_ENABLE_OPENFDA=true\nnot a pair\n",
        );
        assert_eq!(
            values.get("PGXKG_BIOPORTAL_API_KEY").map(String::as_str),
            Some("abc123")
        );
        assert_eq!(
            values.get("PGXKG_ENABLE_OPENFDA").map(String::as_str),
            Some("true")
        );
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn flags_fall_back_on_garbage() {
        assert!(parse_flag("yes", false));
        assert!(!parse_flag("off", true));
        assert!(parse_flag("maybe", true));
    }

    #[test]
    fn default_feature_flags_match_shipping_behavior() {
        let config = Config::default();
        assert!(config.enable_chembl);
        assert!(config.enable_europepmc);
        assert!(!config.enable_openfda);
    }
}
