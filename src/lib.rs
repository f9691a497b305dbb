//! pgx-kg — per-patient pharmacogenomics knowledge graphs.
//!
//! The crate discovers clinically significant variants for a set of
//! genes, enriches them with clinical and pharmacological evidence from
//! external knowledge bases (UniProt/EMBL-EBI, ClinVar, PharmGKB,
//! ChEMBL, OpenFDA, Europe PMC, BioPortal SNOMED CT, RxNorm), links the
//! result back to a patient's medications and conditions, detects
//! drug–gene conflicts, and emits a canonical JSON-LD patient document
//! plus derived reports.

pub mod assemble;
pub mod config;
pub mod entities;
pub mod error;
pub mod events;
pub mod evidence;
pub mod extract;
pub mod linker;
pub mod phases;
pub mod pipeline;
pub mod resolve;
pub mod sources;
