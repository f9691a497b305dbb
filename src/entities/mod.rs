//! Domain model: patients, variants, drugs, publications, links and the
//! assembled pharmacogenomics profile. Everything here is plain data —
//! entities are produced by source adapters and phases, consumed by the
//! linker and assembler, and serialised into the JSON-LD outputs.

pub mod drug;
pub mod link;
pub mod patient;
pub mod profile;
pub mod publication;
pub mod variant;
