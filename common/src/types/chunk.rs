use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Smallest retrievable unit of corpus text. Created once at corpus-build
/// time; the corpus file is the sole persisted form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub program_id: String,
    pub section_label: String,
    pub text: String,
    pub source_url: String,
}

impl Chunk {
    pub fn new(
        program_id: impl Into<String>,
        section_label: impl Into<String>,
        sequence: usize,
        text: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        let program_id = program_id.into();
        let section_label = section_label.into();
        Self {
            chunk_id: derive_chunk_id(&program_id, &section_label, sequence),
            program_id,
            section_label,
            text: text.into(),
            source_url: source_url.into(),
        }
    }

    /// Key used for cross-program deduplication: case- and whitespace-folded text.
    pub fn normalized_text(&self) -> String {
        normalize_text(&self.text)
    }
}

pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Deterministic identifier so that rebuilding from unchanged input yields
/// byte-identical ids. Fields are separated by a unit separator so that
/// ("a", "bc") and ("ab", "c") cannot collide.
pub fn derive_chunk_id(program_id: &str, section_label: &str, sequence: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(program_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(section_label.as_bytes());
    hasher.update([0x1f]);
    hasher.update(sequence.to_string().as_bytes());

    let digest = hasher.finalize();
    digest
        .iter()
        .take(8)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
