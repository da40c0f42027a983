use std::{collections::HashSet, path::Path};

use text_splitter::TextSplitter;
use tracing::{debug, info};

use common::{
    error::AppError,
    storage::jsonl::write_jsonl_atomic,
    types::{
        chunk::{normalize_text, Chunk},
        program::{load_programs, ProgramRecord},
    },
};

/// Section label under which a program's free-form description is chunked.
const DESCRIPTION_LABEL: &str = "description";

/// Converts validated program records into a flat, deduplicated sequence of
/// retrievable chunks. Deterministic: unchanged input yields byte-identical
/// chunk ids in the same order.
pub fn build_corpus(records: &[ProgramRecord], max_chunk_chars: usize) -> Vec<Chunk> {
    let splitter = TextSplitter::new(max_chunk_chars.max(1));
    let mut seen: HashSet<String> = HashSet::new();
    let mut chunks: Vec<Chunk> = Vec::new();

    for record in records {
        let mut sections: Vec<(&str, &str)> = Vec::new();
        if !record.description.trim().is_empty() {
            sections.push((DESCRIPTION_LABEL, record.description.as_str()));
        }
        for section in &record.sections {
            sections.push((section.label.as_str(), section.text.as_str()));
        }

        for (label, text) in sections {
            let mut kept = 0usize;
            // Sequence number reflects the piece's position within its
            // source section, whether or not earlier pieces were dropped as
            // duplicates, so ids stay traceable to the source text.
            for (sequence, piece) in splitter.chunks(text).enumerate() {
                let piece = piece.trim();
                if piece.is_empty() {
                    continue;
                }
                // First occurrence wins; order is input program order.
                if !seen.insert(normalize_text(piece)) {
                    debug!(
                        program_id = %record.id,
                        section = %label,
                        sequence,
                        "dropping duplicate chunk"
                    );
                    continue;
                }
                chunks.push(Chunk::new(&record.id, label, sequence, piece, &record.url));
                kept += 1;
            }
            debug!(program_id = %record.id, section = %label, kept, "chunked section");
        }
    }

    chunks
}

/// Full offline build step: scraper document in, corpus file out.
/// Fails with `Schema` on malformed input and `Io` on unwritable output;
/// the output path is never partially overwritten.
pub fn run_build(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    max_chunk_chars: usize,
) -> Result<usize, AppError> {
    let records = load_programs(input)?;
    let chunks = build_corpus(&records, max_chunk_chars);
    write_jsonl_atomic(&chunks, &output)?;
    info!(
        programs = records.len(),
        chunks = chunks.len(),
        output = %output.as_ref().display(),
        "wrote corpus"
    );
    Ok(chunks.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::program::ProgramSection;

    fn record(id: &str, description: &str, sections: Vec<(&str, &str)>) -> ProgramRecord {
        ProgramRecord {
            id: id.into(),
            title: format!("{id} program"),
            url: format!("https://example.edu/{id}"),
            description: description.into(),
            sections: sections
                .into_iter()
                .map(|(label, text)| ProgramSection {
                    label: label.into(),
                    text: text.into(),
                })
                .collect(),
        }
    }

    #[test]
    fn short_section_becomes_exactly_one_chunk() {
        let records = vec![record(
            "ai",
            "",
            vec![("facts", "Duration: 2 years; language: Russian.")],
        )];

        let chunks = build_corpus(&records, 800);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section_label, "facts");
        assert_eq!(chunks[0].program_id, "ai");
        assert_eq!(chunks[0].text, "Duration: 2 years; language: Russian.");
    }

    #[test]
    fn long_section_splits_within_bound_at_sentence_breaks() {
        let sentence = "Students study applied machine learning in depth. ";
        let text = sentence.repeat(20);
        let records = vec![record("ai", "", vec![("curriculum", &text)])];

        let chunks = build_corpus(&records, 120);
        assert!(chunks.len() > 1, "expected the section to split");
        for chunk in &chunks {
            assert!(chunk.text.len() <= 120, "chunk over bound: {}", chunk.text.len());
            assert!(
                chunk.text.ends_with('.'),
                "chunk should end on a sentence boundary: {:?}",
                chunk.text
            );
        }
    }

    #[test]
    fn description_is_chunked_under_its_own_label() {
        let records = vec![record("ai", "A two year master's program.", vec![])];

        let chunks = build_corpus(&records, 800);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section_label, "description");
    }

    #[test]
    fn rebuilding_unchanged_input_is_byte_identical() {
        let records = vec![
            record(
                "ai",
                "Research-heavy program in machine learning.",
                vec![("admission", "Portfolio and interview required.")],
            ),
            record("ai_product", "", vec![("career", "Product management roles.")]),
        ];

        let first = build_corpus(&records, 800);
        let second = build_corpus(&records, 800);
        assert_eq!(first, second);

        let ids: Vec<&str> = first.iter().map(|c| c.chunk_id.as_str()).collect();
        let ids_again: Vec<&str> = second.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, ids_again);
    }

    #[test]
    fn duplicate_text_across_programs_keeps_first_occurrence() {
        let records = vec![
            record("ai", "", vec![("contacts", "Email: office@example.edu")]),
            record("ai_product", "", vec![("contacts", "email:  office@example.edu")]),
        ];

        let chunks = build_corpus(&records, 800);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].program_id, "ai", "first program wins");
    }

    #[test]
    fn empty_sections_produce_no_chunks() {
        let records = vec![record("ai", "   ", vec![("facts", " \n ")])];
        assert!(build_corpus(&records, 800).is_empty());
    }

    #[test]
    fn run_build_round_trips_through_the_corpus_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let input = dir.path().join("programs.json");
        let output = dir.path().join("corpus.jsonl");

        let document = serde_json::json!([{
            "id": "ai",
            "title": "Artificial Intelligence",
            "url": "https://example.edu/ai",
            "description": "Two year program taught in Russian.",
            "sections": [{"label": "admission", "text": "Portfolio and interview."}]
        }]);
        std::fs::write(&input, document.to_string()).expect("write input");

        let count = run_build(&input, &output, 800).expect("build");
        assert_eq!(count, 2);

        let loaded: Vec<Chunk> =
            common::storage::jsonl::read_jsonl(&output).expect("read corpus");
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().all(|c| !c.text.is_empty()));
    }

    #[test]
    fn run_build_rejects_malformed_document() {
        let dir = tempfile::tempdir().expect("temp dir");
        let input = dir.path().join("programs.json");
        let output = dir.path().join("corpus.jsonl");
        std::fs::write(&input, "{\"not\": \"an array\"}").expect("write input");

        let err = run_build(&input, &output, 800).expect_err("should fail");
        assert!(matches!(err, AppError::Schema(_)), "got {err:?}");
        assert!(!output.exists(), "no partial artifact on failure");
    }
}
