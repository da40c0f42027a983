use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{error::AppError, storage::jsonl::read_json};

/// One labelled block of text on a program page (curriculum, admission, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramSection {
    pub label: String,
    pub text: String,
}

/// One academic program as produced by the scraper. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramRecord {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sections: Vec<ProgramSection>,
}

impl ProgramRecord {
    fn validate(&self, position: usize) -> Result<(), AppError> {
        if self.id.trim().is_empty() {
            return Err(AppError::Schema(format!(
                "program record at position {position} has an empty 'id'"
            )));
        }
        if self.title.trim().is_empty() {
            return Err(AppError::Schema(format!(
                "program record '{}' has an empty 'title'",
                self.id
            )));
        }
        if self.url.trim().is_empty() {
            return Err(AppError::Schema(format!(
                "program record '{}' has an empty 'url'",
                self.id
            )));
        }
        for (idx, section) in self.sections.iter().enumerate() {
            if section.label.trim().is_empty() {
                return Err(AppError::Schema(format!(
                    "program record '{}' has an unlabelled section at position {idx}",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

/// Reads the scraper's JSON document and validates it into the strict
/// internal record type. The rest of the pipeline never sees raw JSON.
pub fn load_programs(path: impl AsRef<Path>) -> Result<Vec<ProgramRecord>, AppError> {
    let records: Vec<ProgramRecord> = read_json(path).map_err(|err| match err {
        AppError::Serde(e) => AppError::Schema(format!("malformed program document: {e}")),
        other => other,
    })?;

    for (position, record) in records.iter().enumerate() {
        record.validate(position)?;
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write");
        file
    }

    #[test]
    fn loads_valid_program_document() {
        let file = write_temp(
            r#"[{
                "id": "ai",
                "title": "Artificial Intelligence",
                "url": "https://example.edu/ai",
                "description": "Two year master's program.",
                "sections": [{"label": "admission", "text": "Portfolio and interview."}]
            }]"#,
        );

        let records = load_programs(file.path()).expect("should load");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "ai");
        assert_eq!(records[0].sections[0].label, "admission");
    }

    #[test]
    fn rejects_missing_required_field() {
        let file = write_temp(r#"[{"id": "ai", "title": "AI"}]"#);

        let err = load_programs(file.path()).expect_err("should fail");
        assert!(matches!(err, AppError::Schema(_)), "got {err:?}");
    }

    #[test]
    fn rejects_empty_id_with_position() {
        let file = write_temp(
            r#"[{"id": " ", "title": "AI", "url": "https://example.edu/ai"}]"#,
        );

        let err = load_programs(file.path()).expect_err("should fail");
        match err {
            AppError::Schema(msg) => assert!(msg.contains("position 0"), "got {msg}"),
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_non_array_document() {
        let file = write_temp(r#"{"id": "ai"}"#);

        let err = load_programs(file.path()).expect_err("should fail");
        assert!(matches!(err, AppError::Schema(_)));
    }
}
