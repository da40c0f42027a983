use std::{
    fs,
    io::Write,
    path::Path,
};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::AppError;

pub fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, AppError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Reads a line-delimited JSON stream, skipping blank lines.
pub fn read_jsonl<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>, AppError> {
    let raw = fs::read_to_string(path)?;
    let mut items = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        items.push(serde_json::from_str(line)?);
    }
    Ok(items)
}

/// Writes one record per line to a temporary file next to the destination and
/// atomically renames it into place. A failed write never clobbers an
/// existing artifact.
pub fn write_jsonl_atomic<T: Serialize>(
    items: &[T],
    path: impl AsRef<Path>,
) -> Result<(), AppError> {
    let path = path.as_ref();
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let mut file = tempfile::NamedTempFile::new_in(parent)?;
    for item in items {
        serde_json::to_writer(&mut file, item)?;
        file.write_all(b"\n")?;
    }
    file.flush()?;
    file.persist(path).map_err(|err| AppError::Io(err.error))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: u32,
        text: String,
    }

    #[test]
    fn jsonl_round_trip() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("rows.jsonl");
        let rows = vec![
            Row {
                id: 1,
                text: "first".into(),
            },
            Row {
                id: 2,
                text: "second".into(),
            },
        ];

        write_jsonl_atomic(&rows, &path).expect("write");
        let loaded: Vec<Row> = read_jsonl(&path).expect("read");
        assert_eq!(loaded, rows);
    }

    #[test]
    fn write_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested/deep/rows.jsonl");

        write_jsonl_atomic(&[Row { id: 1, text: "x".into() }], &path).expect("write");
        assert!(path.exists());
    }

    #[test]
    fn unwritable_destination_is_an_io_error() {
        let err = write_jsonl_atomic(&[Row { id: 1, text: "x".into() }], "/proc/nope/rows.jsonl")
            .expect_err("should fail");
        assert!(matches!(err, AppError::Io(_)), "got {err:?}");
    }
}
