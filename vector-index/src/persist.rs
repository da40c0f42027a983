use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use common::{
    error::AppError,
    storage::jsonl::{read_json, read_jsonl, write_jsonl_atomic},
    types::chunk::Chunk,
};

use crate::VectorIndex;

const MANIFEST_FILE: &str = "manifest.json";
const VECTORS_FILE: &str = "vectors.jsonl";
const CHUNKS_FILE: &str = "chunks.jsonl";

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    model_tag: String,
    dimension: usize,
    count: usize,
    built_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct VectorRow {
    chunk_id: String,
    vector: Vec<f32>,
}

impl VectorIndex {
    /// Persists the index bundle (vector store, chunk-metadata side-table,
    /// manifest with the model-version tag). The bundle is staged in a
    /// temporary directory and renamed into place, so a previously persisted
    /// index stays intact and servable until the new one is complete.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<(), AppError> {
        let dir = dir.as_ref();
        let parent = dir.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let staging = tempfile::tempdir_in(parent)?;

        let manifest = Manifest {
            model_tag: self.model_tag.clone(),
            dimension: self.dimension,
            count: self.chunks.len(),
            built_at: Utc::now(),
        };
        fs::write(
            staging.path().join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)?,
        )?;

        let rows: Vec<VectorRow> = self
            .chunks
            .iter()
            .zip(&self.vectors)
            .map(|(chunk, vector)| VectorRow {
                chunk_id: chunk.chunk_id.clone(),
                vector: vector.clone(),
            })
            .collect();
        write_jsonl_atomic(&rows, staging.path().join(VECTORS_FILE))?;
        write_jsonl_atomic(&self.chunks, staging.path().join(CHUNKS_FILE))?;

        // Swap-on-success: only a fully written bundle ever appears at `dir`,
        // and the previous bundle survives until the new one is installed.
        swap_into_place(staging.path(), dir)?;

        info!(
            count = manifest.count,
            dimension = manifest.dimension,
            model_tag = %manifest.model_tag,
            dir = %dir.display(),
            "persisted index bundle"
        );
        Ok(())
    }

    /// Restores a persisted bundle, verifying that the vector store, the
    /// metadata side-table, and the manifest agree before serving anything.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, AppError> {
        let dir = dir.as_ref();
        if !dir.join(MANIFEST_FILE).exists() {
            return Err(AppError::CorruptIndex(format!(
                "no index bundle at {}; run the index build first",
                dir.display()
            )));
        }

        let manifest: Manifest = read_json(dir.join(MANIFEST_FILE))
            .map_err(|err| AppError::CorruptIndex(format!("unreadable manifest: {err}")))?;
        let rows: Vec<VectorRow> = read_jsonl(dir.join(VECTORS_FILE))
            .map_err(|err| AppError::CorruptIndex(format!("unreadable vector store: {err}")))?;
        let chunks: Vec<Chunk> = read_jsonl(dir.join(CHUNKS_FILE))
            .map_err(|err| AppError::CorruptIndex(format!("unreadable chunk store: {err}")))?;

        if rows.len() != chunks.len() {
            return Err(AppError::CorruptIndex(format!(
                "vector count {} disagrees with metadata count {}",
                rows.len(),
                chunks.len()
            )));
        }
        if rows.len() != manifest.count {
            return Err(AppError::CorruptIndex(format!(
                "manifest records {} entries but stores hold {}",
                manifest.count,
                rows.len()
            )));
        }

        let mut vectors = Vec::with_capacity(rows.len());
        for (row, chunk) in rows.into_iter().zip(&chunks) {
            if row.chunk_id != chunk.chunk_id {
                return Err(AppError::CorruptIndex(format!(
                    "vector row '{}' is misaligned with chunk '{}'",
                    row.chunk_id, chunk.chunk_id
                )));
            }
            if row.vector.len() != manifest.dimension {
                return Err(AppError::CorruptIndex(format!(
                    "vector for chunk '{}' has dimension {}, manifest says {}",
                    row.chunk_id,
                    row.vector.len(),
                    manifest.dimension
                )));
            }
            vectors.push(row.vector);
        }

        Ok(Self {
            model_tag: manifest.model_tag,
            dimension: manifest.dimension,
            vectors,
            chunks,
        })
    }
}

/// Installs a fully staged bundle at `dir`. An existing bundle is moved
/// aside first and moved back if the install rename fails, so the previous
/// bundle stays loadable through every failure of this function.
fn swap_into_place(staged: &Path, dir: &Path) -> Result<(), AppError> {
    let backup = backup_path(dir);
    if backup.exists() {
        fs::remove_dir_all(&backup)?;
    }

    let had_previous = dir.exists();
    if had_previous {
        fs::rename(dir, &backup)?;
    }
    if let Err(err) = fs::rename(staged, dir) {
        if had_previous {
            let _ = fs::rename(&backup, dir);
        }
        return Err(err.into());
    }
    if had_previous {
        if let Err(err) = fs::remove_dir_all(&backup) {
            warn!(backup = %backup.display(), error = %err, "bundle backup left behind");
        }
    }
    Ok(())
}

fn backup_path(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("index");
    dir.with_file_name(format!("{name}.bak"))
}
