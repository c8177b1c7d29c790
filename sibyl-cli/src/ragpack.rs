//! RAGpack loading
//!
//! A RAGpack directory carries pre-embedded chunks: `chunks.json` (array
//! of strings), `embeddings.csv` (one comma-separated f32 row per chunk),
//! and an optional `metadata.json`. The engine only ever sees the parsed
//! `(content, embedding)` pairs.

use sibyl_core::{corrupt_error, not_found_error, Chunk, SibylResult};
use std::path::Path;
use tracing::{debug, info};

/// Parsed RAGpack contents
pub struct RagPack {
    pub chunks: Vec<Chunk>,
    pub metadata: Option<serde_json::Value>,
}

impl RagPack {
    pub fn dimension(&self) -> Option<usize> {
        self.chunks.first().map(|c| c.embedding.len())
    }
}

fn parse_embeddings_csv(raw: &str) -> SibylResult<Vec<Vec<f32>>> {
    let mut rows = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let row: Result<Vec<f32>, _> = line.split(',').map(|v| v.trim().parse::<f32>()).collect();
        match row {
            Ok(values) => rows.push(values),
            Err(_) => {
                return Err(corrupt_error!(
                    format!("embeddings.csv line {} is not a float row", line_no + 1),
                    "ragpack"
                ));
            }
        }
    }
    Ok(rows)
}

/// Load a RAGpack directory into chunks
pub fn load_ragpack(dir: &Path) -> SibylResult<RagPack> {
    if !dir.is_dir() {
        return Err(not_found_error!(dir.display(), "ragpack"));
    }

    let chunks_path = dir.join("chunks.json");
    let embeddings_path = dir.join("embeddings.csv");
    if !chunks_path.is_file() {
        return Err(not_found_error!(chunks_path.display(), "ragpack"));
    }
    if !embeddings_path.is_file() {
        return Err(not_found_error!(embeddings_path.display(), "ragpack"));
    }

    let contents: Vec<String> = serde_json::from_str(&std::fs::read_to_string(&chunks_path)?)
        .map_err(|_| {
            corrupt_error!("chunks.json is not a JSON array of strings", "ragpack")
        })?;
    let embeddings = parse_embeddings_csv(&std::fs::read_to_string(&embeddings_path)?)?;

    if contents.len() != embeddings.len() {
        return Err(corrupt_error!(
            format!(
                "embeddings.csv has {} rows but chunks.json has {} entries",
                embeddings.len(),
                contents.len()
            ),
            "ragpack"
        ));
    }
    if let Some(first) = embeddings.first() {
        let dim = first.len();
        if embeddings.iter().any(|row| row.len() != dim) {
            return Err(corrupt_error!(
                "embeddings.csv rows have inconsistent dimensions",
                "ragpack"
            ));
        }
    }

    let metadata_path = dir.join("metadata.json");
    let metadata = if metadata_path.is_file() {
        let value = serde_json::from_str(&std::fs::read_to_string(&metadata_path)?)
            .map_err(|_| corrupt_error!("metadata.json is not valid JSON", "ragpack"))?;
        debug!("Loaded RAGpack metadata");
        Some(value)
    } else {
        None
    };

    let chunks = contents
        .into_iter()
        .zip(embeddings)
        .map(|(content, embedding)| Chunk::new(content, embedding))
        .collect::<Vec<_>>();

    info!("Loaded RAGpack with {} chunks from {}", chunks.len(), dir.display());
    Ok(RagPack { chunks, metadata })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sibyl_core::SibylError;

    fn write_pack(dir: &Path, chunks: &str, embeddings: &str) {
        std::fs::write(dir.join("chunks.json"), chunks).unwrap();
        std::fs::write(dir.join("embeddings.csv"), embeddings).unwrap();
    }

    #[test]
    fn test_load_valid_pack() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(dir.path(), r#"["one", "two"]"#, "1.0,0.0\n0.0,1.0\n");
        std::fs::write(dir.path().join("metadata.json"), r#"{"name":"demo"}"#).unwrap();

        let pack = load_ragpack(dir.path()).unwrap();
        assert_eq!(pack.chunks.len(), 2);
        assert_eq!(pack.dimension(), Some(2));
        assert_eq!(pack.chunks[0].content, "one");
        assert_eq!(pack.chunks[1].embedding, vec![0.0, 1.0]);
        assert!(pack.metadata.is_some());
    }

    #[test]
    fn test_missing_directory_is_not_found() {
        let result = load_ragpack(Path::new("/nonexistent/pack"));
        assert!(matches!(result, Err(SibylError::NotFound { .. })));
    }

    #[test]
    fn test_row_count_mismatch_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(dir.path(), r#"["one", "two"]"#, "1.0,0.0\n");

        let result = load_ragpack(dir.path());
        assert!(matches!(result, Err(SibylError::Corrupt { .. })));
    }

    #[test]
    fn test_ragged_rows_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(dir.path(), r#"["one", "two"]"#, "1.0,0.0\n0.5\n");

        let result = load_ragpack(dir.path());
        assert!(matches!(result, Err(SibylError::Corrupt { .. })));
    }

    #[test]
    fn test_non_numeric_cell_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(dir.path(), r#"["one"]"#, "1.0,abc\n");

        let result = load_ragpack(dir.path());
        assert!(matches!(result, Err(SibylError::Corrupt { .. })));
    }
}
