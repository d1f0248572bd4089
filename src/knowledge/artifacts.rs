//! Artifacts - 청크/임베딩 JSONL 파일
//!
//! build 단계가 `chunks_<stamp>.jsonl`, `embeddings_<stamp>.jsonl`을 쓰고
//! index 단계가 (명시 경로가 없으면) 가장 최근 파일을 읽습니다.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::chunk::Chunk;

pub const CHUNKS_PREFIX: &str = "chunks_";
pub const EMBEDDINGS_PREFIX: &str = "embeddings_";
const ARTIFACT_EXT: &str = "jsonl";

/// 임베딩 아티팩트 한 줄
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: String,
    pub embedding: Vec<f32>,
}

/// build 한 번에 쓰는 두 파일 경로
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub chunks: PathBuf,
    pub embeddings: PathBuf,
}

impl ArtifactPaths {
    /// 현재 시각 스탬프로 파일 경로 생성
    pub fn timestamped(dir: &Path) -> Self {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        Self::with_stamp(dir, &stamp)
    }

    pub fn with_stamp(dir: &Path, stamp: &str) -> Self {
        Self {
            chunks: dir.join(format!("{}{}.{}", CHUNKS_PREFIX, stamp, ARTIFACT_EXT)),
            embeddings: dir.join(format!("{}{}.{}", EMBEDDINGS_PREFIX, stamp, ARTIFACT_EXT)),
        }
    }
}

// ============================================================================
// Write
// ============================================================================

fn write_jsonl<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> Result<usize> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut written = 0;
    for row in rows {
        serde_json::to_writer(&mut writer, &row)?;
        writer.write_all(b"\n")?;
        written += 1;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(written)
}

/// 청크 아티팩트 쓰기 (`{id, text, metadata}` 한 줄씩)
pub fn write_chunks(path: &Path, chunks: &[Chunk]) -> Result<usize> {
    write_jsonl(path, chunks)
}

/// 임베딩 아티팩트 쓰기 (청크와 같은 순서)
pub fn write_embeddings(path: &Path, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<usize> {
    if chunks.len() != vectors.len() {
        anyhow::bail!(
            "chunk/vector count mismatch: {} chunks, {} vectors",
            chunks.len(),
            vectors.len()
        );
    }

    write_jsonl(
        path,
        chunks.iter().zip(vectors).map(|(chunk, vector)| EmbeddingRecord {
            id: chunk.id.clone(),
            embedding: vector.clone(),
        }),
    )
}

// ============================================================================
// Read
// ============================================================================

/// JSONL 읽기 (빈 줄 무시, 파싱 실패 줄은 경고 후 건너뜀)
fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut rows = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(row) => rows.push(row),
            Err(e) => {
                tracing::warn!("Skipping {}:{}: {}", path.display(), line_no + 1, e);
            }
        }
    }
    Ok(rows)
}

pub fn read_chunks(path: &Path) -> Result<Vec<Chunk>> {
    read_jsonl(path)
}

pub fn read_embeddings(path: &Path) -> Result<Vec<EmbeddingRecord>> {
    read_jsonl(path)
}

// ============================================================================
// Discovery
// ============================================================================

/// `dir` 안에서 `prefix*.jsonl` 중 수정 시각이 가장 최근인 파일
pub fn latest(dir: &Path, prefix: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;

    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with(prefix) && name.ends_with(&format!(".{}", ARTIFACT_EXT))
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((modified, entry.path()))
        })
        // 같은 시각이면 이름 순 (스탬프가 이름에 들어있음)
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, path)| path)
}

/// 명시 경로 우선, 없으면 최신 파일
pub fn resolve(explicit: Option<&Path>, dir: &Path, prefix: &str) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => latest(dir, prefix),
    }
}

// ============================================================================
// Tests
// ============================================================================
