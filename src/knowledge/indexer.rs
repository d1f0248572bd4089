//! Offline Indexer - 아티팩트 생성과 벡터 저장소 적재
//!
//! 1. build: 코퍼스 → 청크 → 임베딩 → JSONL 아티팩트
//! 2. index: 아티팩트 → 필터 → 임베딩 조인 → ID 충돌 해소 → 배치 업서트

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use anyhow::Result;

use super::artifacts::{self, ArtifactPaths, CHUNKS_PREFIX, EMBEDDINGS_PREFIX};
use super::chunk::{Chunk, ID_SEPARATOR, SUFFIX_MARKER};
use super::chunker::Chunker;
use super::vector::{RankedHit, VectorRecord, VectorStore};
use crate::collector;
use crate::config::{CorpusConfig, IndexConfig};
use crate::embedding::{embed_in_batches, EmbeddingProvider};
use crate::error::PipelineError;

/// 적재 후 점검용 기본 질의
pub const SAMPLE_QUERY: &str = "기억과 상실의 주제";
pub const SAMPLE_TOP_K: usize = 3;

// ============================================================================
// Filters
// ============================================================================

/// 종류 패턴 매칭 (빈 목록 = 전체, `prefix*` = 접두사)
pub fn kind_matches(kind: &str, patterns: &[String]) -> bool {
    if patterns.is_empty() {
        return true;
    }
    patterns.iter().any(|pattern| match pattern.strip_suffix('*') {
        Some(prefix) => kind.starts_with(prefix),
        None => kind == pattern,
    })
}

/// 작품 필터 (빈 목록 = 전체)
pub fn work_matches(work_id: &str, works: &[String]) -> bool {
    works.is_empty() || works.iter().any(|w| w == work_id)
}

// ============================================================================
// Build Stage
// ============================================================================

/// build 단계 결과
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub chunks: usize,
    pub dimension: usize,
    pub paths: ArtifactPaths,
}

/// 코퍼스를 청크/임베딩 아티팩트로 저장
pub async fn build_artifacts(
    corpus: &CorpusConfig,
    chunker: &dyn Chunker,
    embedder: &dyn EmbeddingProvider,
    batch_size: usize,
    artifact_dir: &std::path::Path,
) -> Result<BuildReport> {
    let chunks = collector::load_all_chunks(corpus, chunker)?;
    if chunks.is_empty() {
        return Err(PipelineError::NoDocuments {
            data_dir: corpus.data_dir.clone(),
        }
        .into());
    }
    tracing::info!(
        "Loaded {} chunks from {}",
        chunks.len(),
        corpus.data_dir.display()
    );

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embed_in_batches(embedder, &texts, batch_size).await?;
    let dimension = vectors.first().map(|v| v.len()).unwrap_or(0);
    tracing::info!(
        "Embedded {} chunks (dim = {}, provider = {})",
        vectors.len(),
        dimension,
        embedder.name()
    );

    let paths = ArtifactPaths::timestamped(artifact_dir);
    artifacts::write_chunks(&paths.chunks, &chunks)?;
    artifacts::write_embeddings(&paths.embeddings, &chunks, &vectors)?;

    Ok(BuildReport {
        chunks: chunks.len(),
        dimension,
        paths,
    })
}

// ============================================================================
// Index Stage
// ============================================================================

/// index 단계 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub read: usize,
    /// ID/텍스트/메타데이터 규칙을 어긴 아티팩트 레코드
    pub invalid: usize,
    pub filtered_out: usize,
    pub missing_embedding: usize,
    pub renamed: usize,
    pub upserted: usize,
}

/// 아티팩트 파일 선택 (명시 경로 우선, 없으면 최신)
pub fn resolve_artifacts(config: &IndexConfig) -> Result<(PathBuf, PathBuf)> {
    let chunks = artifacts::resolve(
        config.chunks_path.as_deref(),
        &config.artifact_dir,
        CHUNKS_PREFIX,
    );
    let embeddings = artifacts::resolve(
        config.embeddings_path.as_deref(),
        &config.artifact_dir,
        EMBEDDINGS_PREFIX,
    );

    match (chunks, embeddings) {
        (Some(c), Some(e)) if c.exists() && e.exists() => Ok((c, e)),
        (chunks, embeddings) => Err(PipelineError::ArtifactsNotFound { chunks, embeddings }.into()),
    }
}

/// 충돌하지 않는 ID 생성 (`base::dup<6 hex>`)
fn disambiguate(base: &str, seen: &HashSet<String>) -> String {
    loop {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        let candidate = format!("{}{}{}{}", base, ID_SEPARATOR, SUFFIX_MARKER, &hex[..6]);
        if !seen.contains(&candidate) {
            return candidate;
        }
    }
}

/// 필터와 임베딩 조인을 적용해 업서트할 레코드 준비
pub fn prepare_records(
    chunks: Vec<Chunk>,
    embeddings: Vec<artifacts::EmbeddingRecord>,
    config: &IndexConfig,
) -> (Vec<VectorRecord>, IndexReport) {
    let mut report = IndexReport {
        read: chunks.len(),
        ..Default::default()
    };

    let mut by_id: HashMap<String, Vec<f32>> = HashMap::with_capacity(embeddings.len());
    for record in embeddings {
        by_id.entry(record.id).or_insert(record.embedding);
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut records = Vec::new();

    for mut chunk in chunks {
        if let Err(e) = chunk.validate() {
            tracing::warn!("Skipping invalid chunk record {:?}: {}", chunk.id, e);
            report.invalid += 1;
            continue;
        }

        if !work_matches(&chunk.metadata.work_id, &config.filter_works)
            || !kind_matches(chunk.metadata.kind.as_str(), &config.filter_kinds)
        {
            report.filtered_out += 1;
            continue;
        }

        let embedding = match by_id.get(&chunk.id) {
            Some(embedding) => embedding.clone(),
            None => {
                report.missing_embedding += 1;
                continue;
            }
        };

        if seen.contains(&chunk.id) {
            let renamed = disambiguate(&chunk.id, &seen);
            tracing::warn!("Duplicate chunk id {} stored as {}", chunk.id, renamed);
            chunk.id = renamed;
            report.renamed += 1;
        }
        seen.insert(chunk.id.clone());

        records.push(VectorRecord { chunk, embedding });
    }

    (records, report)
}

/// 레코드를 배치 단위로 업서트
pub async fn upsert_in_batches(
    store: &dyn VectorStore,
    records: &[VectorRecord],
    batch_size: usize,
) -> Result<usize> {
    let mut total = 0;
    for (i, batch) in records.chunks(batch_size.max(1)).enumerate() {
        total += store.upsert(batch).await?;
        tracing::debug!("Upserted batch {} ({} records)", i + 1, batch.len());
    }
    Ok(total)
}

/// 아티팩트를 읽어 벡터 저장소에 적재
pub async fn index_artifacts(config: &IndexConfig, store: &dyn VectorStore) -> Result<IndexReport> {
    let (chunks_path, embeddings_path) = resolve_artifacts(config)?;
    tracing::info!(
        "Indexing {} with {}",
        chunks_path.display(),
        embeddings_path.display()
    );

    let chunks = artifacts::read_chunks(&chunks_path)?;
    let embeddings = artifacts::read_embeddings(&embeddings_path)?;

    let (records, mut report) = prepare_records(chunks, embeddings, config);
    if records.is_empty() {
        return Err(PipelineError::NothingToIndex {
            read: report.read,
            invalid: report.invalid,
            filtered_out: report.filtered_out,
            missing_embedding: report.missing_embedding,
        }
        .into());
    }

    report.upserted = upsert_in_batches(store, &records, config.upsert_batch).await?;
    tracing::info!(
        "Upserted {} records ({} invalid, {} filtered, {} without embedding, {} renamed)",
        report.upserted,
        report.invalid,
        report.filtered_out,
        report.missing_embedding,
        report.renamed
    );
    Ok(report)
}

/// 적재 후 점검 질의
pub async fn sample_check(
    store: &dyn VectorStore,
    embedder: &dyn EmbeddingProvider,
    query: &str,
    k: usize,
) -> Result<Vec<RankedHit>> {
    let embedding = embedder.embed(query).await?;
    store.query(&embedding, k, None).await
}

// ============================================================================
// Tests
// ============================================================================
