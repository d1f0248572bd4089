//! Vector Store - 벡터 저장소 트레이트 및 유틸리티
//!
//! 영속 컬렉션은 `LanceVectorStore`, 테스트/소규모 코퍼스용으로
//! 인메모리 `MemoryVectorStore`를 제공합니다.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use super::chunk::{Chunk, ChunkMetadata};

// ============================================================================
// Types
// ============================================================================

/// 벡터 엔트리 (업서트용)
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// 단일 검색 경로의 순위 결과
///
/// 점수 의미는 경로마다 다르므로 (코사인 유사도 vs BM25) 경로 간 비교하지 않습니다.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedHit {
    pub id: String,
    pub score: f32,
}

/// 작품 동등 필터 (`work_id == value`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFilter {
    pub work_id: String,
}

impl MetadataFilter {
    pub fn work(work_id: impl Into<String>) -> Self {
        Self {
            work_id: work_id.into(),
        }
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        metadata.work_id == self.work_id
    }

    /// SQL 조건식 (작은따옴표 이스케이프)
    pub fn to_sql(&self) -> String {
        format!("work_id = '{}'", self.work_id.replace('\'', "''"))
    }
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
///
/// 벡터 저장소의 공통 인터페이스입니다.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// id 기준 업서트 (같은 id는 전체 교체)
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize>;

    /// 코사인 최근접 이웃 검색 (유사도 내림차순)
    async fn query(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RankedHit>>;

    /// 전체 스냅샷 읽기 (저장 순서)
    async fn get_all(&self) -> Result<Vec<Chunk>>;

    /// 레코드 개수
    async fn count(&self) -> Result<usize>;
}

// ============================================================================
// MemoryVectorStore
// ============================================================================

/// 인메모리 벡터 저장소 (전수 코사인 검색)
#[derive(Default)]
pub struct MemoryVectorStore {
    records: Mutex<Vec<VectorRecord>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize> {
        let mut stored = self
            .records
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        for record in records {
            match stored.iter_mut().find(|r| r.chunk.id == record.chunk.id) {
                Some(existing) => *existing = record.clone(),
                None => stored.push(record.clone()),
            }
        }

        Ok(records.len())
    }

    async fn query(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RankedHit>> {
        let stored = self
            .records
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut hits: Vec<RankedHit> = stored
            .iter()
            .filter(|r| filter.map_or(true, |f| f.matches(&r.chunk.metadata)))
            .map(|r| RankedHit {
                id: r.chunk.id.clone(),
                score: cosine_similarity(embedding, &r.embedding),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);

        Ok(hits)
    }

    async fn get_all(&self) -> Result<Vec<Chunk>> {
        let stored = self
            .records
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(stored.iter().map(|r| r.chunk.clone()).collect())
    }

    async fn count(&self) -> Result<usize> {
        let stored = self
            .records
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(stored.len())
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위이며, 길이가 다르거나 영벡터면 0.0입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================
