//! 하이브리드 검색 - 벡터 + BM25 RRF 통합
//!
//! 질의마다 두 경로를 오버샘플링(`oversample × top_k`)해서 조회하고
//! RRF로 합친 뒤 코퍼스 스냅샷으로 텍스트/메타데이터를 해석합니다.
//!
//! ref: https://www.elastic.co/blog/hybrid-search-rrf

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;

use super::chunk::{Chunk, ChunkMetadata};
use super::fusion::reciprocal_rank_fusion;
use super::lexical::LexicalIndex;
use super::snapshot::CorpusSnapshot;
use super::vector::{MetadataFilter, VectorStore};

// ============================================================================
// Types
// ============================================================================

/// 하이브리드 검색 결과
#[derive(Debug, Clone)]
pub struct RetrievedHit {
    /// 청크 ID
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    /// RRF 통합 스코어 (높을수록 좋음)
    pub fused_score: f64,
    /// 어느 경로에서 찾았는지
    pub method: SearchMethod,
}

/// 검색 방법
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMethod {
    /// 벡터 검색에서만 나옴
    Vector,
    /// BM25 키워드 검색에서만 나옴
    Lexical,
    /// 두 경로 모두
    Hybrid,
}

/// 검색기 상태 요약
#[derive(Debug, Clone)]
pub struct HybridStats {
    pub vector_count: usize,
    pub snapshot_count: usize,
    pub lexical_count: usize,
    pub lexical_available: bool,
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// 하이브리드 검색기
///
/// 벡터 저장소와 임베딩 프로바이더는 주입받고,
/// 스냅샷과 BM25 인덱스는 생성 시점에 한 번 구축합니다.
pub struct HybridRetriever {
    vector: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    snapshot: CorpusSnapshot,
    lexical: Option<LexicalIndex>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    /// 벡터 저장소 전체를 읽어 스냅샷과 BM25 인덱스 구축
    pub async fn load(
        vector: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
    ) -> Result<Self> {
        let chunks = vector
            .get_all()
            .await
            .context("Failed to read corpus snapshot from vector store")?;
        tracing::info!("Loaded corpus snapshot ({} records)", chunks.len());

        Ok(Self::from_chunks(vector, embedder, chunks, config))
    }

    /// 이미 읽어둔 청크로 생성
    pub fn from_chunks(
        vector: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunks: Vec<Chunk>,
        config: RetrievalConfig,
    ) -> Self {
        let snapshot = CorpusSnapshot::new(chunks);
        let lexical = LexicalIndex::build(snapshot.iter().map(|c| (c.id.as_str(), c.text.as_str())));

        Self {
            vector,
            embedder,
            snapshot,
            lexical,
            config,
        }
    }

    /// 하이브리드 검색
    ///
    /// # Arguments
    /// * `query` - 검색 질의 (비어있으면 결과 없음)
    /// * `top_k` - 최대 결과 수
    /// * `work_id` - 작품 필터 (두 경로 모두에 적용)
    ///
    /// # Returns
    /// RRF 스코어 기준 정렬된, 스냅샷에서 해석 가능한 결과만
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        work_id: Option<&str>,
    ) -> Result<Vec<RetrievedHit>> {
        let query = query.trim();
        if query.is_empty() || top_k == 0 {
            return Ok(vec![]);
        }
        let breadth = top_k.saturating_mul(self.config.oversample.max(1));

        // 1. 벡터 검색
        let filter = work_id.map(MetadataFilter::work);
        let query_embedding = self
            .embedder
            .embed(query)
            .await
            .context("Failed to embed query")?;
        let vector_ids: Vec<String> = self
            .vector
            .query(&query_embedding, breadth, filter.as_ref())
            .await?
            .into_iter()
            .map(|hit| hit.id)
            .collect();

        // 2. BM25 검색 (작품 필터는 절단 전에 적용)
        let lexical_ids: Vec<String> = match &self.lexical {
            Some(index) => index
                .rank(query, breadth, |id| self.in_work(id, work_id))
                .into_iter()
                .map(|hit| hit.id)
                .collect(),
            None => vec![],
        };

        tracing::debug!(
            "Retrieved {} vector / {} lexical candidates for {:?}",
            vector_ids.len(),
            lexical_ids.len(),
            query
        );

        // 3. RRF 통합 (벡터 목록 먼저)
        let fused = reciprocal_rank_fusion(&[&vector_ids[..], &lexical_ids[..]], self.config.rrf_k);

        // 4. 스냅샷으로 해석
        let from_vector: HashSet<&str> = vector_ids.iter().map(String::as_str).collect();
        let from_lexical: HashSet<&str> = lexical_ids.iter().map(String::as_str).collect();

        let mut hits = Vec::with_capacity(top_k.min(fused.len()));
        for (id, fused_score) in fused {
            let Some(chunk) = self.snapshot.get(&id) else {
                tracing::debug!("Skipping stale id {}", id);
                continue;
            };

            let method = match (from_vector.contains(id.as_str()), from_lexical.contains(id.as_str())) {
                (true, true) => SearchMethod::Hybrid,
                (false, true) => SearchMethod::Lexical,
                _ => SearchMethod::Vector,
            };

            hits.push(RetrievedHit {
                text: chunk.text.clone(),
                metadata: chunk.metadata.clone(),
                id,
                fused_score,
                method,
            });
            if hits.len() >= top_k {
                break;
            }
        }

        Ok(hits)
    }

    /// 스냅샷 기준 작품 소속 확인
    fn in_work(&self, id: &str, work_id: Option<&str>) -> bool {
        match work_id {
            None => true,
            Some(work) => self
                .snapshot
                .get(id)
                .map_or(false, |c| c.metadata.work_id == work),
        }
    }

    /// BM25 경로 사용 가능 여부
    pub fn lexical_available(&self) -> bool {
        self.lexical.is_some()
    }

    pub fn snapshot(&self) -> &CorpusSnapshot {
        &self.snapshot
    }

    /// 저장소 통계
    pub async fn stats(&self) -> Result<HybridStats> {
        let vector_count = self.vector.count().await?;

        Ok(HybridStats {
            vector_count,
            snapshot_count: self.snapshot.len(),
            lexical_count: self.lexical.as_ref().map_or(0, LexicalIndex::len),
            lexical_available: self.lexical_available(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::testing::KeywordEmbedding;
    use crate::knowledge::chunk::{ChunkId, ChunkKind};
    use crate::knowledge::vector::{MemoryVectorStore, VectorRecord};

    const VOCAB: &[&str] = &["온실", "기억", "광주", "소년"];

    fn chunk(work: &str, index: usize, text: &str) -> Chunk {
        Chunk::new(
            &ChunkId::new(work, ChunkKind::FullText, "all", index),
            text.to_string(),
            ChunkMetadata::new(work, ChunkKind::FullText),
        )
        .unwrap()
    }

    async fn retriever(chunks: Vec<Chunk>) -> HybridRetriever {
        let embedder = Arc::new(KeywordEmbedding::new(VOCAB));
        let store = Arc::new(MemoryVectorStore::new());
        let records: Vec<VectorRecord> = chunks
            .iter()
            .map(|c| VectorRecord {
                chunk: c.clone(),
                embedding: embedder.vector(&c.text),
            })
            .collect();
        store.upsert(&records).await.unwrap();

        HybridRetriever::load(store, embedder, RetrievalConfig::default())
            .await
            .unwrap()
    }

    #[test]
    fn test_search_method_equality() {
        assert_eq!(SearchMethod::Vector, SearchMethod::Vector);
        assert_ne!(SearchMethod::Vector, SearchMethod::Lexical);
        assert_ne!(SearchMethod::Lexical, SearchMethod::Hybrid);
    }

    #[tokio::test]
    async fn test_empty_query_returns_nothing() {
        let r = retriever(vec![chunk("a", 0, "온실 이야기")]).await;
        assert!(r.retrieve("", 5, None).await.unwrap().is_empty());
        assert!(r.retrieve("   \n", 5, None).await.unwrap().is_empty());
        assert!(r.retrieve("온실", 0, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_fuses_both_paths() {
        let r = retriever(vec![
            chunk("a", 0, "온실 온실 식물"),
            chunk("a", 1, "기억 이야기"),
            chunk("a", 2, "소년 소년"),
        ])
        .await;

        let hits = r.retrieve("온실", 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a::fulltext::all::0");
        assert_eq!(hits[0].method, SearchMethod::Hybrid);
        assert_eq!(hits[0].text, "온실 온실 식물");
        assert!(hits[0].fused_score > hits[1].fused_score);
    }

    #[tokio::test]
    async fn test_work_filter_applies_to_both_paths() {
        let r = retriever(vec![
            chunk("a", 0, "광주 광주 광주"),
            chunk("b", 0, "광주 이야기"),
            chunk("b", 1, "소년 이야기"),
        ])
        .await;

        let hits = r.retrieve("광주", 10, Some("b")).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.metadata.work_id == "b"));
        assert_eq!(hits[0].id, "b::fulltext::all::0");
    }

    #[tokio::test]
    async fn test_unavailable_lexical_index_falls_back_to_vector() {
        let r = retriever(vec![chunk("a", 0, "..."), chunk("a", 1, "!!!")]).await;
        assert!(!r.lexical_available());

        let hits = r.retrieve("온실", 1, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].method, SearchMethod::Vector);

        let stats = r.stats().await.unwrap();
        assert_eq!(stats.vector_count, 2);
        assert_eq!(stats.snapshot_count, 2);
        assert_eq!(stats.lexical_count, 0);
    }

    #[tokio::test]
    async fn test_huge_top_k_does_not_overflow_breadth() {
        let r = retriever(vec![
            chunk("a", 0, "온실 식물"),
            chunk("a", 1, "기억 이야기"),
        ])
        .await;

        let hits = r.retrieve("온실", usize::MAX, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a::fulltext::all::0");
        assert_eq!(hits[0].method, SearchMethod::Hybrid);
    }

    #[tokio::test]
    async fn test_stale_vector_ids_are_skipped() {
        let embedder = Arc::new(KeywordEmbedding::new(VOCAB));
        let store = Arc::new(MemoryVectorStore::new());
        let live = chunk("a", 0, "기억 이야기");
        let stale = chunk("a", 1, "기억 기억 기억");
        store
            .upsert(&[
                VectorRecord {
                    chunk: live.clone(),
                    embedding: embedder.vector(&live.text),
                },
                VectorRecord {
                    chunk: stale.clone(),
                    embedding: embedder.vector(&stale.text),
                },
            ])
            .await
            .unwrap();

        // 스냅샷에는 live만 있음
        let r = HybridRetriever::from_chunks(store, embedder, vec![live], RetrievalConfig::default());
        let hits = r.retrieve("기억", 5, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a::fulltext::all::0"]);
    }
}
