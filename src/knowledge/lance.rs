//! LanceDB Vector Store - 영속 벡터 컬렉션
//!
//! 청크 id/텍스트/메타데이터와 임베딩을 하나의 테이블(컬렉션)에 저장합니다.
//! 업서트는 `id` 기준 merge-insert, 검색은 코사인 거리입니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;

use super::chunk::{Chunk, ChunkMetadata};
use super::vector::{MetadataFilter, RankedHit, VectorRecord, VectorStore};

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
///
/// 컬렉션 이름 = 테이블 이름. 임베딩 차원은 첫 업서트에서 정해집니다.
pub struct LanceVectorStore {
    db: Connection,
    collection: String,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - 영속 디렉토리 경로
    /// * `collection` - 테이블 이름
    pub async fn open(path: &Path, collection: &str) -> Result<Self> {
        if !path.exists() {
            tokio::fs::create_dir_all(path)
                .await
                .context("Failed to create LanceDB directory")?;
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self {
            db,
            collection: collection.to_string(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// 컬렉션 스키마 생성
    fn create_schema(dimension: i32) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("work_id", DataType::Utf8, false),
            Field::new("kind", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
        ])
    }

    /// 레코드들을 Arrow RecordBatch로 변환
    fn records_to_batch(records: &[VectorRecord]) -> Result<RecordBatch> {
        let first = records
            .first()
            .ok_or_else(|| anyhow::anyhow!("Cannot create batch from empty records"))?;
        let dimension = first.embedding.len();
        if dimension == 0 {
            anyhow::bail!("Embedding for {} is empty", first.chunk.id);
        }
        if let Some(bad) = records.iter().find(|r| r.embedding.len() != dimension) {
            anyhow::bail!(
                "Embedding dimension mismatch for {}: expected {}, got {}",
                bad.chunk.id,
                dimension,
                bad.embedding.len()
            );
        }

        let ids: Vec<&str> = records.iter().map(|r| r.chunk.id.as_str()).collect();
        let texts: Vec<&str> = records.iter().map(|r| r.chunk.text.as_str()).collect();
        let work_ids: Vec<&str> = records
            .iter()
            .map(|r| r.chunk.metadata.work_id.as_str())
            .collect();
        let kinds: Vec<&str> = records
            .iter()
            .map(|r| r.chunk.metadata.kind.as_str())
            .collect();
        let metadata: Vec<String> = records
            .iter()
            .map(|r| serde_json::to_string(&r.chunk.metadata))
            .collect::<Result<_, _>>()
            .context("Failed to serialize chunk metadata")?;

        let embeddings_flat: Vec<f32> = records
            .iter()
            .flat_map(|r| r.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        RecordBatch::try_new(
            Arc::new(Self::create_schema(dimension as i32)),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(texts)),
                Arc::new(StringArray::from(work_ids)),
                Arc::new(StringArray::from(kinds)),
                Arc::new(StringArray::from(metadata)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.contains(&self.collection))
            .unwrap_or(false)
    }

    async fn open_table(&self) -> Result<lancedb::table::Table> {
        self.db
            .open_table(&self.collection)
            .execute()
            .await
            .with_context(|| format!("Failed to open collection '{}'", self.collection))
    }
}

/// 문자열 컬럼 추출
fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let batch = Self::records_to_batch(records)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if self.table_exists().await {
            let table = self.open_table().await?;
            let mut merge = table.merge_insert(&["id"]);
            merge
                .when_matched_update_all(None)
                .when_not_matched_insert_all();
            merge
                .execute(Box::new(batches))
                .await
                .context("Failed to upsert vectors")?;
        } else {
            self.db
                .create_table(&self.collection, batches)
                .execute()
                .await
                .context("Failed to create collection")?;
        }

        tracing::debug!(
            "Upserted {} records into '{}'",
            records.len(),
            self.collection
        );
        Ok(records.len())
    }

    async fn query(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RankedHit>> {
        if limit == 0 || !self.table_exists().await {
            return Ok(vec![]);
        }

        let table = self.open_table().await?;
        let rows = table.count_rows(None).await.context("Failed to count rows")?;
        let limit = limit.min(rows);
        if limit == 0 {
            return Ok(vec![]);
        }

        let mut search = table
            .vector_search(embedding.to_vec())
            .context("Failed to create vector search")?
            .column("embedding")
            .distance_type(DistanceType::Cosine)
            .limit(limit);
        if let Some(filter) = filter {
            search = search.only_if(filter.to_sql());
        }

        let batches: Vec<RecordBatch> = search
            .execute()
            .await
            .context("Failed to execute vector search")?
            .try_collect()
            .await?;

        let mut hits = Vec::new();
        for batch in batches {
            let ids = string_column(&batch, "id")?;

            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                hits.push(RankedHit {
                    id: ids.value(i).to_string(),
                    // 코사인 거리 → 유사도
                    score: 1.0 - distances.value(i),
                });
            }
        }

        Ok(hits)
    }

    async fn get_all(&self) -> Result<Vec<Chunk>> {
        if !self.table_exists().await {
            return Ok(vec![]);
        }

        let table = self.open_table().await?;
        let total = table.count_rows(None).await.context("Failed to count rows")?;
        if total == 0 {
            return Ok(vec![]);
        }

        let batches: Vec<RecordBatch> = table
            .query()
            .limit(total)
            .execute()
            .await
            .context("Failed to scan collection")?
            .try_collect()
            .await?;

        let mut chunks = Vec::with_capacity(total);
        for batch in batches {
            let ids = string_column(&batch, "id")?;
            let texts = string_column(&batch, "text")?;
            let metadata = string_column(&batch, "metadata")?;

            for i in 0..batch.num_rows() {
                let meta: ChunkMetadata = match serde_json::from_str(metadata.value(i)) {
                    Ok(meta) => meta,
                    Err(e) => {
                        tracing::warn!("Skipping {} with unreadable metadata: {}", ids.value(i), e);
                        continue;
                    }
                };
                chunks.push(Chunk {
                    id: ids.value(i).to_string(),
                    text: texts.value(i).to_string(),
                    metadata: meta,
                });
            }
        }

        Ok(chunks)
    }

    async fn count(&self) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let table = self.open_table().await?;
        let count = table.count_rows(None).await.context("Failed to count rows")?;
        Ok(count)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::chunk::{ChunkId, ChunkKind};
    use tempfile::TempDir;

    fn create_test_record(work: &str, index: usize, embedding: Vec<f32>) -> VectorRecord {
        let id = ChunkId::new(work, ChunkKind::FullText, "all", index);
        let chunk = Chunk::new(
            &id,
            format!("Test chunk {} for {}", index, work),
            ChunkMetadata::new(work, ChunkKind::FullText).with_source_file("t.jsonl"),
        )
        .unwrap();
        VectorRecord { chunk, embedding }
    }

    #[test]
    fn test_records_to_batch_rejects_mixed_dimensions() {
        let records = vec![
            create_test_record("w", 0, vec![0.1; 4]),
            create_test_record("w", 1, vec![0.1; 3]),
        ];
        assert!(LanceVectorStore::records_to_batch(&records).is_err());
    }

    #[tokio::test]
    async fn test_lance_upsert_and_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(&temp_dir.path().join("db"), "test")
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.get_all().await.unwrap().is_empty());

        let records = vec![
            create_test_record("a", 0, vec![1.0, 0.0, 0.0, 0.0]),
            create_test_record("b", 0, vec![0.0, 1.0, 0.0, 0.0]),
        ];
        assert_eq!(store.upsert(&records).await.unwrap(), 2);

        // 같은 id 재업서트는 개수를 늘리지 않음
        store.upsert(&records[..1]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|c| c.metadata.work_id == "b"));
    }

    #[tokio::test]
    async fn test_lance_query_with_filter() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(&temp_dir.path().join("db"), "test")
            .await
            .unwrap();

        store
            .upsert(&[
                create_test_record("a", 0, vec![1.0, 0.0, 0.0, 0.0]),
                create_test_record("b", 0, vec![0.9, 0.1, 0.0, 0.0]),
                create_test_record("a", 1, vec![0.0, 0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store.query(&[1.0, 0.0, 0.0, 0.0], 3, None).await.unwrap();
        assert_eq!(hits.first().map(|h| h.id.as_str()), Some("a::fulltext::all::0"));

        let filter = MetadataFilter::work("b");
        let hits = store
            .query(&[1.0, 0.0, 0.0, 0.0], 3, Some(&filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b::fulltext::all::0");
    }
}
