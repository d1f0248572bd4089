//! Corpus Snapshot - 질의 시점의 id → (text, metadata) 해석 테이블
//!
//! 벡터 저장소의 전체 레코드를 한 번 읽어 구축합니다.
//! 저장 순서를 보존하며, 빈 텍스트와 중복 id(첫 항목 우선)는 제외합니다.

use std::collections::HashMap;

use super::chunk::Chunk;

/// 읽기 전용 코퍼스 스냅샷
#[derive(Debug, Clone, Default)]
pub struct CorpusSnapshot {
    chunks: Vec<Chunk>,
    by_id: HashMap<String, usize>,
}

impl CorpusSnapshot {
    pub fn new(chunks: impl IntoIterator<Item = Chunk>) -> Self {
        let mut snapshot = Self::default();
        let mut dropped = 0usize;

        for chunk in chunks {
            if chunk.text.trim().is_empty() || snapshot.by_id.contains_key(&chunk.id) {
                dropped += 1;
                continue;
            }
            snapshot
                .by_id
                .insert(chunk.id.clone(), snapshot.chunks.len());
            snapshot.chunks.push(chunk);
        }

        if dropped > 0 {
            tracing::debug!("Snapshot dropped {} empty or duplicate records", dropped);
        }
        snapshot
    }

    pub fn get(&self, id: &str) -> Option<&Chunk> {
        self.by_id.get(id).map(|&i| &self.chunks[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// 저장 순서대로 순회
    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::chunk::{ChunkId, ChunkKind, ChunkMetadata};

    fn chunk(index: usize, text: &str) -> Chunk {
        Chunk {
            id: ChunkId::new("w", ChunkKind::FullText, "all", index).to_string(),
            text: text.to_string(),
            metadata: ChunkMetadata::new("w", ChunkKind::FullText),
        }
    }

    #[test]
    fn test_snapshot_keeps_order_and_first_duplicate() {
        let snapshot = CorpusSnapshot::new(vec![
            chunk(1, "first"),
            chunk(0, "zero"),
            chunk(1, "second"),
            chunk(2, "   "),
        ]);

        assert_eq!(snapshot.len(), 2);
        let ids: Vec<&str> = snapshot.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["w::fulltext::all::1", "w::fulltext::all::0"]);
        assert_eq!(
            snapshot.get("w::fulltext::all::1").map(|c| c.text.as_str()),
            Some("first")
        );
        assert!(!snapshot.contains("w::fulltext::all::2"));
        assert!(snapshot.get("missing").is_none());
    }
}
