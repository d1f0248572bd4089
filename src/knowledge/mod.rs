//! Knowledge 모듈 - 하이브리드 RAG 검색 코어
//!
//! - Chunker: 정규화 + 문장 분할 + 오버랩 청킹
//! - LanceDB: 벡터 검색 (코사인)
//! - Lexical: 인메모리 BM25
//! - Hybrid: RRF 알고리즘으로 두 검색 결과 통합
//! - Indexer: 아티팩트 생성과 벡터 저장소 적재

pub mod artifacts;
mod chunk;
mod chunker;
mod fusion;
mod hybrid;
pub mod indexer;
mod lance;
mod lexical;
mod snapshot;
mod vector;

// Re-exports
pub use chunk::{Chunk, ChunkId, ChunkKind, ChunkMetadata, ID_SEPARATOR};
pub use chunker::{
    chunk_text, default_chunker, normalize, sentence_chunker, split_sentences, Chunker,
    SentenceChunker,
};
pub use fusion::{reciprocal_rank_fusion, DEFAULT_RRF_K};
pub use hybrid::{HybridRetriever, HybridStats, RetrievedHit, SearchMethod};
pub use lance::LanceVectorStore;
pub use lexical::{tokenize, CorpusTokenizer, LexicalIndex};
pub use snapshot::CorpusSnapshot;
pub use vector::{
    cosine_similarity, MemoryVectorStore, MetadataFilter, RankedHit, VectorRecord, VectorStore,
};
