//! persona-rag - 소설 인물 페르소나 챗봇
//!
//! LanceDB 벡터 검색 + BM25 키워드 검색을 RRF로 결합한
//! 하이브리드 RAG 위에서 작품 속 인물의 말투로 대답합니다.

pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod knowledge;
pub mod persona;

// Re-exports
pub use collector::{load_all_chunks, CorpusLoader, LoadStats, SourceKind};
pub use config::{get_data_dir, RagConfig, RetrievalConfig};
pub use embedding::{get_api_key, has_api_key, EmbeddingProvider, OpenAiEmbedding};
pub use error::PipelineError;
pub use generation::{ChatMessage, GenerationBackend, GenerationChain, Role};
pub use knowledge::{
    default_chunker, reciprocal_rank_fusion, sentence_chunker, Chunk, ChunkId, ChunkKind,
    ChunkMetadata, Chunker, CorpusSnapshot, HybridRetriever, HybridStats, LanceVectorStore,
    LexicalIndex, MemoryVectorStore, MetadataFilter, RetrievedHit, SearchMethod, VectorStore,
};
pub use persona::{ChatReply, ChatSession, PersonaChat};
