//! 파이프라인 에러 타입
//!
//! 운영자가 구분해야 하는 치명적 조건들입니다.
//! (경로 문제 vs 필터 문제 등) 나머지는 `anyhow::Context`로 전파합니다.

use std::path::PathBuf;

use thiserror::Error;

/// 오프라인 인덱싱 / 생성 단계의 구분 가능한 실패
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 데이터 디렉토리에서 청크를 하나도 만들지 못함
    #[error("no documents loaded from {data_dir:?}; check the *_scenes_*.jsonl / *_chapters_*.jsonl / *_characters_*.jsonl / *_meta_*.jsonl / *_fulltext*.jsonl patterns")]
    NoDocuments { data_dir: PathBuf },

    /// chunks/embeddings 아티팩트 파일 없음
    #[error("chunk/embedding artifacts not found (chunks={chunks:?}, embeddings={embeddings:?})")]
    ArtifactsNotFound {
        chunks: Option<PathBuf>,
        embeddings: Option<PathBuf>,
    },

    /// 필터/임베딩 조인 후 업서트할 레코드가 없음
    #[error("nothing to upsert: read {read} chunk records, {invalid} invalid, {filtered_out} removed by FILTER_WORKS/FILTER_KINDS, {missing_embedding} without embedding")]
    NothingToIndex {
        read: usize,
        invalid: usize,
        filtered_out: usize,
        missing_embedding: usize,
    },

    /// 임베딩 결과 개수 불일치
    #[error("embedding provider returned {actual} vectors for {expected} inputs")]
    EmbeddingCountMismatch { expected: usize, actual: usize },

    /// 잘못된 설정값
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// 모든 생성 백엔드 실패
    #[error("all generation backends failed: {}", .0.join("; "))]
    GenerationFailed(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_distinguish_path_and_filter_problems() {
        let missing = PipelineError::ArtifactsNotFound {
            chunks: None,
            embeddings: Some(PathBuf::from("a.jsonl")),
        };
        let empty = PipelineError::NothingToIndex {
            read: 3,
            invalid: 0,
            filtered_out: 3,
            missing_embedding: 0,
        };

        assert!(missing.to_string().contains("not found"));
        assert!(empty.to_string().contains("FILTER_WORKS"));
        assert_ne!(missing.to_string(), empty.to_string());
    }

    #[test]
    fn test_generation_failed_joins_reasons() {
        let err = PipelineError::GenerationFailed(vec!["a: boom".into(), "b: down".into()]);
        assert_eq!(err.to_string(), "all generation backends failed: a: boom; b: down");
    }
}
