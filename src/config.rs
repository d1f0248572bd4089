//! 설정 모듈 - 환경변수 기반 단일 설정 구조체
//!
//! 인식하는 모든 옵션을 열거하고 기본값을 지정합니다.
//! 로더/청커/검색기는 생성 시점에 이 구조체를 받습니다.

use std::env;
use std::path::PathBuf;

use anyhow::Result;

use crate::error::PipelineError;

/// OpenAI 호환 API 기본 주소
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 루트 디렉토리 (~/.persona-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".persona-rag")
}

// ============================================================================
// Config Types
// ============================================================================

/// 종류별 포함 여부 토글
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindToggles {
    pub scenes: bool,
    pub chapters: bool,
    pub characters: bool,
    pub meta: bool,
    pub fulltext: bool,
}

impl Default for KindToggles {
    fn default() -> Self {
        Self {
            scenes: true,
            chapters: true,
            characters: true,
            meta: true,
            fulltext: true,
        }
    }
}

/// 코퍼스 로딩 설정
#[derive(Debug, Clone)]
pub struct CorpusConfig {
    /// `*_scenes_*.jsonl` 등이 들어있는 디렉토리
    pub data_dir: PathBuf,
    pub include: KindToggles,
}

/// 청킹 설정 (문자 수 기준)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    pub max_chars: usize,
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chars: 1200,
            overlap: 150,
        }
    }
}

/// 임베딩 설정
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub model: String,
    pub batch_size: usize,
    pub base_url: String,
}

/// 인덱싱(아티팩트 → 벡터 저장소) 설정
#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub artifact_dir: PathBuf,
    pub persist_dir: PathBuf,
    pub collection: String,
    pub chunks_path: Option<PathBuf>,
    pub embeddings_path: Option<PathBuf>,
    pub filter_works: Vec<String>,
    pub filter_kinds: Vec<String>,
    pub upsert_batch: usize,
}

/// 검색 설정
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// RRF 스무딩 상수
    pub rrf_k: f64,
    /// 융합 전 경로별 오버샘플링 배수
    pub oversample: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 6,
            rrf_k: crate::knowledge::DEFAULT_RRF_K,
            oversample: 3,
        }
    }
}

/// 생성 모델 설정
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub model: String,
    pub base_url: String,
}

/// 프롬프트 크기 제한
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptConfig {
    pub max_cards: usize,
    pub history_turns: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_cards: 8,
            history_turns: 6,
        }
    }
}

/// 전체 설정
#[derive(Debug, Clone)]
pub struct RagConfig {
    pub corpus: CorpusConfig,
    pub chunk: ChunkConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub retrieval: RetrievalConfig,
    pub generation: GenerationConfig,
    pub prompt: PromptConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        let root = get_data_dir();
        Self {
            corpus: CorpusConfig {
                data_dir: root.join("data"),
                include: KindToggles::default(),
            },
            chunk: ChunkConfig::default(),
            embedding: EmbeddingConfig {
                model: "text-embedding-3-small".to_string(),
                batch_size: 64,
                base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            },
            index: IndexConfig {
                artifact_dir: root.join("artifacts"),
                persist_dir: root.join("lance"),
                collection: "library-all".to_string(),
                chunks_path: None,
                embeddings_path: None,
                filter_works: Vec::new(),
                filter_kinds: Vec::new(),
                upsert_batch: 500,
            },
            retrieval: RetrievalConfig::default(),
            generation: GenerationConfig {
                model: "gpt-4o".to_string(),
                base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            },
            prompt: PromptConfig::default(),
        }
    }
}

impl RagConfig {
    /// 환경변수에서 설정 로드 (없는 값은 기본값)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let base_url = env_string("OPENAI_BASE_URL", DEFAULT_OPENAI_BASE_URL);

        let config = Self {
            corpus: CorpusConfig {
                data_dir: env_path("DATA_DIR", defaults.corpus.data_dir),
                include: KindToggles {
                    scenes: env_flag("INCLUDE_SCENES", true),
                    chapters: env_flag("INCLUDE_CHAPTERS", true),
                    characters: env_flag("INCLUDE_CHARACTERS", true),
                    meta: env_flag("INCLUDE_META", true),
                    fulltext: env_flag("INCLUDE_FULLTEXT", true),
                },
            },
            chunk: ChunkConfig {
                max_chars: env_usize("MAX_CHARS", defaults.chunk.max_chars),
                overlap: env_usize("OVERLAP", defaults.chunk.overlap),
            },
            embedding: EmbeddingConfig {
                model: env_string("EMB_MODEL", &defaults.embedding.model),
                batch_size: env_usize("BATCH_SIZE", defaults.embedding.batch_size),
                base_url: base_url.clone(),
            },
            index: IndexConfig {
                artifact_dir: env_path("ARTIFACT_DIR", defaults.index.artifact_dir),
                persist_dir: env_path("PERSIST_DIR", defaults.index.persist_dir),
                collection: env_string("COLLECTION", &defaults.index.collection),
                chunks_path: env_opt_path("CHUNKS_PATH"),
                embeddings_path: env_opt_path("EMBS_PATH"),
                filter_works: env_list("FILTER_WORKS"),
                filter_kinds: env_list("FILTER_KINDS"),
                upsert_batch: env_usize("UPSERT_BATCH", defaults.index.upsert_batch),
            },
            retrieval: RetrievalConfig {
                top_k: env_usize("TOP_K", defaults.retrieval.top_k),
                rrf_k: env_usize("RRF_K", defaults.retrieval.rrf_k as usize) as f64,
                oversample: env_usize("OVERSAMPLE", defaults.retrieval.oversample),
            },
            generation: GenerationConfig {
                model: env_string("MODEL", &defaults.generation.model),
                base_url,
            },
            prompt: PromptConfig {
                max_cards: env_usize("MAX_CONTEXT_CARDS", defaults.prompt.max_cards),
                history_turns: env_usize("HISTORY_TURNS", defaults.prompt.history_turns),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// 설정값 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk.max_chars == 0 {
            return Err(PipelineError::InvalidConfig("MAX_CHARS must be > 0".into()).into());
        }
        if self.chunk.overlap >= self.chunk.max_chars {
            return Err(PipelineError::InvalidConfig(format!(
                "OVERLAP ({}) must be smaller than MAX_CHARS ({})",
                self.chunk.overlap, self.chunk.max_chars
            ))
            .into());
        }
        if self.embedding.batch_size == 0 {
            return Err(PipelineError::InvalidConfig("BATCH_SIZE must be > 0".into()).into());
        }
        if self.index.upsert_batch == 0 {
            return Err(PipelineError::InvalidConfig("UPSERT_BATCH must be > 0".into()).into());
        }
        if self.retrieval.top_k == 0 || self.retrieval.oversample == 0 {
            return Err(
                PipelineError::InvalidConfig("TOP_K and OVERSAMPLE must be > 0".into()).into(),
            );
        }
        Ok(())
    }
}

// ============================================================================
// Env Helpers
// ============================================================================

fn env_string(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => default.to_string(),
    }
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    env_opt_path(key).unwrap_or(default)
}

fn env_opt_path(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(|v| PathBuf::from(v.trim().replace('\\', "/")))
}

fn env_usize(key: &str, default: usize) -> usize {
    match env::var(key) {
        Ok(v) => match v.trim().parse() {
            Ok(n) => n,
            Err(_) => {
                tracing::warn!("Ignoring unparseable {}={:?}, using {}", key, v, default);
                default
            }
        },
        Err(_) => default,
    }
}

/// "1"이면 true, 그 외 값은 false, 미설정이면 기본값
fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => v.trim() == "1",
        Err(_) => default,
    }
}

fn env_list(key: &str) -> Vec<String> {
    env::var(key).map(|v| parse_list(&v)).unwrap_or_default()
}

/// 쉼표 구분 목록 파싱 (빈 항목 제거)
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
