//! 임베딩 모듈 - OpenAI 호환 API를 통한 텍스트 벡터화
//!
//! 인덱싱(청크 배치)과 질의(단일 문장) 양쪽에서 같은 프로바이더를 씁니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = OpenAiEmbedding::from_env("text-embedding-3-small", DEFAULT_OPENAI_BASE_URL)?;
//! let embedding = embedder.embed("기억과 상실의 주제").await?;
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// HTTP 요청 타임아웃
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

/// `batch_size` 단위로 나눠 임베딩 (입력 순서 유지)
///
/// 프로바이더가 입력과 다른 개수를 돌려주면 `EmbeddingCountMismatch`입니다.
pub async fn embed_in_batches(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let batch_size = batch_size.max(1);
    let total_batches = texts.len().div_ceil(batch_size);
    let mut vectors = Vec::with_capacity(texts.len());

    for (i, batch) in texts.chunks(batch_size).enumerate() {
        tracing::debug!("Embedding batch {}/{} ({} texts)", i + 1, total_batches, batch.len());
        let embedded = provider.embed_batch(batch).await?;
        if embedded.len() != batch.len() {
            return Err(PipelineError::EmbeddingCountMismatch {
                expected: batch.len(),
                actual: embedded.len(),
            }
            .into());
        }
        vectors.extend(embedded);
    }

    Ok(vectors)
}

// ============================================================================
// OpenAI Embedding
// ============================================================================

/// OpenAI 호환 `/embeddings` 엔드포인트 구현체
///
/// source: https://platform.openai.com/docs/api-reference/embeddings
#[derive(Debug)]
pub struct OpenAiEmbedding {
    api_key: String,
    client: reqwest::Client,
    model: String,
    base_url: String,
}

impl OpenAiEmbedding {
    /// 새 임베딩 인스턴스 생성
    ///
    /// # Arguments
    /// * `api_key` - API 키
    /// * `model` - 임베딩 모델 이름
    /// * `base_url` - API 주소 (예: `https://api.openai.com/v1`)
    pub fn new(api_key: String, model: &str, base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env(model: &str, base_url: &str) -> Result<Self> {
        let api_key = get_api_key()?;
        Self::new(api_key, model, base_url)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.model,
            input,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send embedding request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiError>(&body) {
                anyhow::bail!("Embedding API error ({}): {}", status, error.error.message);
            }
            anyhow::bail!("Embedding API error ({}): {}", status, body);
        }

        parse_embed_response(&body)
    }
}

/// `/embeddings` 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// `/embeddings` 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// API 에러 응답
#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    pub(crate) error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorDetail {
    pub(crate) message: String,
}

/// 응답 파싱 (`index` 순으로 정렬)
fn parse_embed_response(body: &str) -> Result<Vec<Vec<f32>>> {
    let mut response: EmbedResponse =
        serde_json::from_str(body).context("Failed to parse embedding response")?;
    response.data.sort_by_key(|d| d.index);
    Ok(response.data.into_iter().map(|d| d.embedding).collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Embedding response contained no vectors"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        self.request(texts).await
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (`OPENAI_API_KEY` 환경변수)
pub fn get_api_key() -> Result<String> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => {
            tracing::debug!("Using API key from OPENAI_API_KEY");
            Ok(key.trim().to_string())
        }
        _ => anyhow::bail!(
            "API key not found. Set the OPENAI_API_KEY environment variable.\n\
             Get your API key at: https://platform.openai.com/api-keys"
        ),
    }
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    std::env::var("OPENAI_API_KEY")
        .map(|key| !key.trim().is_empty())
        .unwrap_or(false)
}

// ============================================================================
// Test Doubles
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// 키워드 출현 횟수를 차원으로 쓰는 결정적 임베딩
    ///
    /// 마지막 차원은 항상 1.0이라 영벡터가 나오지 않습니다.
    pub struct KeywordEmbedding {
        vocab: Vec<String>,
    }

    impl KeywordEmbedding {
        pub fn new(vocab: &[&str]) -> Self {
            Self {
                vocab: vocab.iter().map(|w| w.to_string()).collect(),
            }
        }

        pub fn vector(&self, text: &str) -> Vec<f32> {
            let mut v: Vec<f32> = self
                .vocab
                .iter()
                .map(|w| text.matches(w.as_str()).count() as f32)
                .collect();
            v.push(1.0);
            v
        }
    }

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedding {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(self.vector(text))
        }

        fn name(&self) -> &str {
            "keyword"
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::testing::KeywordEmbedding;
    use super::*;

    /// 입력 하나를 빠뜨리는 프로바이더
    struct DroppingEmbedding;

    #[async_trait]
    impl EmbeddingProvider for DroppingEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().skip(1).map(|_| vec![1.0]).collect())
        }

        fn name(&self) -> &str {
            "dropping"
        }
    }

    #[test]
    fn test_parse_embed_response_sorts_by_index() {
        let body = r#"{"object":"list","data":[
            {"object":"embedding","index":1,"embedding":[0.5,0.5]},
            {"object":"embedding","index":0,"embedding":[1.0,0.0]}
        ],"model":"text-embedding-3-small"}"#;

        let vectors = parse_embed_response(body).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.5, 0.5]]);
        assert!(parse_embed_response("{}").is_err());
    }

    #[test]
    fn test_request_body_shape() {
        let input = vec!["a".to_string(), "b".to_string()];
        let request = EmbedRequest {
            model: "text-embedding-3-small",
            input: &input,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "text-embedding-3-small");
        assert_eq!(json["input"][1], "b");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let embedder =
            OpenAiEmbedding::new("key".into(), "m", "http://localhost:8080/v1/").unwrap();
        assert_eq!(embedder.base_url, "http://localhost:8080/v1");
        assert_eq!(embedder.name(), "m");
    }

    #[tokio::test]
    async fn test_embed_in_batches_preserves_order() {
        let embedder = KeywordEmbedding::new(&["온실", "기억"]);
        let texts: Vec<String> = vec!["온실".into(), "기억 기억".into(), "없음".into()];

        let vectors = embed_in_batches(&embedder, &texts, 2).await.unwrap();
        assert_eq!(
            vectors,
            vec![
                vec![1.0, 0.0, 1.0],
                vec![0.0, 2.0, 1.0],
                vec![0.0, 0.0, 1.0]
            ]
        );
        assert!(embed_in_batches(&embedder, &[], 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_embed_in_batches_detects_count_mismatch() {
        let texts: Vec<String> = vec!["a".into(), "b".into()];
        let err = embed_in_batches(&DroppingEmbedding, &texts, 8)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::EmbeddingCountMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }
}
