//! 생성 모듈 - 역할 태그 메시지 → 답변 텍스트
//!
//! OpenAI Responses API를 먼저 시도하고 실패하면 Chat Completions로 넘어갑니다.
//! 백엔드 순서는 `GenerationChain`의 목록 순서 그대로입니다.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::embedding::get_api_key;
use crate::error::PipelineError;

/// 생성 요청 타임아웃 (임베딩보다 길게)
const GENERATION_TIMEOUT: Duration = Duration::from_secs(120);

// ============================================================================
// Messages
// ============================================================================

/// 메시지 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 역할 태그가 붙은 대화 한 턴
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ============================================================================
// GenerationBackend Trait
// ============================================================================

/// 생성 백엔드 트레이트
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// 메시지 목록으로 답변 생성 (앞뒤 공백 제거된 텍스트)
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String>;

    /// 백엔드 이름
    fn name(&self) -> &str;
}

/// 성공한 생성 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub text: String,
    /// 답변을 만든 백엔드
    pub backend: String,
}

/// 순서대로 시도하는 백엔드 체인
pub struct GenerationChain {
    backends: Vec<Box<dyn GenerationBackend>>,
}

impl GenerationChain {
    pub fn new(backends: Vec<Box<dyn GenerationBackend>>) -> Self {
        Self { backends }
    }

    /// Responses → Chat Completions 기본 체인
    pub fn openai(model: &str, base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(GENERATION_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;
        let api_key = get_api_key()?;

        Ok(Self::new(vec![
            Box::new(OpenAiResponses::new(client.clone(), &api_key, model, base_url)),
            Box::new(OpenAiChatCompletions::new(client, &api_key, model, base_url)),
        ]))
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// 첫 성공 결과 반환, 모두 실패하면 `GenerationFailed`
    pub async fn generate(&self, messages: &[ChatMessage]) -> Result<GenerationOutcome> {
        let mut failures = Vec::new();

        for backend in &self.backends {
            match backend.generate(messages).await {
                Ok(text) if !text.is_empty() => {
                    return Ok(GenerationOutcome {
                        text,
                        backend: backend.name().to_string(),
                    });
                }
                Ok(_) => {
                    tracing::warn!("Backend {} returned an empty answer", backend.name());
                    failures.push(format!("{}: empty answer", backend.name()));
                }
                Err(e) => {
                    tracing::warn!("Backend {} failed: {:#}", backend.name(), e);
                    failures.push(format!("{}: {:#}", backend.name(), e));
                }
            }
        }

        Err(PipelineError::GenerationFailed(failures).into())
    }
}

// ============================================================================
// OpenAI Backends
// ============================================================================

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: &'a [ChatMessage],
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

/// 공통 POST + 상태 코드 처리
async fn post_json<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &T,
) -> Result<Value> {
    let response = client
        .post(url)
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await
        .with_context(|| format!("Failed to send request to {}", url))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .context("Failed to read response body")?;

    if !status.is_success() {
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or(text);
        anyhow::bail!("API error ({}): {}", status, message);
    }

    serde_json::from_str(&text).context("Failed to parse response JSON")
}

/// Responses API 응답에서 텍스트 추출
///
/// `output_text`가 있으면 그대로, 없으면 `output[].content[]`의
/// `output_text` 조각들을 이어붙입니다.
pub fn extract_responses_text(value: &Value) -> Option<String> {
    if let Some(text) = value.get("output_text").and_then(Value::as_str) {
        return Some(text.trim().to_string());
    }

    let parts: Vec<&str> = value
        .get("output")?
        .as_array()?
        .iter()
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();

    if parts.is_empty() {
        return None;
    }
    Some(parts.concat().trim().to_string())
}

/// Chat Completions 응답에서 텍스트 추출
pub fn extract_chat_text(value: &Value) -> Option<String> {
    value
        .get("choices")
        .and_then(|choices| choices.as_array())
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(|text| text.trim().to_string())
}

/// OpenAI Responses API 백엔드
///
/// source: https://platform.openai.com/docs/api-reference/responses
pub struct OpenAiResponses {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
}

impl OpenAiResponses {
    pub fn new(client: reqwest::Client, api_key: &str, model: &str, base_url: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
            url: format!("{}/responses", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl GenerationBackend for OpenAiResponses {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = ResponsesRequest {
            model: &self.model,
            input: messages,
        };
        let value = post_json(&self.client, &self.url, &self.api_key, &body).await?;
        extract_responses_text(&value)
            .ok_or_else(|| anyhow::anyhow!("Responses API returned no output text"))
    }

    fn name(&self) -> &str {
        "openai-responses"
    }
}

/// OpenAI Chat Completions 백엔드
///
/// source: https://platform.openai.com/docs/api-reference/chat
pub struct OpenAiChatCompletions {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
}

impl OpenAiChatCompletions {
    pub fn new(client: reqwest::Client, api_key: &str, model: &str, base_url: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl GenerationBackend for OpenAiChatCompletions {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = ChatCompletionsRequest {
            model: &self.model,
            messages,
        };
        let value = post_json(&self.client, &self.url, &self.api_key, &body).await?;
        extract_chat_text(&value)
            .ok_or_else(|| anyhow::anyhow!("Chat Completions returned no message content"))
    }

    fn name(&self) -> &str {
        "openai-chat-completions"
    }
}

// ============================================================================
// Test Doubles
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// 고정 응답 또는 고정 실패를 돌려주며 받은 메시지를 기록하는 백엔드
    pub struct ScriptedBackend {
        pub name: String,
        pub reply: Option<String>,
        pub seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedBackend {
        pub fn replying(name: &str, reply: &str) -> Self {
            Self {
                name: name.to_string(),
                reply: Some(reply.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(name: &str) -> Self {
            Self {
                name: name.to_string(),
                reply: None,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
            self.seen.lock().unwrap().push(messages.to_vec());
            match &self.reply {
                Some(reply) => Ok(reply.clone()),
                None => anyhow::bail!("{} is down", self.name),
            }
        }

        fn name(&self) -> &str {
            &self.name
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::testing::ScriptedBackend;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_serialization() {
        let json = serde_json::to_value(ChatMessage::system("규칙")).unwrap();
        assert_eq!(json, json!({"role": "system", "content": "규칙"}));
        assert_eq!(
            serde_json::to_value(Role::Assistant).unwrap(),
            json!("assistant")
        );
    }

    #[test]
    fn test_extract_responses_text() {
        let value = json!({
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "  안녕, "},
                    {"type": "refusal", "refusal": "x"},
                    {"type": "output_text", "text": "나는 동호야. "}
                ]}
            ]
        });
        assert_eq!(
            extract_responses_text(&value).as_deref(),
            Some("안녕, 나는 동호야.")
        );
        assert_eq!(
            extract_responses_text(&json!({"output_text": " hi "})).as_deref(),
            Some("hi")
        );
        assert!(extract_responses_text(&json!({"output": []})).is_none());
    }

    #[test]
    fn test_extract_chat_text() {
        let value = json!({"choices": [{"message": {"role": "assistant", "content": " 응. \n"}}]});
        assert_eq!(extract_chat_text(&value).as_deref(), Some("응."));
        assert!(extract_chat_text(&json!({"choices": []})).is_none());
    }

    #[test]
    fn test_backend_urls() {
        let client = reqwest::Client::new();
        let responses = OpenAiResponses::new(client.clone(), "k", "gpt-4o", "http://x/v1/");
        let chat = OpenAiChatCompletions::new(client, "k", "gpt-4o", "http://x/v1");
        assert_eq!(responses.url, "http://x/v1/responses");
        assert_eq!(chat.url, "http://x/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_chain_falls_back_in_order() {
        let chain = GenerationChain::new(vec![
            Box::new(ScriptedBackend::failing("primary")),
            Box::new(ScriptedBackend::replying("secondary", "대답")),
            Box::new(ScriptedBackend::replying("tertiary", "안 불림")),
        ]);
        assert_eq!(chain.backend_names(), vec!["primary", "secondary", "tertiary"]);

        let outcome = chain.generate(&[ChatMessage::user("질문")]).await.unwrap();
        assert_eq!(outcome.text, "대답");
        assert_eq!(outcome.backend, "secondary");
    }

    #[tokio::test]
    async fn test_chain_treats_empty_answer_as_failure() {
        let chain = GenerationChain::new(vec![
            Box::new(ScriptedBackend::replying("primary", "")),
            Box::new(ScriptedBackend::replying("secondary", "ok")),
        ]);
        let outcome = chain.generate(&[]).await.unwrap();
        assert_eq!(outcome.backend, "secondary");
    }

    #[tokio::test]
    async fn test_chain_all_failed() {
        let chain = GenerationChain::new(vec![
            Box::new(ScriptedBackend::failing("a")),
            Box::new(ScriptedBackend::failing("b")),
        ]);
        let err = chain.generate(&[ChatMessage::user("q")]).await.unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::GenerationFailed(reasons)) => {
                assert_eq!(reasons.len(), 2);
                assert!(reasons[0].starts_with("a: "));
                assert!(reasons[1].contains("b is down"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let empty = GenerationChain::new(vec![]);
        assert!(empty.generate(&[]).await.is_err());
    }
}
