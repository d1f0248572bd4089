//! 대화 세션과 페르소나 챗 오케스트레이션
//!
//! 질문 → 하이브리드 검색 → 프롬프트 조립 → 생성 → 기록 순서로 한 턴을 처리합니다.

use anyhow::Result;

use crate::config::PromptConfig;
use crate::generation::{ChatMessage, GenerationChain};
use crate::knowledge::{HybridRetriever, RetrievedHit};

use super::prompt::{build_messages, find_persona_block};

/// 알려진 작품 표시 제목 → 작품 ID
pub const WORK_TITLES: [(&str, &str); 3] = [
    ("지구 끝의 온실", "jigu-ggut-onshil"),
    ("종의 기원", "jong-ui-giwon"),
    ("소년이 온다", "so-nyeon-i-onda"),
];

/// 표시 제목 또는 작품 ID를 작품 ID로 변환 (모르는 값은 그대로)
pub fn resolve_work_id(input: &str) -> String {
    let input = input.trim();
    WORK_TITLES
        .iter()
        .find(|(title, _)| *title == input)
        .map(|(_, id)| id.to_string())
        .unwrap_or_else(|| input.to_string())
}

/// 작품 ID의 표시 제목
pub fn work_title(work_id: &str) -> Option<&'static str> {
    WORK_TITLES
        .iter()
        .find(|(_, id)| *id == work_id)
        .map(|(title, _)| *title)
}

// ============================================================================
// ChatSession
// ============================================================================

/// 대화 상태 (작품, 말할 인물, 기록)
#[derive(Debug, Clone, Default)]
pub struct ChatSession {
    work_id: Option<String>,
    speak_as: Option<String>,
    history: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(work_id: Option<&str>, speak_as: Option<&str>) -> Self {
        let mut session = Self::default();
        session.select(work_id, speak_as);
        session
    }

    /// 작품/인물 선택. 이전 선택과 다르면 기록을 비웁니다.
    pub fn select(&mut self, work_id: Option<&str>, speak_as: Option<&str>) {
        let work_id = work_id
            .map(resolve_work_id)
            .filter(|w| !w.is_empty());
        let speak_as = speak_as
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        if work_id != self.work_id || speak_as != self.speak_as {
            if !self.history.is_empty() {
                tracing::debug!("Selection changed, clearing {} messages", self.history.len());
            }
            self.history.clear();
        }
        self.work_id = work_id;
        self.speak_as = speak_as;
    }

    pub fn work_id(&self) -> Option<&str> {
        self.work_id.as_deref()
    }

    pub fn speak_as(&self) -> Option<&str> {
        self.speak_as.as_deref()
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// 완료된 한 턴 기록
    pub fn record_turn(&mut self, query: &str, answer: &str) {
        self.history.push(ChatMessage::user(query));
        self.history.push(ChatMessage::assistant(answer));
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}

// ============================================================================
// PersonaChat
// ============================================================================

/// 한 턴의 결과
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub answer: String,
    pub backend: String,
    pub hits: Vec<RetrievedHit>,
    pub persona_found: bool,
}

/// 검색 + 생성 오케스트레이터
pub struct PersonaChat {
    retriever: HybridRetriever,
    generator: GenerationChain,
    top_k: usize,
    limits: PromptConfig,
}

impl PersonaChat {
    pub fn new(
        retriever: HybridRetriever,
        generator: GenerationChain,
        top_k: usize,
        limits: PromptConfig,
    ) -> Self {
        Self {
            retriever,
            generator,
            top_k,
            limits,
        }
    }

    pub fn retriever(&self) -> &HybridRetriever {
        &self.retriever
    }

    /// 질문 하나에 답하고 세션 기록에 추가
    ///
    /// 생성이 실패하면 기록은 바뀌지 않습니다.
    pub async fn reply(&self, session: &mut ChatSession, query: &str) -> Result<ChatReply> {
        let query = query.trim();
        if query.is_empty() {
            anyhow::bail!("query is empty");
        }

        let hits = self
            .retriever
            .retrieve(query, self.top_k, session.work_id())
            .await?;

        let persona_block = match (session.work_id(), session.speak_as()) {
            (Some(work), Some(name)) => {
                let block = find_persona_block(self.retriever.snapshot(), work, name);
                if block.is_none() {
                    tracing::debug!("No persona passage for {} in {}", name, work);
                }
                block
            }
            _ => None,
        };

        let messages = build_messages(
            query,
            &hits,
            persona_block.as_deref(),
            session.history(),
            self.limits,
        );
        let outcome = self.generator.generate(&messages).await?;

        session.record_turn(query, &outcome.text);
        Ok(ChatReply {
            answer: outcome.text,
            backend: outcome.backend,
            hits,
            persona_found: persona_block.is_some(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::embedding::testing::KeywordEmbedding;
    use crate::generation::testing::ScriptedBackend;
    use crate::generation::{GenerationBackend, Role};
    use crate::knowledge::{
        Chunk, ChunkId, ChunkKind, ChunkMetadata, MemoryVectorStore, VectorRecord, VectorStore,
    };
    use std::sync::Arc;

    #[test]
    fn test_resolve_work_id() {
        assert_eq!(resolve_work_id("소년이 온다"), "so-nyeon-i-onda");
        assert_eq!(resolve_work_id(" 지구 끝의 온실 "), "jigu-ggut-onshil");
        assert_eq!(resolve_work_id("jong-ui-giwon"), "jong-ui-giwon");
        assert_eq!(work_title("jong-ui-giwon"), Some("종의 기원"));
        assert_eq!(work_title("nope"), None);
    }

    #[test]
    fn test_session_resets_on_selection_change() {
        let mut session = ChatSession::new(Some("소년이 온다"), Some("동호"));
        assert_eq!(session.work_id(), Some("so-nyeon-i-onda"));

        session.record_turn("q", "a");
        session.select(Some("so-nyeon-i-onda"), Some(" 동호 "));
        assert_eq!(session.history().len(), 2);

        session.select(Some("so-nyeon-i-onda"), Some("정대"));
        assert!(session.history().is_empty());

        session.record_turn("q", "a");
        session.select(Some("종의 기원"), Some("정대"));
        assert!(session.history().is_empty());

        session.record_turn("q", "a");
        session.reset();
        assert!(session.history().is_empty());

        session.select(None, Some(""));
        assert_eq!(session.work_id(), None);
        assert_eq!(session.speak_as(), None);
    }

    async fn setup_chat(backend: ScriptedBackend) -> (PersonaChat, Arc<ScriptedBackend>) {
        let embedder = Arc::new(KeywordEmbedding::new(&["동호", "도청"]));
        let store = Arc::new(MemoryVectorStore::new());

        let mut persona_meta = ChunkMetadata::new("so-nyeon-i-onda", ChunkKind::Persona);
        persona_meta.character = Some("동호".into());
        let mut scene_meta = ChunkMetadata::new("so-nyeon-i-onda", ChunkKind::Scene);
        scene_meta.scene_title = Some("도청 앞".into());

        let chunks = vec![
            Chunk::new(
                &ChunkId::new("so-nyeon-i-onda", ChunkKind::Persona, "동호", 0),
                "열다섯 살 동호.".into(),
                persona_meta,
            )
            .unwrap(),
            Chunk::new(
                &ChunkId::new("so-nyeon-i-onda", ChunkKind::Scene, "s1", 0),
                "동호는 도청 앞에 있었다.".into(),
                scene_meta,
            )
            .unwrap(),
        ];
        let records: Vec<VectorRecord> = chunks
            .iter()
            .map(|c| VectorRecord {
                chunk: c.clone(),
                embedding: embedder.vector(&c.text),
            })
            .collect();
        store.upsert(&records).await.unwrap();

        let retriever = HybridRetriever::load(store, embedder, RetrievalConfig::default())
            .await
            .unwrap();

        // 체인이 Box를 소유하므로 기록 확인용으로 Arc 래퍼를 씀
        let backend = Arc::new(backend);
        let generator = GenerationChain::new(vec![Box::new(SharedBackend(backend.clone()))]);
        (
            PersonaChat::new(retriever, generator, 6, PromptConfig::default()),
            backend,
        )
    }

    struct SharedBackend(Arc<ScriptedBackend>);

    #[async_trait::async_trait]
    impl GenerationBackend for SharedBackend {
        async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
            self.0.generate(messages).await
        }

        fn name(&self) -> &str {
            self.0.name()
        }
    }

    #[tokio::test]
    async fn test_reply_injects_persona_and_records_turn() {
        let (chat, backend) = setup_chat(ScriptedBackend::replying("scripted", "나는 동호야.")).await;
        let mut session = ChatSession::new(Some("소년이 온다"), Some("동호"));

        let reply = chat.reply(&mut session, "도청 앞에서 뭐 했어?").await.unwrap();
        assert_eq!(reply.answer, "나는 동호야.");
        assert_eq!(reply.backend, "scripted");
        assert!(reply.persona_found);
        assert!(!reply.hits.is_empty());

        let seen = backend.seen.lock().unwrap();
        let messages = &seen[0];
        assert!(messages[0].content.contains("[인물 페르소나: 동호]\n열다섯 살 동호."));
        assert!(messages[1].content.contains("### 도청 앞"));

        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history()[0].role, Role::User);
        assert_eq!(session.history()[1].content, "나는 동호야.");
    }

    #[tokio::test]
    async fn test_failed_generation_leaves_history_untouched() {
        let (chat, _backend) = setup_chat(ScriptedBackend::failing("scripted")).await;
        let mut session = ChatSession::new(Some("so-nyeon-i-onda"), None);

        assert!(chat.reply(&mut session, "안녕").await.is_err());
        assert!(session.history().is_empty());
        assert!(chat.reply(&mut session, "  ").await.is_err());
    }
}
