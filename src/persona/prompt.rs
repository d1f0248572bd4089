//! Context Assembler - 검색 결과 → 생성 요청 메시지
//!
//! 시스템 지시문(+ 페르소나 블록), 최근 대화, 질문과 컨텍스트 카드 순서입니다.

use crate::config::PromptConfig;
use crate::generation::ChatMessage;
use crate::knowledge::{ChunkMetadata, CorpusSnapshot, RetrievedHit};

/// 인물 말투 재현 지시문
pub const SYSTEM_PROMPT: &str = "당신은 소설 속 인물의 말투를 재현하는 AI입니다.\n\
컨텍스트를 근거로 사용하세요.\n\
당신이 소설 속 등장인물이라고 생각하세요.\n\
대화할 때는 해당 인물의 말투/가치관을 반영해 1~2문장 이내로 대답하세요.\n\
답할때는 대화하듯이 자연스럽게 얘기해";

/// 프롬프트에 들어가는 컨텍스트 카드
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextCard {
    pub title: String,
    pub text: String,
}

impl ContextCard {
    pub fn from_hit(hit: &RetrievedHit) -> Self {
        Self {
            title: card_title(&hit.metadata),
            text: hit.text.clone(),
        }
    }

    pub fn render(&self) -> String {
        format!("### {}\n{}", self.title, self.text)
    }
}

/// 카드 제목: 장면 제목 → 챕터 라벨 → 종류 (빈 문자열은 없는 것으로 봄)
pub fn card_title(metadata: &ChunkMetadata) -> String {
    [&metadata.scene_title, &metadata.chapter_label]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
        .cloned()
        .unwrap_or_else(|| metadata.kind.to_string())
}

/// 스냅샷에서 페르소나 원문 찾기
///
/// 같은 작품의 persona/characters_raw 청크 중 `character`에 이름이 포함된
/// 첫 청크(스냅샷 순서)를 블록으로 만듭니다. 순위 매김은 없습니다.
pub fn find_persona_block(
    snapshot: &CorpusSnapshot,
    work_id: &str,
    speak_as: &str,
) -> Option<String> {
    if work_id.is_empty() || speak_as.is_empty() {
        return None;
    }

    snapshot
        .iter()
        .find(|chunk| {
            let meta = &chunk.metadata;
            meta.work_id == work_id
                && meta.kind.is_persona_source()
                && meta
                    .character
                    .as_deref()
                    .map_or(false, |c| c.contains(speak_as))
        })
        .map(|chunk| format!("[인물 페르소나: {}]\n{}", speak_as, chunk.text))
}

/// 생성 요청 메시지 조립
///
/// 카드는 `max_cards`개, 대화 기록은 마지막 `history_turns`개 메시지만 씁니다.
pub fn build_messages(
    query: &str,
    hits: &[RetrievedHit],
    persona_block: Option<&str>,
    history: &[ChatMessage],
    limits: PromptConfig,
) -> Vec<ChatMessage> {
    let mut system = SYSTEM_PROMPT.to_string();
    if let Some(block) = persona_block {
        system.push_str("\n\n");
        system.push_str(block);
    }

    let cards: Vec<String> = hits
        .iter()
        .take(limits.max_cards)
        .map(|hit| ContextCard::from_hit(hit).render())
        .collect();

    let recent = &history[history.len().saturating_sub(limits.history_turns)..];

    let mut messages = Vec::with_capacity(recent.len() + 2);
    messages.push(ChatMessage::system(system));
    messages.extend_from_slice(recent);
    messages.push(ChatMessage::user(format!(
        "질문: {}\n\n[컨텍스트]\n{}",
        query,
        cards.join("\n\n")
    )));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::Role;
    use crate::knowledge::{Chunk, ChunkId, ChunkKind, SearchMethod};

    fn persona(work: &str, character: &str, index: usize, text: &str) -> Chunk {
        let kind = if character == "_SECTION_RAW_" {
            ChunkKind::CharactersRaw
        } else {
            ChunkKind::Persona
        };
        let mut meta = ChunkMetadata::new(work, kind);
        meta.character = Some(character.to_string());
        Chunk::new(&ChunkId::new(work, kind, character, index), text.to_string(), meta).unwrap()
    }

    fn hit(index: usize, metadata: ChunkMetadata) -> RetrievedHit {
        RetrievedHit {
            id: format!("h{}", index),
            text: format!("본문 {}", index),
            metadata,
            fused_score: 1.0 / (61 + index) as f64,
            method: SearchMethod::Hybrid,
        }
    }

    #[test]
    fn test_card_title_fallbacks() {
        let mut meta = ChunkMetadata::new("w", ChunkKind::Scene);
        meta.scene_title = Some("도청 앞".into());
        meta.chapter_label = Some("1장".into());
        assert_eq!(card_title(&meta), "도청 앞");

        meta.scene_title = Some("  ".into());
        assert_eq!(card_title(&meta), "1장");

        meta.chapter_label = None;
        assert_eq!(card_title(&meta), "scene");

        let meta = ChunkMetadata::new("w", ChunkKind::MetaOverview);
        assert_eq!(card_title(&meta), "meta_overview_raw");
    }

    #[test]
    fn test_find_persona_block_first_match_wins() {
        let snapshot = CorpusSnapshot::new(vec![
            persona("other", "동호", 0, "다른 작품"),
            persona("so-nyeon-i-onda", "정대", 0, "정대 소개"),
            persona("so-nyeon-i-onda", "소년 동호", 0, "첫 번째 동호"),
            persona("so-nyeon-i-onda", "동호", 1, "두 번째 동호"),
        ]);

        assert_eq!(
            find_persona_block(&snapshot, "so-nyeon-i-onda", "동호").as_deref(),
            Some("[인물 페르소나: 동호]\n첫 번째 동호")
        );
        assert!(find_persona_block(&snapshot, "so-nyeon-i-onda", "은숙").is_none());
        assert!(find_persona_block(&snapshot, "so-nyeon-i-onda", "").is_none());
        assert!(find_persona_block(&snapshot, "", "동호").is_none());
    }

    #[test]
    fn test_find_persona_block_accepts_raw_sections() {
        let snapshot = CorpusSnapshot::new(vec![persona("w", "_SECTION_RAW_", 0, "인물 섹션")]);
        assert!(find_persona_block(&snapshot, "w", "SECTION").is_some());
    }

    #[test]
    fn test_build_messages_layout() {
        let mut scene = ChunkMetadata::new("w", ChunkKind::Scene);
        scene.scene_title = Some("도청 앞".into());
        let hits = vec![hit(0, scene), hit(1, ChunkMetadata::new("w", ChunkKind::FullText))];

        let messages = build_messages(
            "넌 누구야?",
            &hits,
            Some("[인물 페르소나: 동호]\n소년"),
            &[],
            PromptConfig::default(),
        );

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.starts_with(SYSTEM_PROMPT));
        assert!(messages[0].content.ends_with("\n\n[인물 페르소나: 동호]\n소년"));
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(
            messages[1].content,
            "질문: 넌 누구야?\n\n[컨텍스트]\n### 도청 앞\n본문 0\n\n### fulltext\n본문 1"
        );
    }

    #[test]
    fn test_build_messages_bounds_cards_and_history() {
        let hits: Vec<RetrievedHit> = (0..12)
            .map(|i| hit(i, ChunkMetadata::new("w", ChunkKind::Chapter)))
            .collect();
        let history: Vec<ChatMessage> = (0..10)
            .map(|i| {
                if i % 2 == 0 {
                    ChatMessage::user(format!("q{}", i))
                } else {
                    ChatMessage::assistant(format!("a{}", i))
                }
            })
            .collect();

        let messages = build_messages("q", &hits, None, &history, PromptConfig::default());

        // system + 최근 6개 + user
        assert_eq!(messages.len(), 8);
        assert_eq!(messages[0].content, SYSTEM_PROMPT);
        assert_eq!(messages[1].content, "q4");
        assert_eq!(messages[6].content, "a9");

        let user = &messages[7].content;
        assert_eq!(user.matches("### chapter").count(), 8);
        assert!(user.contains("본문 7"));
        assert!(!user.contains("본문 8"));
    }

    #[test]
    fn test_build_messages_without_hits() {
        let messages = build_messages("q", &[], None, &[], PromptConfig::default());
        assert_eq!(messages[1].content, "질문: q\n\n[컨텍스트]\n");
    }
}
