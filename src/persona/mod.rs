//! Persona 모듈 - 컨텍스트 조립과 인물 대화
//!
//! - prompt: 페르소나 블록, 컨텍스트 카드, 메시지 조립
//! - session: 대화 세션, 작품 제목 매핑, 검색 + 생성 한 턴 처리

mod prompt;
mod session;

pub use prompt::{build_messages, card_title, find_persona_block, ContextCard, SYSTEM_PROMPT};
pub use session::{
    resolve_work_id, work_title, ChatReply, ChatSession, PersonaChat, WORK_TITLES,
};
