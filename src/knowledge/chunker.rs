//! Text Chunking Module
//!
//! 원문 정규화 → 문장 단위 분할 → 길이 제한 청크 패킹을 제공합니다.
//! 한글/라틴 혼합 산문에 맞춘 휴리스틱이며 문법 파서는 아닙니다.
//!
//! 길이는 모두 문자(char) 수 기준입니다.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::ChunkConfig;

/// 문장 경계 표식 (원문에 나올 일 없는 사설 영역 문자)
const BOUNDARY: char = '\u{E000}';

static TRAILING_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]+\n").expect("valid trailing-space regex"));

static EXCESS_NEWLINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("valid newline regex"));

/// 종결 부호 + 공백
static TERMINAL_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([.!?…])\s+").expect("valid punctuation regex"));

/// 한국어 평서형 종결 어미 `다.` + 공백
static KOREAN_FINAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(다\.)\s+").expect("valid korean-final regex"));

static PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{2,}").expect("valid paragraph regex"));

static LINE_BREAKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n+").expect("valid line regex"));

// ============================================================================
// Normalizer
// ============================================================================

/// 원문 정규화
///
/// 순서대로: 줄바꿈 `\n` 통일, 곡선 따옴표 → 직선 따옴표,
/// 줄 끝 공백 제거, 3개 이상 연속 줄바꿈 → 2개, 전체 trim.
/// 멱등 함수입니다.
pub fn normalize(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = text
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    let text = TRAILING_SPACE.replace_all(&text, "\n");
    let text = EXCESS_NEWLINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}

// ============================================================================
// Segmenter
// ============================================================================

/// 문장 비슷한 단위로 분할
///
/// 종결 부호/종결 어미 뒤 공백, 빈 줄(2개 이상 줄바꿈)을 경계로 자릅니다.
/// 결과가 1개 이하이면 단일 줄바꿈 기준으로 다시 자릅니다.
/// 빈 조각은 버리고 순서는 유지합니다.
pub fn split_sentences(text: &str) -> Vec<String> {
    let text = text.replace("\r\n", "\n");
    let text = text.trim();

    let marked = TERMINAL_PUNCT.replace_all(text, format!("${{1}}{}", BOUNDARY).as_str());
    let marked = KOREAN_FINAL.replace_all(&marked, format!("${{1}}{}", BOUNDARY).as_str());
    let marked = PARAGRAPH_BREAK.replace_all(&marked, BOUNDARY.to_string().as_str());

    let parts: Vec<String> = marked
        .split(BOUNDARY)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();

    if parts.len() <= 1 {
        return LINE_BREAKS
            .split(text)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
    }

    parts
}

// ============================================================================
// Chunker
// ============================================================================

/// 정규화된 텍스트를 길이 제한 청크로 패킹
///
/// - `max_chars` 이하이면 그대로 단일 청크
/// - 아니면 문장 단위로 공백 하나를 사이에 두고 누적,
///   넘치면 현재 버퍼를 닫고 닫힌 청크의 마지막 `overlap` 문자 + 공백 + 넘친 문장으로 다음 버퍼 시작
///   (닫힌 청크가 `overlap`보다 길 때만)
/// - 한 문장이 `max_chars`보다 길면 잘라내지 않고 그대로 둡니다
pub fn chunk_text(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    let text = normalize(text);
    if text.is_empty() {
        return vec![];
    }
    if char_len(&text) <= max_chars {
        return vec![text];
    }

    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_len = 0usize;

    for sentence in split_sentences(&text) {
        let sentence_len = char_len(&sentence);

        if buf.is_empty() {
            buf = sentence;
            buf_len = sentence_len;
        } else if buf_len + 1 + sentence_len <= max_chars {
            buf.push(' ');
            buf.push_str(&sentence);
            buf_len += 1 + sentence_len;
        } else {
            let closed = std::mem::take(&mut buf);
            if overlap > 0 && buf_len > overlap {
                let tail = char_tail(&closed, overlap);
                buf = format!("{} {}", tail, sentence);
                buf_len = overlap + 1 + sentence_len;
            } else {
                buf = sentence;
                buf_len = sentence_len;
            }
            chunks.push(closed);
        }
    }

    if !buf.is_empty() {
        chunks.push(buf);
    }

    chunks
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

/// 문장 경계 기반 청커 (오버랩 포함)
pub struct SentenceChunker {
    config: ChunkConfig,
}

impl SentenceChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// 기본 설정으로 생성 (1200자 / 150자 오버랩)
    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    pub fn config(&self) -> ChunkConfig {
        self.config
    }
}

impl Chunker for SentenceChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        chunk_text(text, self.config.max_chars, self.config.overlap)
    }

    fn name(&self) -> &'static str {
        "SentenceChunker"
    }
}

/// 기본 청커 생성
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(SentenceChunker::with_defaults())
}

/// 설정 지정 청커 생성
pub fn sentence_chunker(config: ChunkConfig) -> Box<dyn Chunker> {
    Box::new(SentenceChunker::new(config))
}

// ============================================================================
// Helper Functions
// ============================================================================

#[inline]
fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// 마지막 `n` 문자 (UTF-8 경계 안전)
fn char_tail(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let total = char_len(s);
    if n >= total {
        return s;
    }
    match s.char_indices().nth(total - n) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

// ============================================================================
// Tests
// ============================================================================
