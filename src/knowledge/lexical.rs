//! Lexical Index - BM25 키워드 인덱스
//!
//! [`bm25`] 크레이트의 검색 엔진을 감싸고 토크나이저만 교체합니다.
//! 소문자화 후 `[0-9A-Za-z가-힣]+` 런을 토큰으로 사용합니다.
//! 토큰이 하나도 없는 문서는 인덱스에서 제외됩니다.
//! 인덱싱 가능한 문서가 없으면 인덱스 자체가 "사용 불가"입니다.
//!
//! 질의 토큰은 중복 제거하지 않습니다 (반복된 토큰은 매번 점수에 더해짐).

use std::cmp::Ordering;

use bm25::{Document, SearchEngine, SearchEngineBuilder, Tokenizer};
use once_cell::sync::Lazy;
use regex::Regex;

use super::vector::RankedHit;

/// BM25 term frequency 포화 파라미터
pub const BM25_K1: f32 = 1.5;
/// BM25 문서 길이 정규화 파라미터
pub const BM25_B: f32 = 0.75;

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9A-Za-z가-힣]+").expect("valid token regex"));

/// 텍스트 토큰화
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    TOKEN_RE
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// 한글/영숫자 런 토크나이저 (불용어, 어간 추출 없음)
#[derive(Debug, Default, Clone, Copy)]
pub struct CorpusTokenizer;

impl Tokenizer for CorpusTokenizer {
    fn tokenize(&self, input_text: &str) -> Vec<String> {
        tokenize(input_text)
    }
}

// ============================================================================
// LexicalIndex
// ============================================================================

/// BM25 인덱스
///
/// 엔진 내부 문서 키는 `ids`의 위치입니다.
pub struct LexicalIndex {
    engine: SearchEngine<usize, u64, CorpusTokenizer>,
    ids: Vec<String>,
}

impl LexicalIndex {
    /// (id, text) 목록에서 인덱스 구축
    ///
    /// 토큰화 가능한 문서가 없으면 `None` (사용 불가)
    pub fn build<'a, I>(documents: I) -> Option<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut ids = Vec::new();
        let mut docs = Vec::new();
        let mut skipped = 0usize;

        for (id, text) in documents {
            if tokenize(text).is_empty() {
                skipped += 1;
                continue;
            }
            docs.push(Document::new(ids.len(), text));
            ids.push(id.to_string());
        }

        if skipped > 0 {
            tracing::debug!("Lexical index skipped {} untokenizable documents", skipped);
        }

        if ids.is_empty() {
            tracing::warn!("Lexical index unavailable: no tokenizable documents");
            return None;
        }

        // avgdl은 토큰화 가능한 문서만으로 계산됨
        let engine =
            SearchEngineBuilder::<usize, u64, CorpusTokenizer>::with_tokenizer_and_documents(
                CorpusTokenizer,
                docs,
            )
            .k1(BM25_K1)
            .b(BM25_B)
            .build();

        Some(Self { engine, ids })
    }

    /// 인덱싱된 문서 수
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// 전체 문서 점수 순위 (점수 > 0 만, 내림차순, 동점은 인덱스 순서)
    ///
    /// `keep`으로 절단 전에 후보를 거를 수 있습니다.
    pub fn rank<F>(&self, query: &str, limit: usize, keep: F) -> Vec<RankedHit>
    where
        F: Fn(&str) -> bool,
    {
        if limit == 0 || tokenize(query).is_empty() {
            return vec![];
        }

        // 엔진 결과의 동점 순서는 보장되지 않으므로 위치로 다시 정렬
        let mut scored: Vec<(usize, f32)> = self
            .engine
            .search(query, self.ids.len())
            .into_iter()
            .map(|result| (result.document.id, result.score))
            .filter(|(pos, score)| *score > 0.0 && keep(&self.ids[*pos]))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(limit);

        scored
            .into_iter()
            .map(|(pos, score)| RankedHit {
                id: self.ids[pos].clone(),
                score,
            })
            .collect()
    }

    /// 필터 없는 검색
    pub fn search(&self, query: &str, limit: usize) -> Vec<RankedHit> {
        self.rank(query, limit, |_| true)
    }
}

impl std::fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalIndex")
            .field("documents", &self.ids.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
