//! 청크 데이터 모델
//!
//! 인덱싱/검색 단위인 `Chunk`와 종류별 메타데이터를 정의합니다.
//! 메타데이터는 닫힌 `ChunkKind` + 종류별 선택 필드로 구성되며
//! 생성 시점에 검증됩니다.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// 청크 ID 구분자
pub const ID_SEPARATOR: &str = "::";

/// 충돌 구분자 표식 (`...::3::dup1a2b3c`)
pub const SUFFIX_MARKER: &str = "dup";

// ============================================================================
// ChunkKind
// ============================================================================

/// 청크 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChunkKind {
    /// 구조화된 장면
    Scene,
    /// 장면 분할 실패 원문 블록 (`scene_id == "_BLOCK_RAW_"`)
    SceneRawBlock,
    Chapter,
    /// 등장인물 소개 (페르소나 원문)
    Persona,
    /// 등장인물 섹션 원문 (`character == "_SECTION_RAW_"`)
    CharactersRaw,
    MetaOverview,
    MetaChapters,
    MetaScenes,
    MetaCharacters,
    FullText,
}

impl ChunkKind {
    pub const ALL: [ChunkKind; 10] = [
        ChunkKind::Scene,
        ChunkKind::SceneRawBlock,
        ChunkKind::Chapter,
        ChunkKind::Persona,
        ChunkKind::CharactersRaw,
        ChunkKind::MetaOverview,
        ChunkKind::MetaChapters,
        ChunkKind::MetaScenes,
        ChunkKind::MetaCharacters,
        ChunkKind::FullText,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Scene => "scene",
            ChunkKind::SceneRawBlock => "scene_raw_block",
            ChunkKind::Chapter => "chapter",
            ChunkKind::Persona => "persona",
            ChunkKind::CharactersRaw => "characters_raw",
            ChunkKind::MetaOverview => "meta_overview_raw",
            ChunkKind::MetaChapters => "meta_chapters_raw",
            ChunkKind::MetaScenes => "meta_scenes_raw",
            ChunkKind::MetaCharacters => "meta_characters_raw",
            ChunkKind::FullText => "fulltext",
        }
    }

    /// 페르소나 블록 후보가 되는 종류인지
    pub fn is_persona_source(&self) -> bool {
        matches!(self, ChunkKind::Persona | ChunkKind::CharactersRaw)
    }

    fn is_scene(&self) -> bool {
        matches!(self, ChunkKind::Scene | ChunkKind::SceneRawBlock)
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        ChunkKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown chunk kind: {}", s))
    }
}

impl TryFrom<String> for ChunkKind {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ChunkKind> for String {
    fn from(kind: ChunkKind) -> Self {
        kind.as_str().to_string()
    }
}

// ============================================================================
// ChunkMetadata
// ============================================================================

/// 청크 메타데이터
///
/// `work_id`와 `kind`는 필수이고 나머지는 종류에 따라 채워집니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub work_id: String,
    pub kind: ChunkKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spoiler_level: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
}

impl ChunkMetadata {
    /// 종류별 필드 없이 기본 메타데이터 생성
    pub fn new(work_id: impl Into<String>, kind: ChunkKind) -> Self {
        Self {
            work_id: work_id.into(),
            kind,
            scene_id: None,
            scene_title: None,
            chapter_id: None,
            chapter_label: None,
            character: None,
            spoiler_level: None,
            source_file: None,
        }
    }

    pub fn with_source_file(mut self, source_file: impl Into<String>) -> Self {
        self.source_file = Some(source_file.into());
        self
    }

    /// 종류별 필드 규칙 검증
    ///
    /// - `work_id`는 비어있지 않아야 함
    /// - 장면 필드는 장면 종류에만
    /// - 챕터 필드는 장면/챕터 종류에만
    /// - `character`는 페르소나 종류에 필수, 그 외에는 금지
    pub fn validate(&self) -> Result<()> {
        if self.work_id.trim().is_empty() {
            bail!("work_id must not be empty");
        }
        let kind = self.kind;

        if !kind.is_scene() && (self.scene_id.is_some() || self.scene_title.is_some()) {
            bail!("scene fields are not allowed on kind {}", kind);
        }
        if !(kind.is_scene() || kind == ChunkKind::Chapter)
            && (self.chapter_id.is_some() || self.chapter_label.is_some())
        {
            bail!("chapter fields are not allowed on kind {}", kind);
        }
        if !(kind.is_scene() || kind == ChunkKind::Chapter) && self.spoiler_level.is_some() {
            bail!("spoiler_level is not allowed on kind {}", kind);
        }
        match (kind.is_persona_source(), &self.character) {
            (true, None) => bail!("kind {} requires a character", kind),
            (false, Some(_)) => bail!("character is not allowed on kind {}", kind),
            _ => {}
        }
        Ok(())
    }
}

// ============================================================================
// ChunkId
// ============================================================================

/// 구조화된 청크 ID: `work::kind::subkey::index[::dup<suffix>]`
///
/// `suffix`는 인덱싱 중 ID 충돌 시 붙는 무작위 구분자입니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkId {
    pub work_id: String,
    pub kind: ChunkKind,
    pub sub_key: String,
    pub index: usize,
    pub suffix: Option<String>,
}

impl ChunkId {
    pub fn new(
        work_id: impl Into<String>,
        kind: ChunkKind,
        sub_key: impl Into<String>,
        index: usize,
    ) -> Self {
        Self {
            work_id: work_id.into(),
            kind,
            sub_key: sub_key.into(),
            index,
            suffix: None,
        }
    }

    /// 문자열 ID 파싱
    ///
    /// 앞에서 `work`, `kind`를, 뒤에서 `index`(+ 선택적 suffix)를 떼어내고
    /// 남은 가운데 부분을 sub_key로 봅니다 (sub_key 안의 `::`는 허용).
    pub fn parse(id: &str) -> Result<Self> {
        let parts: Vec<&str> = id.split(ID_SEPARATOR).collect();
        if parts.len() < 4 {
            bail!("Malformed chunk id (expected work::kind::subkey::index): {}", id);
        }

        let work_id = parts[0];
        let kind: ChunkKind = parts[1].parse()?;

        let last = parts[parts.len() - 1];
        let (suffix, rest) = match last.strip_prefix(SUFFIX_MARKER) {
            Some(suffix) if parts.len() >= 5 => (Some(suffix.to_string()), &parts[..parts.len() - 1]),
            _ => (None, &parts[..]),
        };

        let index = rest[rest.len() - 1]
            .parse::<usize>()
            .map_err(|_| anyhow::anyhow!("Malformed chunk id (bad index): {}", id))?;
        let sub_parts = &rest[2..rest.len() - 1];

        if work_id.is_empty() || sub_parts.is_empty() {
            bail!("Malformed chunk id (empty component): {}", id);
        }

        Ok(Self {
            work_id: work_id.to_string(),
            kind,
            sub_key: sub_parts.join(ID_SEPARATOR),
            index,
            suffix,
        })
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{w}{s}{k}{s}{sub}{s}{i}",
            w = self.work_id,
            k = self.kind,
            sub = self.sub_key,
            i = self.index,
            s = ID_SEPARATOR
        )?;
        if let Some(ref suffix) = self.suffix {
            write!(f, "{}{}{}", ID_SEPARATOR, SUFFIX_MARKER, suffix)?;
        }
        Ok(())
    }
}

// ============================================================================
// Chunk
// ============================================================================

/// 인덱싱 단위 청크 (생성 후 불변)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// 검증된 청크 생성
    pub fn new(id: &ChunkId, text: String, metadata: ChunkMetadata) -> Result<Self> {
        if text.trim().is_empty() {
            bail!("chunk {} has empty text", id);
        }
        if id.work_id != metadata.work_id || id.kind != metadata.kind {
            bail!("chunk id {} does not match its metadata", id);
        }
        metadata.validate()?;

        Ok(Self {
            id: id.to_string(),
            text,
            metadata,
        })
    }

    /// 역직렬화된 청크 검증
    ///
    /// `new`와 같은 규칙에 더해 ID 문자열이 파싱 가능한지 확인합니다.
    pub fn validate(&self) -> Result<()> {
        let id = ChunkId::parse(&self.id)?;
        if self.text.trim().is_empty() {
            bail!("chunk {} has empty text", self.id);
        }
        if id.work_id != self.metadata.work_id || id.kind != self.metadata.kind {
            bail!("chunk id {} does not match its metadata", self.id);
        }
        self.metadata.validate()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip_strings() {
        for kind in ChunkKind::ALL {
            assert_eq!(kind.as_str().parse::<ChunkKind>().unwrap(), kind);
        }
        assert!("nope".parse::<ChunkKind>().is_err());
    }

    #[test]
    fn test_kind_serializes_as_plain_string() {
        let json = serde_json::to_string(&ChunkKind::SceneRawBlock).unwrap();
        assert_eq!(json, "\"scene_raw_block\"");
        let kind: ChunkKind = serde_json::from_str("\"meta_overview_raw\"").unwrap();
        assert_eq!(kind, ChunkKind::MetaOverview);
    }

    #[test]
    fn test_chunk_id_parse_back() {
        let id = ChunkId::new("so-nyeon-i-onda", ChunkKind::Persona, "동호", 3);
        let text = id.to_string();
        assert_eq!(text, "so-nyeon-i-onda::persona::동호::3");
        assert_eq!(ChunkId::parse(&text).unwrap(), id);
    }

    #[test]
    fn test_chunk_id_sub_key_may_contain_separator() {
        let id = ChunkId::new("w", ChunkKind::Scene, "a::b", 0);
        let parsed = ChunkId::parse(&id.to_string()).unwrap();
        assert_eq!(parsed.sub_key, "a::b");
        assert_eq!(parsed.index, 0);
    }

    #[test]
    fn test_chunk_id_with_suffix() {
        let parsed = ChunkId::parse("w::chapter::c1::2::dup123456").unwrap();
        assert_eq!(parsed.sub_key, "c1");
        assert_eq!(parsed.index, 2);
        assert_eq!(parsed.suffix.as_deref(), Some("123456"));
        assert_eq!(parsed.to_string(), "w::chapter::c1::2::dup123456");
    }

    #[test]
    fn test_chunk_id_malformed() {
        assert!(ChunkId::parse("w::scene::1").is_err());
        assert!(ChunkId::parse("w::unknown::x::1").is_err());
        assert!(ChunkId::parse("w::scene::x::y").is_err());
    }

    #[test]
    fn test_metadata_validation() {
        let mut meta = ChunkMetadata::new("w", ChunkKind::Persona);
        assert!(meta.validate().is_err());
        meta.character = Some("유진".into());
        assert!(meta.validate().is_ok());

        let mut chapter = ChunkMetadata::new("w", ChunkKind::Chapter);
        chapter.scene_title = Some("x".into());
        assert!(chapter.validate().is_err());

        let mut fulltext = ChunkMetadata::new("w", ChunkKind::FullText);
        fulltext.spoiler_level = Some(3);
        assert!(fulltext.validate().is_err());

        assert!(ChunkMetadata::new(" ", ChunkKind::FullText).validate().is_err());
    }

    #[test]
    fn test_chunk_rejects_empty_text_and_mismatched_id() {
        let id = ChunkId::new("w", ChunkKind::FullText, "all", 0);
        let meta = ChunkMetadata::new("w", ChunkKind::FullText);
        assert!(Chunk::new(&id, "  ".into(), meta.clone()).is_err());

        let other = ChunkMetadata::new("x", ChunkKind::FullText);
        assert!(Chunk::new(&id, "text".into(), other).is_err());

        let chunk = Chunk::new(&id, "text".into(), meta).unwrap();
        assert_eq!(chunk.id, "w::fulltext::all::0");
    }

    #[test]
    fn test_deserialized_chunk_validation() {
        let line = r#"{"id":"w::fulltext::all::0","text":"전문.","metadata":{"work_id":"w","kind":"fulltext"}}"#;
        let chunk: Chunk = serde_json::from_str(line).unwrap();
        assert!(chunk.validate().is_ok());

        let mut bad = chunk.clone();
        bad.id = "w::fulltext".to_string();
        assert!(bad.validate().is_err());

        let mut bad = chunk.clone();
        bad.text = "\n".to_string();
        assert!(bad.validate().is_err());

        let mut bad = chunk;
        bad.metadata.kind = ChunkKind::Chapter;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_metadata_json_skips_absent_fields() {
        let meta = ChunkMetadata::new("w", ChunkKind::FullText).with_source_file("w_fulltext.jsonl");
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["kind"], "fulltext");
        assert!(json.get("scene_id").is_none());
    }
}
