//! 코퍼스 수집 모듈
//!
//! 데이터 디렉토리의 종류별 JSONL(장면/챕터/인물/메타/전문)을 읽어
//! 균일한 `Chunk` 목록으로 펼칩니다.
//! 종류별 핸들러는 서로 독립적이며 설정 토글로 끌 수 있습니다.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use walkdir::WalkDir;

use crate::config::{CorpusConfig, KindToggles};
use crate::knowledge::{Chunk, ChunkId, ChunkKind, ChunkMetadata, Chunker};

/// 작품 ID가 없는 레코드의 기본값
pub const UNKNOWN_WORK: &str = "unknown";
/// 인물 이름이 없는 레코드의 기본값
pub const UNKNOWN_CHARACTER: &str = "UNKNOWN";
/// 장면 분할 실패 블록 표식
pub const RAW_BLOCK_SCENE_ID: &str = "_BLOCK_RAW_";
/// 인물 섹션 원문 표식
pub const RAW_SECTION_CHARACTER: &str = "_SECTION_RAW_";
/// 장면/챕터 레코드의 기본 스포일러 등급
pub const DEFAULT_SPOILER_LEVEL: i64 = 3;
/// 같은 레코드 키가 반복될 때 sub_key 뒤에 붙는 순번 구분자
pub const REPEAT_MARKER: char = '~';

/// 메타 레코드에서 읽는 섹션 필드 (순서 = 출력 순서)
const META_FIELDS: [(&str, ChunkKind); 4] = [
    ("overview_raw", ChunkKind::MetaOverview),
    ("chapters_raw", ChunkKind::MetaChapters),
    ("scenes_raw", ChunkKind::MetaScenes),
    ("characters_raw", ChunkKind::MetaCharacters),
];

// ============================================================================
// Source Kinds
// ============================================================================

/// 소스 파일 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// `*_scenes_*.jsonl`
    Scenes,
    /// `*_chapters_*.jsonl`
    Chapters,
    /// `*_characters_*.jsonl`
    Characters,
    /// `*_meta_*.jsonl`
    Meta,
    /// `*_fulltext*.jsonl`
    FullText,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::Scenes,
        SourceKind::Chapters,
        SourceKind::Characters,
        SourceKind::Meta,
        SourceKind::FullText,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Scenes => "scenes",
            SourceKind::Chapters => "chapters",
            SourceKind::Characters => "characters",
            SourceKind::Meta => "meta",
            SourceKind::FullText => "fulltext",
        }
    }

    /// 파일 이름이 이 종류의 패턴과 맞는지
    pub fn matches(&self, file_name: &str) -> bool {
        if file_name.starts_with('.') {
            return false;
        }
        let Some(stem) = file_name.strip_suffix(".jsonl") else {
            return false;
        };
        match self {
            SourceKind::Scenes => stem.contains("_scenes_"),
            SourceKind::Chapters => stem.contains("_chapters_"),
            SourceKind::Characters => stem.contains("_characters_"),
            SourceKind::Meta => stem.contains("_meta_"),
            SourceKind::FullText => stem.contains("_fulltext"),
        }
    }

    pub fn enabled(&self, toggles: &KindToggles) -> bool {
        match self {
            SourceKind::Scenes => toggles.scenes,
            SourceKind::Chapters => toggles.chapters,
            SourceKind::Characters => toggles.characters,
            SourceKind::Meta => toggles.meta,
            SourceKind::FullText => toggles.fulltext,
        }
    }
}

// ============================================================================
// Source Records
// ============================================================================

/// 문자열/숫자/불리언을 모두 문자열로 받기 (빈 문자열은 None)
fn loose_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// 정수 또는 정수 문자열
fn loose_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SceneRow {
    #[serde(deserialize_with = "loose_string")]
    work_id: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    scene_id: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    scene_title: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    chapter_id: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    chapter_label: Option<String>,
    #[serde(deserialize_with = "loose_int")]
    spoiler_level: Option<i64>,
    #[serde(deserialize_with = "loose_string")]
    scene_full_text: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChapterRow {
    #[serde(deserialize_with = "loose_string")]
    work_id: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    chapter_id: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    chapter_label: Option<String>,
    #[serde(deserialize_with = "loose_int")]
    spoiler_level: Option<i64>,
    #[serde(deserialize_with = "loose_string")]
    chapter_full_text: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CharacterRow {
    #[serde(deserialize_with = "loose_string")]
    work_id: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    character: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    full_bio: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MetaRow {
    #[serde(deserialize_with = "loose_string")]
    work_id: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    overview_raw: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    chapters_raw: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    scenes_raw: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    characters_raw: Option<String>,
}

impl MetaRow {
    fn section(&self, field: &str) -> Option<&str> {
        match field {
            "overview_raw" => self.overview_raw.as_deref(),
            "chapters_raw" => self.chapters_raw.as_deref(),
            "scenes_raw" => self.scenes_raw.as_deref(),
            "characters_raw" => self.characters_raw.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FullTextRow {
    #[serde(deserialize_with = "loose_string")]
    work_id: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    full_text: Option<String>,
    #[serde(deserialize_with = "loose_string")]
    text: Option<String>,
}

fn work_or_unknown(work_id: Option<String>) -> String {
    work_id.unwrap_or_else(|| UNKNOWN_WORK.to_string())
}

// ============================================================================
// Corpus Loader
// ============================================================================

/// 로딩 통계
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadStats {
    pub files: usize,
    pub records: usize,
    /// 텍스트가 없거나 파싱에 실패한 레코드
    pub skipped: usize,
    pub chunks: usize,
}

/// 레코드 키 `(work, kind, sub_key)` 배정기
///
/// 대체 sub_key(`raw`, `?`, `UNKNOWN`, `all` 등)나 중복 ID는 여러 레코드가
/// 같은 키를 갖게 만듭니다. 처음 나온 키는 그대로 두고, 반복될 때마다
/// `sub_key~n`으로 바꿔서 청크 ID가 코퍼스 전체에서 유일하게 합니다.
#[derive(Debug, Default)]
pub struct RecordKeys {
    used: HashSet<(String, ChunkKind, String)>,
}

impl RecordKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// 아직 쓰이지 않은 sub_key 배정
    pub fn claim(&mut self, work_id: &str, kind: ChunkKind, sub_key: &str) -> String {
        let mut candidate = sub_key.to_string();
        let mut n = 0usize;
        while !self
            .used
            .insert((work_id.to_string(), kind, candidate.clone()))
        {
            n += 1;
            candidate = format!("{}{}{}", sub_key, REPEAT_MARKER, n);
        }
        if n > 0 {
            tracing::debug!(
                "Repeated record key {}::{}::{} renamed to {}",
                work_id,
                kind,
                sub_key,
                candidate
            );
        }
        candidate
    }
}

/// 코퍼스 로더
pub struct CorpusLoader<'a> {
    config: &'a CorpusConfig,
    chunker: &'a dyn Chunker,
}

impl<'a> CorpusLoader<'a> {
    pub fn new(config: &'a CorpusConfig, chunker: &'a dyn Chunker) -> Self {
        Self { config, chunker }
    }

    /// 데이터 디렉토리에서 종류별 파일 찾기 (하위 폴더 제외, 이름순)
    pub fn find_files(&self, kind: SourceKind) -> Result<Vec<PathBuf>> {
        let dir = &self.config.data_dir;
        if !dir.is_dir() {
            tracing::warn!("Data directory not found: {}", dir.display());
            return Ok(vec![]);
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry
                .with_context(|| format!("Failed to read data directory: {}", dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if kind.matches(&entry.file_name().to_string_lossy()) {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    /// 활성화된 모든 종류를 읽어 청크 생성
    pub fn load(&self) -> Result<(Vec<Chunk>, LoadStats)> {
        let mut chunks = Vec::new();
        let mut stats = LoadStats::default();
        let mut keys = RecordKeys::new();

        for kind in SourceKind::ALL {
            if !kind.enabled(&self.config.include) {
                tracing::debug!("Skipping {} sources (disabled)", kind.label());
                continue;
            }

            let before = chunks.len();
            for path in self.find_files(kind)? {
                stats.files += 1;
                self.load_file(kind, &path, &mut keys, &mut chunks, &mut stats)?;
            }
            tracing::info!("Loaded {} {} chunks", chunks.len() - before, kind.label());
        }

        stats.chunks = chunks.len();
        Ok((chunks, stats))
    }

    fn load_file(
        &self,
        kind: SourceKind,
        path: &Path,
        keys: &mut RecordKeys,
        out: &mut Vec<Chunk>,
        stats: &mut LoadStats,
    ) -> Result<()> {
        let source_file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        match kind {
            SourceKind::Scenes => {
                for row in read_rows::<SceneRow>(path, stats)? {
                    let Some(text) = row.scene_full_text.or(row.text) else {
                        stats.skipped += 1;
                        continue;
                    };
                    let chunk_kind = if row.scene_id.as_deref() == Some(RAW_BLOCK_SCENE_ID) {
                        ChunkKind::SceneRawBlock
                    } else {
                        ChunkKind::Scene
                    };
                    let sub_key = row.scene_id.clone().unwrap_or_else(|| "raw".to_string());

                    let mut meta = ChunkMetadata::new(work_or_unknown(row.work_id), chunk_kind)
                        .with_source_file(&source_file);
                    meta.scene_id = row.scene_id;
                    meta.scene_title = row.scene_title;
                    meta.chapter_id = row.chapter_id;
                    meta.chapter_label = row.chapter_label;
                    meta.spoiler_level = Some(row.spoiler_level.unwrap_or(DEFAULT_SPOILER_LEVEL));

                    self.emit(&text, &sub_key, meta, keys, out, stats);
                }
            }
            SourceKind::Chapters => {
                for row in read_rows::<ChapterRow>(path, stats)? {
                    let Some(text) = row.chapter_full_text.or(row.text) else {
                        stats.skipped += 1;
                        continue;
                    };
                    let sub_key = row.chapter_id.clone().unwrap_or_else(|| "?".to_string());

                    let mut meta = ChunkMetadata::new(work_or_unknown(row.work_id), ChunkKind::Chapter)
                        .with_source_file(&source_file);
                    meta.chapter_id = row.chapter_id;
                    meta.chapter_label = row.chapter_label;
                    meta.spoiler_level = Some(row.spoiler_level.unwrap_or(DEFAULT_SPOILER_LEVEL));

                    self.emit(&text, &sub_key, meta, keys, out, stats);
                }
            }
            SourceKind::Characters => {
                for row in read_rows::<CharacterRow>(path, stats)? {
                    let Some(text) = row.full_bio.or(row.text) else {
                        stats.skipped += 1;
                        continue;
                    };
                    let character = row
                        .character
                        .unwrap_or_else(|| UNKNOWN_CHARACTER.to_string());
                    let chunk_kind = if character == RAW_SECTION_CHARACTER {
                        ChunkKind::CharactersRaw
                    } else {
                        ChunkKind::Persona
                    };

                    let mut meta = ChunkMetadata::new(work_or_unknown(row.work_id), chunk_kind)
                        .with_source_file(&source_file);
                    meta.character = Some(character.clone());

                    self.emit(&text, &character, meta, keys, out, stats);
                }
            }
            SourceKind::Meta => {
                for row in read_rows::<MetaRow>(path, stats)? {
                    let work = work_or_unknown(row.work_id.clone());
                    let mut emitted = false;
                    for (field, chunk_kind) in META_FIELDS {
                        let Some(text) = row.section(field) else {
                            continue;
                        };
                        let meta = ChunkMetadata::new(&work, chunk_kind).with_source_file(&source_file);
                        self.emit(text, field, meta, keys, out, stats);
                        emitted = true;
                    }
                    if !emitted {
                        stats.skipped += 1;
                    }
                }
            }
            SourceKind::FullText => {
                for row in read_rows::<FullTextRow>(path, stats)? {
                    let Some(text) = row.full_text.or(row.text) else {
                        stats.skipped += 1;
                        continue;
                    };
                    let meta = ChunkMetadata::new(work_or_unknown(row.work_id), ChunkKind::FullText)
                        .with_source_file(&source_file);

                    self.emit(&text, "all", meta, keys, out, stats);
                }
            }
        }

        Ok(())
    }

    /// 한 레코드 텍스트를 청킹해 청크로 내보내기
    fn emit(
        &self,
        text: &str,
        sub_key: &str,
        metadata: ChunkMetadata,
        keys: &mut RecordKeys,
        out: &mut Vec<Chunk>,
        stats: &mut LoadStats,
    ) {
        let pieces = self.chunker.chunk(text);
        if pieces.is_empty() {
            stats.skipped += 1;
            return;
        }

        let sub_key = keys.claim(&metadata.work_id, metadata.kind, sub_key);

        for (index, piece) in pieces.into_iter().enumerate() {
            let id = ChunkId::new(&metadata.work_id, metadata.kind, sub_key.as_str(), index);
            match Chunk::new(&id, piece, metadata.clone()) {
                Ok(chunk) => out.push(chunk),
                Err(e) => {
                    tracing::warn!("Skipping chunk {}: {}", id, e);
                    stats.skipped += 1;
                }
            }
        }
    }
}

/// JSONL 레코드 읽기 (파싱 실패 줄은 경고 후 건너뜀)
fn read_rows<T: DeserializeOwned>(path: &Path, stats: &mut LoadStats) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let mut rows = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        stats.records += 1;
        match serde_json::from_str(line) {
            Ok(row) => rows.push(row),
            Err(e) => {
                tracing::warn!("Skipping {}:{}: {}", path.display(), line_no + 1, e);
                stats.skipped += 1;
            }
        }
    }
    Ok(rows)
}

/// 설정된 데이터 디렉토리 전체를 청크로 로드
pub fn load_all_chunks(config: &CorpusConfig, chunker: &dyn Chunker) -> Result<Vec<Chunk>> {
    let (chunks, stats) = CorpusLoader::new(config, chunker).load()?;
    tracing::info!(
        "Corpus: {} files, {} records, {} skipped, {} chunks",
        stats.files,
        stats.records,
        stats.skipped,
        stats.chunks
    );
    Ok(chunks)
}

// ============================================================================
// Tests
// ============================================================================
