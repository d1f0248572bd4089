//! CLI 모듈
//!
//! persona-rag CLI 명령어 정의 및 구현

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::RagConfig;
use crate::embedding::{has_api_key, OpenAiEmbedding};
use crate::generation::GenerationChain;
use crate::knowledge::indexer::{self, SAMPLE_QUERY, SAMPLE_TOP_K};
use crate::knowledge::{
    sentence_chunker, CorpusSnapshot, HybridRetriever, LanceVectorStore, LexicalIndex, RetrievedHit,
    VectorStore,
};
use crate::persona::{work_title, ChatSession, PersonaChat, WORK_TITLES};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "persona-rag")]
#[command(version, about = "소설 인물 페르소나 챗봇 (하이브리드 RAG)", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 코퍼스를 청킹/임베딩해 아티팩트 파일로 저장
    Build,

    /// 아티팩트를 벡터 저장소에 적재
    Index {
        /// 적재 후 점검 질의 생략
        #[arg(long)]
        no_check: bool,
    },

    /// 하이브리드 검색
    Query {
        /// 검색 쿼리
        query: String,

        /// 작품 (ID 또는 표시 제목)
        #[arg(short, long)]
        work: Option<String>,

        /// 결과 개수 (기본: TOP_K)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// 인물과 대화
    Chat {
        /// 작품 (ID 또는 표시 제목)
        #[arg(short, long)]
        work: Option<String>,

        /// 말할 인물 이름
        #[arg(long = "as")]
        speak_as: Option<String>,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = RagConfig::from_env()?;

    match cli.command {
        Commands::Build => cmd_build(&config).await,
        Commands::Index { no_check } => cmd_index(&config, !no_check).await,
        Commands::Query { query, work, top_k } => {
            cmd_query(&config, &query, work.as_deref(), top_k).await
        }
        Commands::Chat { work, speak_as } => {
            cmd_chat(&config, work.as_deref(), speak_as.as_deref()).await
        }
        Commands::Status => cmd_status(&config).await,
    }
}

fn open_embedder(config: &RagConfig) -> Result<Arc<OpenAiEmbedding>> {
    let embedder = OpenAiEmbedding::from_env(&config.embedding.model, &config.embedding.base_url)?;
    Ok(Arc::new(embedder))
}

async fn open_store(config: &RagConfig) -> Result<Arc<LanceVectorStore>> {
    let store = LanceVectorStore::open(&config.index.persist_dir, &config.index.collection)
        .await
        .with_context(|| {
            format!(
                "Failed to open vector store at {}",
                config.index.persist_dir.display()
            )
        })?;
    Ok(Arc::new(store))
}

async fn open_retriever(config: &RagConfig) -> Result<HybridRetriever> {
    let store = open_store(config).await?;
    let embedder = open_embedder(config)?;
    HybridRetriever::load(store, embedder, config.retrieval).await
}

// ============================================================================
// Build / Index
// ============================================================================

/// 오프라인 1단계: 코퍼스 → chunks/embeddings JSONL
async fn cmd_build(config: &RagConfig) -> Result<()> {
    let chunker = sentence_chunker(config.chunk);
    let embedder = open_embedder(config)?;

    println!("[*] 데이터 디렉토리: {}", config.corpus.data_dir.display());
    println!(
        "[*] 청킹: {}자 / 겹침 {}자, 임베딩 모델: {}",
        config.chunk.max_chars,
        config.chunk.overlap,
        embedder.model()
    );

    let report = indexer::build_artifacts(
        &config.corpus,
        chunker.as_ref(),
        embedder.as_ref(),
        config.embedding.batch_size,
        &config.index.artifact_dir,
    )
    .await?;

    println!(
        "[OK] {} 청크, 임베딩 차원 {}",
        report.chunks, report.dimension
    );
    println!("     chunks:     {}", report.paths.chunks.display());
    println!("     embeddings: {}", report.paths.embeddings.display());
    Ok(())
}

/// 오프라인 2단계: 아티팩트 → 벡터 저장소
async fn cmd_index(config: &RagConfig, check: bool) -> Result<()> {
    let store = open_store(config).await?;
    println!(
        "[*] 저장소: {} (컬렉션: {})",
        config.index.persist_dir.display(),
        store.collection()
    );
    if !config.index.filter_works.is_empty() {
        println!("    작품 필터: {}", config.index.filter_works.join(", "));
    }
    if !config.index.filter_kinds.is_empty() {
        println!("    종류 필터: {}", config.index.filter_kinds.join(", "));
    }

    let report = indexer::index_artifacts(&config.index, store.as_ref()).await?;

    println!(
        "[OK] {} 레코드 업서트 (읽음 {}, 무효 {}, 필터 제외 {}, 임베딩 없음 {}, 중복 ID 변경 {})",
        report.upserted,
        report.read,
        report.invalid,
        report.filtered_out,
        report.missing_embedding,
        report.renamed
    );

    if !check {
        return Ok(());
    }

    println!();
    println!("[*] 점검 질의: \"{}\"", SAMPLE_QUERY);
    let embedder = open_embedder(config)?;
    let hits = indexer::sample_check(store.as_ref(), embedder.as_ref(), SAMPLE_QUERY, SAMPLE_TOP_K)
        .await?;
    if hits.is_empty() {
        println!("[!] 점검 질의 결과가 없습니다.");
    }
    for (i, hit) in hits.iter().enumerate() {
        println!("  {}. {} (score: {:.4})", i + 1, hit.id, hit.score);
    }
    Ok(())
}

// ============================================================================
// Query / Chat
// ============================================================================

/// 하이브리드 검색 결과 출력
async fn cmd_query(
    config: &RagConfig,
    query: &str,
    work: Option<&str>,
    top_k: Option<usize>,
) -> Result<()> {
    let retriever = open_retriever(config).await?;
    let work_id = work.map(crate::persona::resolve_work_id);
    let top_k = top_k.unwrap_or(config.retrieval.top_k);

    let stats = retriever.stats().await?;
    println!(
        "[*] 코퍼스: 벡터 {} / 스냅샷 {} / BM25 {}",
        stats.vector_count, stats.snapshot_count, stats.lexical_count
    );
    if !stats.lexical_available {
        println!("[!] BM25 인덱스 없음 - 벡터 검색만 사용합니다.");
    }
    println!("[*] 검색 중: \"{}\"", query);

    let hits = retriever.retrieve(query, top_k, work_id.as_deref()).await?;
    if hits.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        print_hit(i + 1, hit);
    }
    Ok(())
}

fn print_hit(rank: usize, hit: &RetrievedHit) {
    println!(
        "{}. [{:?}] {} (rrf: {:.4})",
        rank, hit.method, hit.id, hit.fused_score
    );
    println!(
        "   작품: {} / 종류: {}",
        work_title(&hit.metadata.work_id).unwrap_or(&hit.metadata.work_id),
        hit.metadata.kind
    );
    println!("   내용: {}", truncate_text(&hit.text, 200));
    println!();
}

/// 대화 REPL
///
/// `/reset`은 기록 초기화, `/quit`은 종료. 생성 실패는 출력만 하고 계속합니다.
async fn cmd_chat(config: &RagConfig, work: Option<&str>, speak_as: Option<&str>) -> Result<()> {
    let retriever = open_retriever(config).await?;
    let generator = GenerationChain::openai(&config.generation.model, &config.generation.base_url)?;
    let chat = PersonaChat::new(
        retriever,
        generator,
        config.retrieval.top_k,
        config.prompt,
    );
    let mut session = ChatSession::new(work, speak_as);

    match session.work_id() {
        Some(id) => println!("[*] 작품: {}", work_title(id).unwrap_or(id)),
        None => {
            println!("[*] 작품 미선택 (전체 코퍼스 검색)");
            let titles: Vec<&str> = WORK_TITLES.iter().map(|(title, _)| *title).collect();
            println!("    --work 로 선택: {}", titles.join(", "));
        }
    }
    if let Some(name) = session.speak_as() {
        println!("[*] 인물: {}", name);
    }
    println!("    /reset 기록 초기화, /quit 종료");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::Write::flush(&mut std::io::stdout())?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                session.reset();
                println!("[OK] 대화 기록을 지웠습니다.");
                continue;
            }
            _ => {}
        }

        match chat.reply(&mut session, line).await {
            Ok(reply) => {
                if session.speak_as().is_some() && !reply.persona_found {
                    tracing::debug!("Persona passage not found for current speaker");
                }
                println!("{}", reply.answer);
                println!();
            }
            Err(e) => println!("[!] 응답 생성 실패: {:#}", e),
        }
    }
    Ok(())
}

// ============================================================================
// Status
// ============================================================================

/// 상태 출력
async fn cmd_status(config: &RagConfig) -> Result<()> {
    println!("persona-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.corpus.data_dir.display());
    println!("[*] 아티팩트 디렉토리: {}", config.index.artifact_dir.display());
    println!(
        "[*] 벡터 저장소: {} (컬렉션: {})",
        config.index.persist_dir.display(),
        config.index.collection
    );
    println!(
        "[*] 모델: 임베딩 {}, 생성 {}",
        config.embedding.model, config.generation.model
    );

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export OPENAI_API_KEY=your-key");
    }

    let store = match open_store(config).await {
        Ok(store) => store,
        Err(e) => {
            println!("[!] 벡터 저장소 열기 실패: {:#}", e);
            return Ok(());
        }
    };

    match store.count().await {
        Ok(count) => println!("[OK] 벡터 레코드: {} 건 (컬렉션 '{}')", count, store.collection()),
        Err(e) => println!("[!] 레코드 수 조회 실패: {:#}", e),
    }

    match store.get_all().await {
        Ok(chunks) => {
            let snapshot = CorpusSnapshot::new(chunks);
            let bytes: usize = snapshot.iter().map(|c| c.text.len()).sum();
            println!(
                "[OK] 스냅샷: {} 청크 ({})",
                snapshot.len(),
                format_bytes(bytes)
            );
            match LexicalIndex::build(snapshot.iter().map(|c| (c.id.as_str(), c.text.as_str()))) {
                Some(index) => println!("[OK] BM25 인덱스: {} 문서", index.len()),
                None => println!("[!] BM25 인덱스: 없음 (벡터 검색만 가능)"),
            }
        }
        Err(e) => println!("[!] 스냅샷 로드 실패: {:#}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("동호는", 10), "동호는");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("첫 줄\r\n둘째 줄", 20), "첫 줄 둘째 줄");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["persona-rag", "chat", "--work", "소년이 온다", "--as", "동호"])
            .unwrap();
        match cli.command {
            Commands::Chat { work, speak_as } => {
                assert_eq!(work.as_deref(), Some("소년이 온다"));
                assert_eq!(speak_as.as_deref(), Some("동호"));
            }
            _ => panic!("expected chat"),
        }

        let cli = Cli::try_parse_from(["persona-rag", "query", "도청", "-k", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::Query { top_k: Some(3), .. }));

        let cli = Cli::try_parse_from(["persona-rag", "index", "--no-check"]).unwrap();
        assert!(matches!(cli.command, Commands::Index { no_check: true }));
    }
}
