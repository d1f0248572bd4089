//! Reciprocal Rank Fusion
//!
//! 점수 척도가 다른 순위 목록들을 순위만으로 합칩니다.
//! `score(id) = Σ 1 / (k + rank)` (rank는 1부터)

use std::collections::{HashMap, HashSet};

/// RRF 기본 스무딩 상수
pub const DEFAULT_RRF_K: f64 = 60.0;

/// 여러 순위 목록을 RRF로 융합
///
/// - 한 목록 안의 중복 id는 첫 등장 순위만 사용합니다.
/// - 동점은 처음 등장한 순서(앞 목록 우선)를 유지합니다.
/// - 결과는 점수 내림차순입니다.
pub fn reciprocal_rank_fusion<S: AsRef<str>>(lists: &[&[S]], k: f64) -> Vec<(String, f64)> {
    let mut order: Vec<String> = Vec::new();
    let mut scores: HashMap<String, f64> = HashMap::new();

    for list in lists {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut rank = 0usize;
        for id in list.iter() {
            let id = id.as_ref();
            if !seen.insert(id) {
                continue;
            }
            rank += 1;
            let contribution = 1.0 / (k + rank as f64);
            match scores.get_mut(id) {
                Some(score) => *score += contribution,
                None => {
                    scores.insert(id.to_string(), contribution);
                    order.push(id.to_string());
                }
            }
        }
    }

    let mut fused: Vec<(String, f64)> = order
        .into_iter()
        .map(|id| {
            let score = scores.get(&id).copied().unwrap_or(0.0);
            (id, score)
        })
        .collect();

    // 안정 정렬: 동점은 첫 등장 순서
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

// ============================================================================
// Tests
// ============================================================================
