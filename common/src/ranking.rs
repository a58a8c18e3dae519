//! 候補の絞込み・ランキング
//!
//! 類似度スコアを閾値で絞り込み、降順に並べて上位N件に切り詰める。
//! 同点はカタログの元の順序を保つ（安定ソート）。

use crate::types::{ScoredTrial, SimilarityScores};

/// 類似度スコアから候補を選ぶ
///
/// # Arguments
/// * `catalog_order` - カタログ上の試験ID（元の順序）
/// * `scores` - 試験ID → 類似度
/// * `threshold` - 最小類似度（この値以上を残す）
/// * `max_count` - 最大件数
///
/// # Returns
/// スコア降順の候補。カタログにない試験ID、スコアのない試験、NaNは除外する。
pub fn rank_candidates(
    catalog_order: &[String],
    scores: &SimilarityScores,
    threshold: f64,
    max_count: usize,
) -> Vec<ScoredTrial> {
    let mut ranked: Vec<ScoredTrial> = catalog_order
        .iter()
        .filter_map(|id| {
            scores.get(id).map(|&score| ScoredTrial {
                nct_id: id.clone(),
                score,
            })
        })
        .filter(|t| !t.score.is_nan() && t.score >= threshold)
        .collect();

    // sort_by は安定ソート
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.truncate(max_count);
    ranked
}
