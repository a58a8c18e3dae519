//! 候補試験のLLMレビュー
//!
//! 候補行を1件ずつ順番に処理する:
//! 1. キャンセル判定（新しい入力で置き換えられていれば中断）
//! 2. キャッシュ参照、無ければLLMに問い合わせて判定を保存
//! 3. 行ごとに進捗 (index, total) を通知
//!
//! 1件のLLM呼び出し失敗でバッチは止めない。その行は Unknown のまま残る。

pub mod cache;
mod llm;

pub use cache::ReviewCache;
pub use llm::{LlmClient, ReviewClassifier};

use std::sync::Arc;
use std::time::Duration;
use trial_match_common::{parse_verdict, CandidateRow, ReviewFlag, VerdictToken};

/// 判定の出どころ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    Cache,
    Llm,
    /// LLM呼び出しが失敗した（フラグは Unknown）
    Failed,
}

/// 1行処理するごとの進捗
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewProgress {
    /// 1始まり
    pub index: usize,
    pub total: usize,
    pub nct_id: String,
    pub flag: ReviewFlag,
    pub source: VerdictSource,
}

/// レビュー結果の集計
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub failed: usize,
    pub cache_hits: usize,
    /// Yes!/No! が見つからず不採用扱いにした件数
    pub unparsed: usize,
    pub cancelled: bool,
}

impl ReviewSummary {
    pub fn reviewed(&self) -> usize {
        self.accepted + self.rejected
    }
}

/// 候補行を順にレビューする
///
/// # Arguments
/// * `rows` - 候補行（順位順）
/// * `patient_summary` - 現在の患者記述
/// * `cache` - レビュー結果キャッシュ
/// * `classifier` - LLM
/// * `delay` - LLM呼び出し後の待機（レート制限対策）
/// * `is_current` - まだ最新の候補集合か。false になったら次の行の前で中断
/// * `on_progress` - 行ごとの通知
pub async fn run_review<C, F, P>(
    rows: &[CandidateRow],
    patient_summary: &str,
    cache: &Arc<ReviewCache>,
    classifier: &C,
    delay: Duration,
    is_current: F,
    mut on_progress: P,
) -> ReviewSummary
where
    C: ReviewClassifier + ?Sized,
    F: Fn() -> bool,
    P: FnMut(ReviewProgress),
{
    let total = rows.len();
    let mut summary = ReviewSummary::default();

    for (i, row) in rows.iter().enumerate() {
        if !is_current() {
            tracing::debug!(done = i, total, "レビューを中断しました（新しい入力）");
            summary.cancelled = true;
            return summary;
        }

        let trial_summary = row.trial.summary.as_str();
        let (flag, source) = match cache.get(patient_summary, trial_summary) {
            Some(verdict) => {
                summary.cache_hits += 1;
                (ReviewFlag::from(verdict), VerdictSource::Cache)
            }
            None => {
                let result = classifier.classify(patient_summary, trial_summary).await;
                let outcome = match result {
                    Ok(answer) => {
                        let token = parse_verdict(&answer);
                        if token == VerdictToken::Missing {
                            summary.unparsed += 1;
                            tracing::warn!(nct_id = %row.nct_id(), "回答に Yes!/No! がありません（不採用扱い）");
                        }
                        let verdict = token.accepted();
                        if let Err(e) = cache.record(patient_summary, trial_summary, verdict).await {
                            tracing::warn!(error = %e, "レビューキャッシュを保存できません");
                        }
                        (ReviewFlag::from(verdict), VerdictSource::Llm)
                    }
                    Err(e) => {
                        tracing::warn!(nct_id = %row.nct_id(), error = %e, remote = e.is_remote(), "LLMレビューに失敗しました（スキップ）");
                        (ReviewFlag::Unknown, VerdictSource::Failed)
                    }
                };
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                outcome
            }
        };

        match flag {
            ReviewFlag::Accepted => summary.accepted += 1,
            ReviewFlag::Rejected => summary.rejected += 1,
            ReviewFlag::Unknown => summary.failed += 1,
        }

        on_progress(ReviewProgress {
            index: i + 1,
            total,
            nct_id: row.nct_id().to_string(),
            flag,
            source,
        });
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, TrialMatchError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use trial_match_common::Trial;

    /// 呼び出し順に用意した回答を返す
    struct ScriptedClassifier {
        answers: Mutex<Vec<Result<String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedClassifier {
        fn new(answers: Vec<Result<String>>) -> Self {
            Self {
                answers: Mutex::new(answers.into_iter().rev().collect()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ReviewClassifier for ScriptedClassifier {
        async fn classify(&self, _patient: &str, _trial: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answers
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok("No!".to_string()))
        }
    }

    fn row(rank: usize, id: &str, summary: &str) -> CandidateRow {
        CandidateRow {
            rank,
            score: 1.0 - rank as f64 / 10.0,
            trial: Trial {
                nct_id: id.to_string(),
                summary: summary.to_string(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_batch() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ReviewCache::load(&dir.path().join("cache.json")));
        let classifier = ScriptedClassifier::new(vec![
            Ok("Reasoning... Yes!".into()),
            Err(TrialMatchError::RemoteService {
                service: "LLM",
                status: 503,
                body: "unavailable".into(),
            }),
            Ok("Reasoning... No!".into()),
        ]);
        let rows = vec![row(1, "A", "sa"), row(2, "B", "sb"), row(3, "C", "sc")];

        let mut events = Vec::new();
        let summary = run_review(&rows, "patient", &cache, &classifier, Duration::ZERO, || true, |p| {
            events.push(p)
        })
        .await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].flag, ReviewFlag::Accepted);
        assert_eq!(events[1].flag, ReviewFlag::Unknown);
        assert_eq!(events[1].source, VerdictSource::Failed);
        assert_eq!(events[2].flag, ReviewFlag::Rejected);
        assert_eq!((events[2].index, events[2].total), (3, 3));
        assert_eq!(summary.failed, 1);
        assert!(!summary.cancelled);
        // 失敗した行はキャッシュしない
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_classifier() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ReviewCache::load(&dir.path().join("cache.json")));
        cache.put("patient", "sa", true).unwrap();

        let classifier = ScriptedClassifier::new(vec![Ok("No!".into())]);
        let rows = vec![row(1, "A", "sa"), row(2, "B", "sb")];

        let summary = run_review(&rows, "patient", &cache, &classifier, Duration::ZERO, || true, |_| {}).await;

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(summary.cache_hits, 1);
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.rejected, 1);
    }

    #[tokio::test]
    async fn test_missing_token_counts_as_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ReviewCache::load(&dir.path().join("cache.json")));
        let classifier = ScriptedClassifier::new(vec![Ok("I am not sure.".into())]);
        let rows = vec![row(1, "A", "sa")];

        let summary = run_review(&rows, "patient", &cache, &classifier, Duration::ZERO, || true, |_| {}).await;

        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.unparsed, 1);
        assert_eq!(cache.get("patient", "sa"), Some(false));
    }

    #[tokio::test]
    async fn test_cancel_before_next_call() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ReviewCache::load(&dir.path().join("cache.json")));
        let classifier = ScriptedClassifier::new(vec![Ok("Yes!".into()), Ok("Yes!".into())]);
        let rows = vec![row(1, "A", "sa"), row(2, "B", "sb"), row(3, "C", "sc")];

        let processed = AtomicUsize::new(0);
        let summary = run_review(
            &rows,
            "patient",
            &cache,
            &classifier,
            Duration::ZERO,
            || processed.load(Ordering::SeqCst) < 1,
            |_| {
                processed.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert!(summary.cancelled);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(summary.accepted, 1);
    }

    #[tokio::test]
    async fn test_empty_rows() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ReviewCache::load(&dir.path().join("cache.json")));
        let classifier = ScriptedClassifier::new(vec![]);
        let summary = run_review(&[], "patient", &cache, &classifier, Duration::ZERO, || true, |_| {}).await;
        assert_eq!(summary, ReviewSummary::default());
    }
}
