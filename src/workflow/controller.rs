//! 状態遷移の副作用（類似度取得・レビュー）を実行するコントローラ

use super::state::{Candidates, Effect, Screen, WorkflowEvent, WorkflowFlags, WorkflowState};
use crate::catalog::TrialCatalog;
use crate::error::{Result, TrialMatchError};
use crate::reviewer::{run_review, ReviewCache, ReviewClassifier, ReviewProgress, ReviewSummary};
use crate::similarity::SimilaritySource;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use trial_match_common::{CandidateRow, ReviewFlag};

const NOTICE_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub threshold: f64,
    pub max_candidates: usize,
    pub review_delay: Duration,
}

/// 画面更新用の通知
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowNotice {
    ScoresRequested,
    CandidatesReady { count: usize },
    LookupFailed(String),
    Progress(ReviewProgress),
    ReviewFinished(ReviewSummary),
}

/// submit / set_threshold の結果
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// 候補を作りレビューまで終えた（レビュー不要の場合は None）
    Completed(Option<ReviewSummary>),
    /// 類似度取得に失敗した
    LookupFailed(String),
    /// 新しい入力で置き換えられた
    Superseded,
}

/// ある時点の状態のコピー
#[derive(Debug, Clone)]
pub struct WorkflowSnapshot {
    pub screen: Screen,
    pub flags: WorkflowFlags,
    pub description: String,
    pub threshold: f64,
    pub candidates: Candidates,
    pub verdicts: HashMap<String, ReviewFlag>,
}

impl WorkflowSnapshot {
    pub fn rows(&self) -> &[CandidateRow] {
        self.candidates.rows()
    }

    pub fn flag(&self, nct_id: &str) -> ReviewFlag {
        self.verdicts.get(nct_id).copied().unwrap_or_default()
    }

    /// 候補行と判定の組（順位順）
    pub fn rows_with_flags(&self) -> Vec<(CandidateRow, ReviewFlag)> {
        self.rows()
            .iter()
            .map(|row| (row.clone(), self.flag(row.nct_id())))
            .collect()
    }
}

struct Inner {
    state: Mutex<WorkflowState>,
    similarity: Arc<dyn SimilaritySource>,
    /// None なら候補の表示のみでLLMレビューを行わない
    classifier: Option<Arc<dyn ReviewClassifier>>,
    cache: Arc<ReviewCache>,
    review_delay: Duration,
    generation: watch::Sender<u64>,
    notices: broadcast::Sender<WorkflowNotice>,
}

#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl Controller {
    pub fn new(
        catalog: Arc<TrialCatalog>,
        similarity: Arc<dyn SimilaritySource>,
        classifier: Option<Arc<dyn ReviewClassifier>>,
        cache: Arc<ReviewCache>,
        settings: WorkflowSettings,
    ) -> Self {
        let state = WorkflowState::new(catalog, settings.threshold, settings.max_candidates);
        let (generation, _) = watch::channel(state.generation());
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                similarity,
                classifier,
                cache,
                review_delay: settings.review_delay,
                generation,
                notices,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowNotice> {
        self.inner.notices.subscribe()
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        let state = self.lock();
        WorkflowSnapshot {
            screen: state.screen(),
            flags: state.flags(),
            description: state.description.clone(),
            threshold: state.threshold,
            candidates: state.candidates().clone(),
            verdicts: state.verdicts.clone(),
        }
    }

    /// 患者記述を確定して類似度取得からレビューまで実行する
    pub async fn submit(&self, description: impl Into<String>) -> RunOutcome {
        self.drive(WorkflowEvent::Submit {
            description: description.into(),
        })
        .await
    }

    /// 閾値を変更する。結果画面なら再ランキングしてレビューし直す（類似度は再取得しない）
    pub async fn set_threshold(&self, threshold: f64) -> Result<RunOutcome> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(TrialMatchError::Config(format!(
                "閾値は0.0〜1.0で指定してください: {}",
                threshold
            )));
        }
        Ok(self.drive(WorkflowEvent::ThresholdChanged { threshold }).await)
    }

    /// 入力画面に戻る。処理中の取得・レビューは無効になる
    pub fn back_to_input(&self) {
        self.apply(WorkflowEvent::BackToInput);
    }

    fn lock(&self) -> MutexGuard<'_, WorkflowState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn apply(&self, event: WorkflowEvent) -> Vec<Effect> {
        let mut state = self.lock();
        let effects = state.apply(event);
        self.inner.generation.send_if_modified(|current| {
            let changed = *current != state.generation();
            *current = state.generation();
            changed
        });
        effects
    }

    fn notify(&self, notice: WorkflowNotice) {
        // 受信者がいなければ捨てる
        let _ = self.inner.notices.send(notice);
    }

    /// イベントを適用し、出てきた副作用を順に実行する
    async fn drive(&self, first: WorkflowEvent) -> RunOutcome {
        let mut queue = VecDeque::from([first]);
        let mut outcome = RunOutcome::Completed(None);

        while let Some(event) = queue.pop_front() {
            let arrived = matches!(event, WorkflowEvent::ScoresArrived { .. });
            let failure = match &event {
                WorkflowEvent::ScoresFailed { generation, message } => Some((*generation, message.clone())),
                _ => None,
            };

            let effects = self.apply(event);
            if arrived && effects.is_empty() {
                return RunOutcome::Superseded;
            }
            if let Some((generation, message)) = failure {
                if self.lock().generation() != generation {
                    return RunOutcome::Superseded;
                }
                outcome = RunOutcome::LookupFailed(message);
            }

            for effect in effects {
                match effect {
                    Effect::FetchScores {
                        generation,
                        description,
                    } => match self.fetch_scores(generation, &description).await {
                        Some(next) => queue.push_back(next),
                        None => return RunOutcome::Superseded,
                    },
                    Effect::StartReview {
                        candidate_generation,
                        rows,
                        description,
                    } => {
                        self.notify(WorkflowNotice::CandidatesReady { count: rows.len() });
                        let summary = self.review(candidate_generation, &rows, &description).await;
                        queue.push_back(WorkflowEvent::ReviewFinished { candidate_generation });
                        outcome = match summary {
                            Some(s) if s.cancelled => RunOutcome::Superseded,
                            other => RunOutcome::Completed(other),
                        };
                    }
                }
            }
        }

        outcome
    }

    /// 類似度を取得する。新しい入力が来たら待たずに None を返す
    async fn fetch_scores(&self, generation: u64, description: &str) -> Option<WorkflowEvent> {
        self.notify(WorkflowNotice::ScoresRequested);
        let mut current = self.inner.generation.subscribe();

        let result = tokio::select! {
            result = self.inner.similarity.scores_for(description) => result,
            _ = superseded(&mut current, generation) => {
                tracing::debug!(generation, "類似度取得を中断しました（新しい入力）");
                return None;
            }
        };

        Some(match result {
            Ok(scores) => WorkflowEvent::ScoresArrived { generation, scores },
            Err(e) => {
                tracing::warn!(error = %e, remote = e.is_remote(), "類似度の取得に失敗しました");
                let message = e.to_string();
                self.notify(WorkflowNotice::LookupFailed(message.clone()));
                WorkflowEvent::ScoresFailed { generation, message }
            }
        })
    }

    async fn review(
        &self,
        candidate_generation: u64,
        rows: &[CandidateRow],
        description: &str,
    ) -> Option<ReviewSummary> {
        let classifier = self.inner.classifier.as_deref()?;

        let summary = run_review(
            rows,
            description,
            &self.inner.cache,
            classifier,
            self.inner.review_delay,
            || self.lock().candidate_generation() == candidate_generation,
            |progress| {
                self.apply(WorkflowEvent::RowReviewed {
                    candidate_generation,
                    nct_id: progress.nct_id.clone(),
                    flag: progress.flag,
                });
                self.notify(WorkflowNotice::Progress(progress));
            },
        )
        .await;

        tracing::info!(
            reviewed = summary.reviewed(),
            accepted = summary.accepted,
            rejected = summary.rejected,
            failed = summary.failed,
            cache_hits = summary.cache_hits,
            cancelled = summary.cancelled,
            "レビュー完了"
        );
        self.notify(WorkflowNotice::ReviewFinished(summary.clone()));
        Some(summary)
    }
}

/// 記述の世代が進むまで待つ
async fn superseded(rx: &mut watch::Receiver<u64>, generation: u64) {
    let _ = rx.wait_for(|&current| current != generation).await;
}
