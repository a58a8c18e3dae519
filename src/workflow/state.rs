//! ワークフロー状態と遷移表
//!
//! | イベント | 前提 | 結果 | 副作用 |
//! |---|---|---|---|
//! | Submit | なし | showing_results, recompute_pending を立てる。世代を進め候補・判定を破棄 | FetchScores |
//! | ScoresArrived | 世代一致かつ recompute_pending | スコア保存、再ランキング、recompute_pending を下げ reviewing を立てる | StartReview |
//! | ScoresFailed | 世代一致かつ recompute_pending | 候補を Failed にし recompute_pending を下げる | なし |
//! | ThresholdChanged | なし | 閾値更新。結果画面でスコアがあれば再ランキングし reviewing を立てる | StartReview |
//! | RowReviewed | 候補世代一致 | 判定マップを更新 | なし |
//! | ReviewFinished | 候補世代一致 | reviewing を下げる | なし |
//! | BackToInput | なし | 入力画面へ。世代を進め処理中の結果を無効化 | なし |
//!
//! 世代が一致しないイベントは古い入力に対する結果なので捨てる。

use crate::catalog::TrialCatalog;
use std::collections::HashMap;
use std::sync::Arc;
use trial_match_common::{rank_candidates, CandidateRow, ReviewFlag, SimilarityScores};

/// 表示中の画面
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Input,
    Results,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkflowFlags {
    pub showing_results: bool,
    pub recompute_pending: bool,
    pub reviewing: bool,
}

/// 候補集合の状態（空の結果と未計算を区別する）
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Candidates {
    #[default]
    NotComputed,
    Ready(Arc<Vec<CandidateRow>>),
    /// 類似度取得の失敗（画面に表示するメッセージ）
    Failed(String),
}

impl Candidates {
    pub fn rows(&self) -> &[CandidateRow] {
        match self {
            Candidates::Ready(rows) => rows,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    Submit { description: String },
    ScoresArrived { generation: u64, scores: SimilarityScores },
    ScoresFailed { generation: u64, message: String },
    ThresholdChanged { threshold: f64 },
    RowReviewed { candidate_generation: u64, nct_id: String, flag: ReviewFlag },
    ReviewFinished { candidate_generation: u64 },
    BackToInput,
}

/// 遷移の結果、コントローラが実行する処理
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    FetchScores {
        generation: u64,
        description: String,
    },
    StartReview {
        candidate_generation: u64,
        rows: Arc<Vec<CandidateRow>>,
        description: String,
    },
}

#[derive(Debug, Clone)]
pub struct WorkflowState {
    catalog: Arc<TrialCatalog>,
    max_candidates: usize,
    pub(crate) flags: WorkflowFlags,
    pub(crate) description: String,
    pub(crate) threshold: f64,
    scores: Option<SimilarityScores>,
    pub(crate) candidates: Candidates,
    /// 試験ID → 判定（候補行とは別に持つ）
    pub(crate) verdicts: HashMap<String, ReviewFlag>,
    /// 患者記述の世代（Submit / BackToInput で進む）
    pub(crate) generation: u64,
    /// 候補集合の世代（再ランキングのたびに進む）
    pub(crate) candidate_generation: u64,
}

impl WorkflowState {
    pub fn new(catalog: Arc<TrialCatalog>, threshold: f64, max_candidates: usize) -> Self {
        Self {
            catalog,
            max_candidates,
            flags: WorkflowFlags::default(),
            description: String::new(),
            threshold,
            scores: None,
            candidates: Candidates::NotComputed,
            verdicts: HashMap::new(),
            generation: 0,
            candidate_generation: 0,
        }
    }

    pub fn screen(&self) -> Screen {
        if self.flags.showing_results {
            Screen::Results
        } else {
            Screen::Input
        }
    }

    pub fn flags(&self) -> WorkflowFlags {
        self.flags
    }

    pub fn candidates(&self) -> &Candidates {
        &self.candidates
    }

    pub fn verdict(&self, nct_id: &str) -> ReviewFlag {
        self.verdicts.get(nct_id).copied().unwrap_or_default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn candidate_generation(&self) -> u64 {
        self.candidate_generation
    }

    /// イベントを適用し、実行すべき副作用を返す
    pub fn apply(&mut self, event: WorkflowEvent) -> Vec<Effect> {
        match event {
            WorkflowEvent::Submit { description } => {
                self.generation += 1;
                self.candidate_generation += 1;
                self.description = description.clone();
                self.flags = WorkflowFlags {
                    showing_results: true,
                    recompute_pending: true,
                    reviewing: false,
                };
                self.scores = None;
                self.candidates = Candidates::NotComputed;
                self.verdicts.clear();
                vec![Effect::FetchScores {
                    generation: self.generation,
                    description,
                }]
            }

            WorkflowEvent::ScoresArrived { generation, scores } => {
                if generation != self.generation || !self.flags.recompute_pending {
                    tracing::debug!(generation, current = self.generation, "古い類似度結果を破棄します");
                    return Vec::new();
                }
                self.flags.recompute_pending = false;
                self.scores = Some(scores);
                self.rerank().into_iter().collect()
            }

            WorkflowEvent::ScoresFailed { generation, message } => {
                if generation != self.generation || !self.flags.recompute_pending {
                    return Vec::new();
                }
                self.flags.recompute_pending = false;
                self.flags.reviewing = false;
                self.candidates = Candidates::Failed(message);
                Vec::new()
            }

            WorkflowEvent::ThresholdChanged { threshold } => {
                self.threshold = threshold;
                if self.flags.showing_results && !self.flags.recompute_pending && self.scores.is_some() {
                    self.rerank().into_iter().collect()
                } else {
                    Vec::new()
                }
            }

            WorkflowEvent::RowReviewed {
                candidate_generation,
                nct_id,
                flag,
            } => {
                if candidate_generation == self.candidate_generation {
                    self.verdicts.insert(nct_id, flag);
                }
                Vec::new()
            }

            WorkflowEvent::ReviewFinished { candidate_generation } => {
                if candidate_generation == self.candidate_generation {
                    self.flags.reviewing = false;
                }
                Vec::new()
            }

            WorkflowEvent::BackToInput => {
                self.generation += 1;
                self.candidate_generation += 1;
                self.flags = WorkflowFlags::default();
                Vec::new()
            }
        }
    }

    /// 現在のスコアと閾値で候補を作り直し、レビューを開始する
    ///
    /// 同じ患者記述の判定は試験IDで引けるので残す。
    fn rerank(&mut self) -> Option<Effect> {
        let scores = self.scores.as_ref()?;
        let ranked = rank_candidates(&self.catalog.ids(), scores, self.threshold, self.max_candidates);

        let rows: Vec<CandidateRow> = ranked
            .into_iter()
            .enumerate()
            .filter_map(|(i, scored)| {
                self.catalog.get(&scored.nct_id).ok().map(|trial| CandidateRow {
                    rank: i + 1,
                    score: scored.score,
                    trial: trial.clone(),
                })
            })
            .collect();
        let rows = Arc::new(rows);

        self.candidate_generation += 1;
        self.candidates = Candidates::Ready(Arc::clone(&rows));
        self.flags.reviewing = true;

        Some(Effect::StartReview {
            candidate_generation: self.candidate_generation,
            rows,
            description: self.description.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Arc<TrialCatalog> {
        let csv = "\
nct_id,identificationModule.briefTitle,statusModule.overallStatus,statusModule.startDateStruct.date,identificationModule.officialTitle,descriptionModule.detailedDescription,trial_summary
A,Trial A,RECRUITING,,,,summary A
B,Trial B,RECRUITING,,,,summary B
C,Trial C,RECRUITING,,,,summary C
";
        Arc::new(TrialCatalog::from_csv_str(csv).unwrap())
    }

    fn scores() -> SimilarityScores {
        [("A", 0.9), ("B", 0.3), ("C", 0.5)]
            .into_iter()
            .map(|(id, s)| (id.to_string(), s))
            .collect()
    }

    fn submitted() -> WorkflowState {
        let mut state = WorkflowState::new(catalog(), 0.4, 10);
        state.apply(WorkflowEvent::Submit { description: "patient".into() });
        state
    }

    #[test]
    fn test_initial_state() {
        let state = WorkflowState::new(catalog(), 0.4, 10);
        assert_eq!(state.screen(), Screen::Input);
        assert_eq!(state.flags(), WorkflowFlags::default());
        assert_eq!(state.candidates(), &Candidates::NotComputed);
    }

    #[test]
    fn test_submit_sets_flags_and_fetches() {
        let mut state = WorkflowState::new(catalog(), 0.4, 10);
        let effects = state.apply(WorkflowEvent::Submit { description: "patient".into() });

        assert_eq!(state.screen(), Screen::Results);
        assert!(state.flags().recompute_pending);
        assert!(!state.flags().reviewing);
        assert_eq!(
            effects,
            vec![Effect::FetchScores { generation: 1, description: "patient".into() }]
        );
    }

    #[test]
    fn test_scores_arrived_ranks_and_starts_review() {
        let mut state = submitted();
        let effects = state.apply(WorkflowEvent::ScoresArrived { generation: 1, scores: scores() });

        assert!(!state.flags().recompute_pending);
        assert!(state.flags().reviewing);
        let ids: Vec<&str> = state.candidates().rows().iter().map(|r| r.nct_id()).collect();
        assert_eq!(ids, vec!["A", "C"]);
        assert_eq!(state.candidates().rows()[1].rank, 2);
        assert!(matches!(effects.as_slice(), [Effect::StartReview { .. }]));
    }

    #[test]
    fn test_stale_scores_ignored() {
        let mut state = submitted();
        state.apply(WorkflowEvent::Submit { description: "newer".into() });

        let effects = state.apply(WorkflowEvent::ScoresArrived { generation: 1, scores: scores() });
        assert!(effects.is_empty());
        assert_eq!(state.candidates(), &Candidates::NotComputed);
        assert!(state.flags().recompute_pending);
    }

    #[test]
    fn test_scores_failed() {
        let mut state = submitted();
        state.apply(WorkflowEvent::ScoresFailed { generation: 1, message: "status 500".into() });

        assert_eq!(state.screen(), Screen::Results);
        assert!(!state.flags().recompute_pending);
        assert!(!state.flags().reviewing);
        assert_eq!(state.candidates(), &Candidates::Failed("status 500".into()));
        assert!(state.candidates().rows().is_empty());
    }

    #[test]
    fn test_empty_result_is_ready_not_uncomputed() {
        let mut state = submitted();
        state.apply(WorkflowEvent::ThresholdChanged { threshold: 0.95 });
        state.apply(WorkflowEvent::ScoresArrived { generation: 1, scores: scores() });

        assert!(matches!(state.candidates(), Candidates::Ready(rows) if rows.is_empty()));
    }

    #[test]
    fn test_threshold_change_reranks_without_lookup() {
        let mut state = submitted();
        state.apply(WorkflowEvent::ScoresArrived { generation: 1, scores: scores() });
        let before = state.candidate_generation();

        let effects = state.apply(WorkflowEvent::ThresholdChanged { threshold: 0.2 });

        assert_eq!(state.candidates().rows().len(), 3);
        assert!(state.candidate_generation() > before);
        assert!(matches!(effects.as_slice(), [Effect::StartReview { .. }]));
        assert!(!effects.iter().any(|e| matches!(e, Effect::FetchScores { .. })));
    }

    #[test]
    fn test_threshold_change_on_input_screen_only_stores() {
        let mut state = WorkflowState::new(catalog(), 0.4, 10);
        let effects = state.apply(WorkflowEvent::ThresholdChanged { threshold: 0.7 });
        assert!(effects.is_empty());
        assert_eq!(state.threshold, 0.7);
    }

    #[test]
    fn test_row_reviewed_and_finish() {
        let mut state = submitted();
        state.apply(WorkflowEvent::ScoresArrived { generation: 1, scores: scores() });
        let cg = state.candidate_generation();

        state.apply(WorkflowEvent::RowReviewed {
            candidate_generation: cg,
            nct_id: "A".into(),
            flag: ReviewFlag::Accepted,
        });
        state.apply(WorkflowEvent::ReviewFinished { candidate_generation: cg });

        assert_eq!(state.verdict("A"), ReviewFlag::Accepted);
        assert_eq!(state.verdict("C"), ReviewFlag::Unknown);
        assert!(!state.flags().reviewing);
    }

    #[test]
    fn test_stale_review_events_ignored() {
        let mut state = submitted();
        state.apply(WorkflowEvent::ScoresArrived { generation: 1, scores: scores() });
        let old_cg = state.candidate_generation();
        state.apply(WorkflowEvent::ThresholdChanged { threshold: 0.1 });

        state.apply(WorkflowEvent::RowReviewed {
            candidate_generation: old_cg,
            nct_id: "A".into(),
            flag: ReviewFlag::Rejected,
        });
        state.apply(WorkflowEvent::ReviewFinished { candidate_generation: old_cg });

        assert_eq!(state.verdict("A"), ReviewFlag::Unknown);
        assert!(state.flags().reviewing);
    }

    #[test]
    fn test_new_submit_clears_verdicts() {
        let mut state = submitted();
        state.apply(WorkflowEvent::ScoresArrived { generation: 1, scores: scores() });
        let cg = state.candidate_generation();
        state.apply(WorkflowEvent::RowReviewed {
            candidate_generation: cg,
            nct_id: "A".into(),
            flag: ReviewFlag::Accepted,
        });

        state.apply(WorkflowEvent::Submit { description: "another patient".into() });
        assert_eq!(state.verdict("A"), ReviewFlag::Unknown);
        assert_eq!(state.candidates(), &Candidates::NotComputed);
    }

    #[test]
    fn test_back_to_input() {
        let mut state = submitted();
        state.apply(WorkflowEvent::BackToInput);
        assert_eq!(state.screen(), Screen::Input);

        // 戻った後に届いた結果は捨てる
        let effects = state.apply(WorkflowEvent::ScoresArrived { generation: 1, scores: scores() });
        assert!(effects.is_empty());
    }
}
