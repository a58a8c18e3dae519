//! 試験・候補の型定義
//!
//! CLIとフロントエンドで共有される型:
//! - Trial: 試験カタログの1件（起動時に読み込み、以後読み取り専用）
//! - ScoredTrial: 絞込み・ランキングの出力
//! - CandidateRow: 結果画面に表示する候補行
//! - ReviewFlag: LLMレビューの三値フラグ

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 試験ID → 類似度スコア
pub type SimilarityScores = HashMap<String, f64>;

/// 臨床試験
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trial {
    /// 登録番号（NCT ID）
    pub nct_id: String,

    #[serde(default)]
    pub short_title: String,

    #[serde(default)]
    pub long_title: String,

    #[serde(default)]
    pub status: String,

    /// 開始日（YYYY-MM-DD、不明なら空文字）
    #[serde(default)]
    pub start_date: String,

    /// LLMレビューに渡す試験サマリ
    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub detailed_description: String,

    #[serde(default)]
    pub study_url: String,
}

/// ランキング結果の1件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredTrial {
    pub nct_id: String,
    pub score: f64,
}

/// レビューフラグ
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewFlag {
    #[default]
    Unknown,
    Accepted,
    Rejected,
}

impl ReviewFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewFlag::Unknown => "unknown",
            ReviewFlag::Accepted => "accepted",
            ReviewFlag::Rejected => "rejected",
        }
    }

    /// 表示用の記号
    pub fn mark(&self) -> &'static str {
        match self {
            ReviewFlag::Unknown => "…",
            ReviewFlag::Accepted => "✔",
            ReviewFlag::Rejected => "✘",
        }
    }

    pub fn is_reviewed(&self) -> bool {
        !matches!(self, ReviewFlag::Unknown)
    }
}

impl From<bool> for ReviewFlag {
    fn from(accepted: bool) -> Self {
        if accepted {
            ReviewFlag::Accepted
        } else {
            ReviewFlag::Rejected
        }
    }
}

impl std::fmt::Display for ReviewFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 結果画面の候補行
///
/// 再計算ごとに作り直す不変の行。レビュー結果は試験ID → ReviewFlag の
/// 別マップで管理する。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRow {
    /// 1始まりの順位
    pub rank: usize,
    pub score: f64,
    pub trial: Trial,
}

impl CandidateRow {
    pub fn nct_id(&self) -> &str {
        &self.trial.nct_id
    }
}
