//! 類似度スコアの取得
//!
//! - デモ患者: 事前計算済みの類似度行列（試験 × 患者）から引く
//! - 新しい記述: 類似度APIに1回だけ問い合わせる

mod client;

pub use client::SimilarityClient;

use crate::catalog::{DemoPatients, TrialCatalog};
use crate::error::{Result, TrialMatchError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use trial_match_common::table::{field, parse_records, Header};
use trial_match_common::SimilarityScores;

/// 患者記述から類似度スコアを得る境界
#[async_trait]
pub trait SimilaritySource: Send + Sync {
    async fn scores_for(&self, description: &str) -> Result<SimilarityScores>;
}

/// 事前計算済みの類似度行列
///
/// 先頭列 `nct_id`、以降は患者IDごとの列。
#[derive(Debug, Clone, Default)]
pub struct SimilarityTable {
    by_patient: HashMap<String, SimilarityScores>,
}

impl SimilarityTable {
    /// CSVファイルから読み込み（カタログにない試験の行は捨てる）
    pub fn load(path: &Path, catalog: &TrialCatalog) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TrialMatchError::DataLoad(format!("{}: {}", path.display(), e))
        })?;
        Self::from_csv_str(&content, catalog)
    }

    pub fn from_csv_str(content: &str, catalog: &TrialCatalog) -> Result<Self> {
        let records = parse_records(content)
            .map_err(|e| TrialMatchError::DataLoad(e.to_string()))?;
        let Some((header_record, rows)) = records.split_first() else {
            return Err(TrialMatchError::DataLoad("類似度ファイルが空です".into()));
        };

        let header = Header::from_record(header_record);
        let id_col = header
            .require("nct_id")
            .map_err(|e| TrialMatchError::DataLoad(e.to_string()))?;

        let patient_cols: Vec<(usize, String)> = header_record
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != id_col)
            .map(|(i, name)| (i, name.trim().to_string()))
            .filter(|(_, name)| !name.is_empty())
            .collect();

        let mut by_patient: HashMap<String, SimilarityScores> = patient_cols
            .iter()
            .map(|(_, name)| (name.clone(), SimilarityScores::new()))
            .collect();

        let mut skipped = 0usize;
        for row in rows {
            let nct_id = field(row, id_col).trim();
            if !catalog.contains(nct_id) {
                skipped += 1;
                continue;
            }
            for (col, patient_id) in &patient_cols {
                // 空欄・非数値はスコアなし
                if let Ok(score) = field(row, *col).trim().parse::<f64>() {
                    if let Some(scores) = by_patient.get_mut(patient_id) {
                        scores.insert(nct_id.to_string(), score);
                    }
                }
            }
        }

        if skipped > 0 {
            tracing::debug!(skipped, "カタログにない試験の類似度行を除外しました");
        }
        Ok(Self { by_patient })
    }

    /// デモ患者の事前計算スコア
    pub fn scores_for_known_patient(&self, patient_id: &str) -> Result<SimilarityScores> {
        self.by_patient
            .get(patient_id)
            .cloned()
            .ok_or_else(|| TrialMatchError::NotFound(format!("患者 {} の類似度", patient_id)))
    }

    pub fn patient_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.by_patient.keys().map(|s| s.as_str()).collect();
        ids.sort();
        ids
    }
}

/// 類似度の取得窓口
///
/// デモ患者の記述と完全一致すれば行列から、それ以外はAPIから取得する。
pub struct SimilarityLookup {
    patients: DemoPatients,
    table: SimilarityTable,
    client: Option<SimilarityClient>,
}

impl SimilarityLookup {
    pub fn new(patients: DemoPatients, table: SimilarityTable, client: Option<SimilarityClient>) -> Self {
        Self {
            patients,
            table,
            client,
        }
    }

    pub fn patients(&self) -> &DemoPatients {
        &self.patients
    }

    pub fn scores_for_known_patient(&self, patient_id: &str) -> Result<SimilarityScores> {
        self.table.scores_for_known_patient(patient_id)
    }

    pub async fn scores_for_new_description(&self, text: &str) -> Result<SimilarityScores> {
        match &self.client {
            Some(client) => client.scores_for_new_description(text).await,
            None => Err(TrialMatchError::MissingCredential("AI_SIMILAR (類似度APIのURL)")),
        }
    }
}

#[async_trait]
impl SimilaritySource for SimilarityLookup {
    async fn scores_for(&self, description: &str) -> Result<SimilarityScores> {
        if let Some(patient) = self.patients.find_by_summary(description) {
            match self.table.scores_for_known_patient(&patient.patient_id) {
                Ok(scores) => {
                    tracing::debug!(patient_id = %patient.patient_id, "事前計算済みの類似度を使用します");
                    return Ok(scores);
                }
                Err(e) => tracing::debug!(error = %e, "事前計算がないためAPIに問い合わせます"),
            }
        }
        self.scores_for_new_description(description).await
    }
}
