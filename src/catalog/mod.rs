//! 試験カタログ読み込みモジュール
//!
//! 臨床試験CSVから必要な列だけを取り出して Trial に変換し、
//! 試験ごとの公開URLを付与する。読み込みは起動時に1回だけ。

mod patients;

pub use patients::{DemoPatient, DemoPatients};

use crate::error::{Result, TrialMatchError};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::Path;
use trial_match_common::table::{field, parse_records, Header};
use trial_match_common::Trial;

const STUDY_URL_BASE: &str = "https://clinicaltrials.gov/study";

/// 元データの列名 → Trialのフィールド
const COL_ID: &str = "nct_id";
const COL_SHORT_TITLE: &str = "identificationModule.briefTitle";
const COL_STATUS: &str = "statusModule.overallStatus";
const COL_START_DATE: &str = "statusModule.startDateStruct.date";
const COL_LONG_TITLE: &str = "identificationModule.officialTitle";
const COL_DESCRIPTION: &str = "descriptionModule.detailedDescription";
const COL_SUMMARY: &str = "trial_summary";

/// 試験カタログ（カタログ順を保持）
#[derive(Debug, Clone, Default)]
pub struct TrialCatalog {
    trials: Vec<Trial>,
    index: HashMap<String, usize>,
}

impl TrialCatalog {
    /// CSVファイルから読み込み
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TrialMatchError::DataLoad(format!("{}: {}", path.display(), e))
        })?;
        Self::from_csv_str(&content)
            .map_err(|e| TrialMatchError::DataLoad(format!("{}: {}", path.display(), e)))
    }

    /// CSV文字列から読み込み
    pub fn from_csv_str(content: &str) -> Result<Self> {
        let records = parse_records(content).map_err(data_load)?;
        let Some((header_record, rows)) = records.split_first() else {
            return Err(TrialMatchError::DataLoad("試験ファイルが空です".into()));
        };

        let header = Header::from_record(header_record);
        let id_col = header.require(COL_ID).map_err(data_load)?;
        let short_col = header.require(COL_SHORT_TITLE).map_err(data_load)?;
        let status_col = header.require(COL_STATUS).map_err(data_load)?;
        let date_col = header.require(COL_START_DATE).map_err(data_load)?;
        let long_col = header.require(COL_LONG_TITLE).map_err(data_load)?;
        let desc_col = header.require(COL_DESCRIPTION).map_err(data_load)?;
        let summary_col = header.require(COL_SUMMARY).map_err(data_load)?;

        let mut trials = Vec::with_capacity(rows.len());
        let mut index = HashMap::with_capacity(rows.len());

        for row in rows {
            let nct_id = field(row, id_col).trim().to_string();
            if nct_id.is_empty() {
                continue;
            }
            if index.contains_key(&nct_id) {
                tracing::warn!(nct_id = %nct_id, "試験IDが重複しています（先の行を使用）");
                continue;
            }

            let trial = Trial {
                study_url: study_url(&nct_id),
                short_title: field(row, short_col).trim().to_string(),
                status: field(row, status_col).trim().to_string(),
                start_date: normalize_start_date(field(row, date_col)),
                long_title: field(row, long_col).trim().to_string(),
                detailed_description: field(row, desc_col).to_string(),
                summary: field(row, summary_col).to_string(),
                nct_id: nct_id.clone(),
            };

            index.insert(nct_id, trials.len());
            trials.push(trial);
        }

        tracing::debug!(count = trials.len(), "試験カタログを読み込みました");
        Ok(Self { trials, index })
    }

    pub fn get(&self, nct_id: &str) -> Result<&Trial> {
        self.index
            .get(nct_id)
            .map(|&i| &self.trials[i])
            .ok_or_else(|| TrialMatchError::NotFound(format!("試験 {}", nct_id)))
    }

    pub fn contains(&self, nct_id: &str) -> bool {
        self.index.contains_key(nct_id)
    }

    /// カタログ順の試験ID
    pub fn ids(&self) -> Vec<String> {
        self.trials.iter().map(|t| t.nct_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }
}

pub(crate) fn data_load(e: impl std::fmt::Display) -> TrialMatchError {
    TrialMatchError::DataLoad(e.to_string())
}

/// 試験の公開URL
pub fn study_url(nct_id: &str) -> String {
    format!("{}/{}", STUDY_URL_BASE, nct_id)
}

/// 開始日を YYYY-MM-DD に揃える（YYYY-MM は1日扱い、解釈できなければ空）
fn normalize_start_date(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }

    let parsed = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{}-01", raw), "%Y-%m-%d"));

    match parsed {
        Ok(date) => date.format("%Y-%m-%d").to_string(),
        Err(_) => {
            tracing::debug!(value = raw, "開始日を解釈できません");
            String::new()
        }
    }
}
