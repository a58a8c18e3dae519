//! デモ患者データ
//!
//! 入力画面の初期値に使う架空の患者記述。類似度行列の列は患者IDで引く。

use super::data_load;
use crate::error::{Result, TrialMatchError};
use rand::seq::SliceRandom;
use std::path::Path;
use trial_match_common::table::{field, parse_records, Header};

#[derive(Debug, Clone, PartialEq)]
pub struct DemoPatient {
    pub patient_id: String,
    pub summary: String,
}

#[derive(Debug, Clone, Default)]
pub struct DemoPatients {
    patients: Vec<DemoPatient>,
}

impl DemoPatients {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TrialMatchError::DataLoad(format!("{}: {}", path.display(), e))
        })?;
        Self::from_csv_str(&content)
    }

    pub fn from_csv_str(content: &str) -> Result<Self> {
        let records = parse_records(content).map_err(data_load)?;
        let Some((header_record, rows)) = records.split_first() else {
            return Err(TrialMatchError::DataLoad("患者ファイルが空です".into()));
        };

        let header = Header::from_record(header_record);
        let id_col = header.require("patient_id").map_err(data_load)?;
        let summary_col = header.require("patient_summary").map_err(data_load)?;

        let patients = rows
            .iter()
            .filter(|row| !field(row, id_col).trim().is_empty())
            .map(|row| DemoPatient {
                patient_id: field(row, id_col).trim().to_string(),
                summary: field(row, summary_col).to_string(),
            })
            .collect();

        Ok(Self { patients })
    }

    pub fn get(&self, patient_id: &str) -> Result<&DemoPatient> {
        self.patients
            .iter()
            .find(|p| p.patient_id == patient_id)
            .ok_or_else(|| TrialMatchError::NotFound(format!("患者 {}", patient_id)))
    }

    /// 記述が完全一致するデモ患者
    pub fn find_by_summary(&self, summary: &str) -> Option<&DemoPatient> {
        self.patients.iter().find(|p| p.summary == summary)
    }

    /// 入力画面の初期値（ランダムに1人）
    pub fn choose_random(&self) -> Option<&DemoPatient> {
        self.patients.choose(&mut rand::thread_rng())
    }

    pub fn len(&self) -> usize {
        self.patients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }
}
