//! レビュー済み候補のファイル出力（JSON / Excel）

pub mod excel;

use crate::error::{Result, TrialMatchError};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use trial_match_common::{CandidateRow, ReviewFlag};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Json,
    Excel,
    Both,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "excel" | "xlsx" => Ok(ExportFormat::Excel),
            "both" => Ok(ExportFormat::Both),
            _ => Err(format!("Unknown format: {}. Use json, excel, or both", s)),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportFormat::Json => write!(f, "json"),
            ExportFormat::Excel => write!(f, "excel"),
            ExportFormat::Both => write!(f, "both"),
        }
    }
}

/// 出力1行分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRecord {
    pub rank: usize,
    pub nct_id: String,
    pub title: String,
    pub status: String,
    pub start_date: String,
    pub score: f64,
    pub review: ReviewFlag,
    pub url: String,
}

impl ExportRecord {
    pub fn new(row: &CandidateRow, flag: ReviewFlag) -> Self {
        Self {
            rank: row.rank,
            nct_id: row.trial.nct_id.clone(),
            title: row.trial.short_title.clone(),
            status: row.trial.status.clone(),
            start_date: row.trial.start_date.clone(),
            score: row.score,
            review: flag,
            url: row.trial.study_url.clone(),
        }
    }
}

/// JSON出力の全体
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub patient_summary: String,
    pub minimum_similarity: f64,
    pub exported_at: DateTime<Local>,
    pub candidates: Vec<ExportRecord>,
}

impl ExportDocument {
    pub fn new(patient_summary: &str, minimum_similarity: f64, rows: &[(CandidateRow, ReviewFlag)]) -> Self {
        Self {
            patient_summary: patient_summary.to_string(),
            minimum_similarity,
            exported_at: Local::now(),
            candidates: rows.iter().map(|(row, flag)| ExportRecord::new(row, *flag)).collect(),
        }
    }
}

/// 出力先がディレクトリ（または拡張子なし）なら既定のファイル名を付ける
fn output_path_for_format(output: &Path, stem: &str, extension: &str) -> PathBuf {
    if output.is_dir() || output.extension().is_none() {
        output.join(format!("{}.{}", stem, extension))
    } else {
        output.with_extension(extension)
    }
}

pub fn write_json(document: &ExportDocument, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(document)
        .map_err(|e| TrialMatchError::Export(format!("JSON生成エラー: {}", e)))?;
    std::fs::write(path, json)
        .map_err(|e| TrialMatchError::Export(format!("{}: {}", path.display(), e)))?;
    Ok(())
}

/// 候補表を出力し、書き出したファイルのパスを返す
pub fn export_results(
    document: &ExportDocument,
    format: ExportFormat,
    output: &Path,
    stem: &str,
) -> Result<Vec<PathBuf>> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| TrialMatchError::Export(format!("{}: {}", parent.display(), e)))?;
    }

    let mut written = Vec::new();
    if matches!(format, ExportFormat::Json | ExportFormat::Both) {
        let path = output_path_for_format(output, stem, "json");
        write_json(document, &path)?;
        tracing::info!(path = %path.display(), "JSON出力");
        written.push(path);
    }
    if matches!(format, ExportFormat::Excel | ExportFormat::Both) {
        let path = output_path_for_format(output, stem, "xlsx");
        excel::generate_excel(document, &path)?;
        tracing::info!(path = %path.display(), "Excel出力");
        written.push(path);
    }

    Ok(written)
}
