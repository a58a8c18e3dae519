//! マッチングの流れ全体のテスト
//!
//! 一時ディレクトリのデータファイルから組み立て、LLMは固定回答で差し替える

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use trial_match::app::AppContext;
use trial_match::config::Config;
use trial_match::error::{Result, TrialMatchError};
use trial_match::export::{export_results, ExportDocument, ExportFormat};
use trial_match::reviewer::ReviewClassifier;
use trial_match::workflow::{Candidates, RunOutcome, Screen};
use trial_match_common::ReviewFlag;

const TRIALS_CSV: &str = "\
nct_id,identificationModule.briefTitle,statusModule.overallStatus,statusModule.startDateStruct.date,identificationModule.officialTitle,descriptionModule.detailedDescription,trial_summary
NCT001,HER2+ Breast,RECRUITING,2023-05,Official HER2,\"Multi-line
description\",Adults with HER2-positive breast cancer
NCT002,NSCLC EGFR,RECRUITING,2022-01-15,Official NSCLC,,Adults with EGFR-mutant NSCLC
NCT003,Colorectal,COMPLETED,,Official CRC,,Adults with metastatic colorectal cancer
";

const PATIENTS_CSV: &str = "\
patient_id,patient_summary
P1,58-year-old woman with HER2-positive stage II breast cancer
P2,64-year-old man with EGFR-mutant lung adenocarcinoma
";

const SIMILARITY_CSV: &str = "\
nct_id,P1,P2
NCT001,0.91,0.12
NCT002,0.35,0.88
NCT003,0.52,0.47
NCT999,0.99,0.99
";

/// 試験サマリに "HER2" を含めば採用
struct KeywordClassifier {
    calls: AtomicUsize,
}

#[async_trait]
impl ReviewClassifier for KeywordClassifier {
    async fn classify(&self, _patient: &str, trial: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(if trial.contains("HER2") {
            "The trial targets HER2-positive disease. Yes!".to_string()
        } else {
            "Different indication. No!".to_string()
        })
    }
}

fn setup() -> (TempDir, AppContext) {
    let dir = tempdir().expect("Failed to create temp dir");
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        review_delay_ms: 0,
        ..Config::default()
    };
    std::fs::write(config.trials_path(), TRIALS_CSV).unwrap();
    std::fs::write(config.patients_path(), PATIENTS_CSV).unwrap();
    std::fs::write(config.similarity_path(), SIMILARITY_CSV).unwrap();

    let context = AppContext::from_files(config).expect("データ読み込み失敗");
    (dir, context)
}

fn classifier() -> Arc<KeywordClassifier> {
    Arc::new(KeywordClassifier {
        calls: AtomicUsize::new(0),
    })
}

fn review_with(llm: &Arc<KeywordClassifier>) -> Option<Arc<dyn ReviewClassifier>> {
    Some(llm.clone())
}

#[tokio::test]
async fn test_demo_patient_end_to_end() {
    let (_dir, context) = setup();
    let llm = classifier();
    let controller = context.controller(review_with(&llm));
    let summary = context.patients().get("P1").unwrap().summary.clone();

    let outcome = controller.submit(summary).await;

    assert!(matches!(outcome, RunOutcome::Completed(Some(ref s)) if s.accepted == 1 && s.rejected == 1));
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.screen, Screen::Results);
    let ids: Vec<&str> = snapshot.rows().iter().map(|r| r.nct_id()).collect();
    // 0.4 未満の NCT002 と、カタログにない NCT999 は出ない
    assert_eq!(ids, vec!["NCT001", "NCT003"]);
    assert_eq!(snapshot.flag("NCT001"), ReviewFlag::Accepted);
    assert_eq!(snapshot.flag("NCT003"), ReviewFlag::Rejected);
    assert_eq!(snapshot.rows()[0].trial.start_date, "2023-05-01");
    assert_eq!(snapshot.rows()[0].trial.study_url, "https://clinicaltrials.gov/study/NCT001");
}

#[tokio::test]
async fn test_cached_verdicts_survive_new_session() {
    let (_dir, context) = setup();
    let summary = context.patients().get("P2").unwrap().summary.clone();

    let first = classifier();
    context.controller(review_with(&first)).submit(summary.clone()).await;
    assert_eq!(first.calls.load(Ordering::SeqCst), 2);

    let second = classifier();
    let outcome = context.controller(review_with(&second)).submit(summary).await;
    assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    assert!(matches!(outcome, RunOutcome::Completed(Some(ref s)) if s.cache_hits == 2));
}

#[tokio::test]
async fn test_new_description_without_similarity_api() {
    let (_dir, context) = setup();
    let controller = context.controller(review_with(&classifier()));

    let outcome = controller.submit("45-year-old woman with triple-negative breast cancer").await;

    assert!(matches!(outcome, RunOutcome::LookupFailed(ref m) if m.contains("AI_SIMILAR")));
    assert!(matches!(controller.snapshot().candidates, Candidates::Failed(_)));
}

#[tokio::test]
async fn test_threshold_then_export() {
    let (dir, context) = setup();
    let controller = context.controller(None);
    let summary = context.patients().get("P1").unwrap().summary.clone();
    controller.submit(summary.clone()).await;

    let outcome = controller.set_threshold(0.3).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed(None));

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.rows().len(), 3);
    assert!(snapshot.rows_with_flags().iter().all(|(_, flag)| *flag == ReviewFlag::Unknown));

    let document = ExportDocument::new(&summary, snapshot.threshold, &snapshot.rows_with_flags());
    let out_dir = dir.path().join("out");
    std::fs::create_dir_all(&out_dir).unwrap();
    let written = export_results(&document, ExportFormat::Both, &out_dir, "matches").unwrap();

    assert_eq!(written, vec![out_dir.join("matches.json"), out_dir.join("matches.xlsx")]);
    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&written[0]).unwrap()).unwrap();
    assert_eq!(json["candidates"].as_array().unwrap().len(), 3);
    assert_eq!(json["candidates"][2]["nctId"], "NCT002");
}

#[test]
fn test_unknown_demo_patient() {
    let (_dir, context) = setup();
    assert!(matches!(context.patients().get("P9"), Err(TrialMatchError::NotFound(_))));
}
