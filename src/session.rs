//! 対話式セッション（入力画面 → 結果画面）
//!
//! 画面の切り替えは `Controller` の状態に従い、ここでは表示と操作だけを行う。

use crate::app::AppContext;
use crate::error::{Result, TrialMatchError};
use crate::export::{self, ExportDocument, ExportFormat};
use crate::workflow::{Candidates, Controller, RunOutcome, WorkflowNotice, WorkflowSnapshot};
use dialoguer::{Confirm, Input, Select};
use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use trial_match_common::{CandidateRow, ReviewFlag, Trial};

const DISCLAIMER: &str = "※ デモ用ツールです。表示される候補は臨床判断に使わないでください。";

/// 表の試験名の最大表示幅（文字数）
const TITLE_WIDTH: usize = 60;

/// 結果画面の操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultsAction {
    Details,
    Threshold,
    Edit,
    Export,
    Quit,
}

impl ResultsAction {
    const ALL: [ResultsAction; 5] = [
        ResultsAction::Details,
        ResultsAction::Threshold,
        ResultsAction::Edit,
        ResultsAction::Export,
        ResultsAction::Quit,
    ];

    fn label(&self) -> &'static str {
        match self {
            ResultsAction::Details => "試験の詳細を見る",
            ResultsAction::Threshold => "類似度の閾値を変更",
            ResultsAction::Edit => "患者記述を編集",
            ResultsAction::Export => "エクスポート",
            ResultsAction::Quit => "終了",
        }
    }
}

fn interaction_err(e: dialoguer::Error) -> TrialMatchError {
    TrialMatchError::Interaction(e.to_string())
}

pub struct Session<'a> {
    context: &'a AppContext,
    controller: Controller,
}

impl<'a> Session<'a> {
    pub fn new(context: &'a AppContext, controller: Controller) -> Self {
        Self { context, controller }
    }

    /// 終了が選ばれるまで入力画面と結果画面を行き来する
    pub async fn run(&self, initial: Option<String>) -> Result<()> {
        let mut draft = initial
            .or_else(|| self.context.patients().choose_random().map(|p| p.summary.clone()))
            .unwrap_or_default();

        loop {
            let Some(description) = self.input_screen(&draft)? else {
                return Ok(());
            };
            draft = description.clone();

            let controller = self.controller.clone();
            let notices = self.controller.subscribe();
            let task = tokio::spawn(async move { controller.submit(description).await });
            match run_with_progress(&self.controller, notices, task).await? {
                Some(outcome) => print_outcome(&outcome),
                None => {
                    println!("中断しました。入力画面に戻ります");
                    continue;
                }
            }

            if !self.results_screen().await? {
                return Ok(());
            }
            self.controller.back_to_input();
        }
    }

    /// 入力画面。None なら終了
    fn input_screen(&self, draft: &str) -> Result<Option<String>> {
        println!();
        println!("🧬 臨床試験マッチング");
        println!("  登録試験数: {}", self.context.catalog.len());
        println!("  {}", DISCLAIMER);
        println!();

        let mut current = draft.to_string();
        loop {
            println!("患者記述:\n  {}\n", current);
            let choice = Select::new()
                .with_prompt("操作を選択")
                .items(&["この患者でマッチング", "記述を編集", "別のデモ患者を選ぶ", "終了"])
                .default(0)
                .interact()
                .map_err(interaction_err)?;

            match choice {
                0 if current.trim().is_empty() => println!("患者記述が空です"),
                0 => return Ok(Some(current.trim().to_string())),
                1 => {
                    current = Input::new()
                        .with_prompt("患者記述")
                        .with_initial_text(current.clone())
                        .allow_empty(true)
                        .interact_text()
                        .map_err(interaction_err)?;
                }
                2 => {
                    if let Some(patient) = self.context.patients().choose_random() {
                        current = patient.summary.clone();
                    }
                }
                _ => return Ok(None),
            }
        }
    }

    /// 結果画面。false なら終了、true なら入力画面へ戻る
    async fn results_screen(&self) -> Result<bool> {
        loop {
            let snapshot = self.controller.snapshot();
            print_results(&snapshot);

            let labels: Vec<&str> = ResultsAction::ALL.iter().map(|a| a.label()).collect();
            let choice = Select::new()
                .with_prompt("操作を選択")
                .items(&labels)
                .default(0)
                .interact()
                .map_err(interaction_err)?;

            match ResultsAction::ALL[choice] {
                ResultsAction::Details => self.show_details(&snapshot)?,
                ResultsAction::Threshold => {
                    let threshold: f64 = Input::new()
                        .with_prompt("類似度の閾値 (0.0-1.0)")
                        .default(snapshot.threshold)
                        .validate_with(|v: &f64| {
                            if (0.0..=1.0).contains(v) {
                                Ok(())
                            } else {
                                Err("0.0〜1.0で入力してください")
                            }
                        })
                        .interact_text()
                        .map_err(interaction_err)?;

                    let controller = self.controller.clone();
                    let notices = self.controller.subscribe();
                    let task = tokio::spawn(async move { controller.set_threshold(threshold).await });
                    match run_with_progress(&self.controller, notices, task).await? {
                        Some(outcome) => print_outcome(&outcome?),
                        None => {
                            println!("中断しました。入力画面に戻ります");
                            return Ok(true);
                        }
                    }
                }
                ResultsAction::Edit => return Ok(true),
                ResultsAction::Export => self.export(&snapshot)?,
                ResultsAction::Quit => return Ok(false),
            }
        }
    }

    fn show_details(&self, snapshot: &WorkflowSnapshot) -> Result<()> {
        let rows = snapshot.rows();
        if rows.is_empty() {
            println!("表示できる試験がありません");
            return Ok(());
        }

        let items: Vec<String> = rows
            .iter()
            .map(|row| format!("{}. {} {}", row.rank, row.nct_id(), truncate(&row.trial.short_title, TITLE_WIDTH)))
            .collect();
        let choice = Select::new()
            .with_prompt("試験を選択")
            .items(&items)
            .default(0)
            .interact()
            .map_err(interaction_err)?;

        let row = &rows[choice];
        println!("\n{}", format_trial_details(&row.trial, snapshot.flag(row.nct_id())));
        Ok(())
    }

    fn export(&self, snapshot: &WorkflowSnapshot) -> Result<()> {
        if !matches!(snapshot.candidates, Candidates::Ready(_)) {
            println!("エクスポートできる結果がありません");
            return Ok(());
        }
        if snapshot.flags.reviewing
            && !Confirm::new()
                .with_prompt("レビューが完了していません。このまま出力しますか？")
                .default(false)
                .interact()
                .map_err(interaction_err)?
        {
            return Ok(());
        }

        let formats = [ExportFormat::Json, ExportFormat::Excel, ExportFormat::Both];
        let labels: Vec<String> = formats.iter().map(|f| f.to_string()).collect();
        let choice = Select::new()
            .with_prompt("出力形式")
            .items(&labels)
            .default(0)
            .interact()
            .map_err(interaction_err)?;
        let output: String = Input::new()
            .with_prompt("出力先")
            .default(".".to_string())
            .interact_text()
            .map_err(interaction_err)?;

        let document = ExportDocument::new(&snapshot.description, snapshot.threshold, &snapshot.rows_with_flags());
        let written = export::export_results(&document, formats[choice], &PathBuf::from(output), "trial-matches")?;
        for path in written {
            println!("✔ 出力: {}", path.display());
        }
        Ok(())
    }
}

/// 処理を待ちながら進捗を表示する。Ctrl+C で中断したら None
///
/// `notices` はタスク開始前に購読しておくこと。
pub async fn run_with_progress<T>(
    controller: &Controller,
    notices: broadcast::Receiver<WorkflowNotice>,
    task: JoinHandle<T>,
) -> Result<Option<T>> {
    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Ctrl+C を監視できません");
            std::future::pending::<()>().await;
        }
    };
    run_until_cancelled(controller, notices, task, interrupted).await
}

/// `cancel` が先に完了したらタスクを止めて入力画面へ戻し、None を返す
///
/// 待機中のHTTP呼び出しもタスクごと破棄される。
pub async fn run_until_cancelled<T, C>(
    controller: &Controller,
    mut notices: broadcast::Receiver<WorkflowNotice>,
    mut task: JoinHandle<T>,
    cancel: C,
) -> Result<Option<T>>
where
    C: Future<Output = ()>,
{
    let bar = ProgressBar::new_spinner();
    bar.enable_steady_tick(Duration::from_millis(120));
    tokio::pin!(cancel);

    let result = loop {
        tokio::select! {
            biased;
            result = &mut task => break Some(result),
            _ = &mut cancel => break None,
            notice = notices.recv() => match notice {
                Ok(notice) => update_progress(&bar, &notice),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "進捗通知を読み飛ばしました");
                }
                Err(RecvError::Closed) => break Some((&mut task).await),
            },
        }
    };
    bar.finish_and_clear();

    let Some(result) = result else {
        controller.back_to_input();
        task.abort();
        // 破棄の完了を待つ（Cancelled の JoinError になる）
        let _ = (&mut task).await;
        tracing::info!("処理を中断しました");
        return Ok(None);
    };
    result.map(Some).map_err(|e| TrialMatchError::Internal(e.to_string()))
}

fn update_progress(bar: &ProgressBar, notice: &WorkflowNotice) {
    match notice {
        WorkflowNotice::ScoresRequested => bar.set_message("類似度を取得中..."),
        WorkflowNotice::CandidatesReady { count } => {
            bar.set_length(*count as u64);
            bar.set_position(0);
            let style = ProgressStyle::with_template("{spinner} LLMレビュー中 [{bar:30}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> ");
            bar.set_style(style);
            bar.set_message("");
        }
        WorkflowNotice::Progress(progress) => {
            bar.set_position(progress.index as u64);
            bar.set_message(format!("{} {}", progress.nct_id, progress.flag.mark()));
        }
        WorkflowNotice::LookupFailed(message) => bar.set_message(format!("失敗: {}", message)),
        WorkflowNotice::ReviewFinished(_) => bar.set_message("完了"),
    }
}

pub fn print_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Completed(Some(summary)) if summary.failed > 0 => {
            println!("⚠ {}件のレビューに失敗しました（未判定のまま表示します）", summary.failed);
        }
        RunOutcome::Completed(_) => {}
        RunOutcome::LookupFailed(message) => println!("✘ 類似度の取得に失敗しました: {}", message),
        RunOutcome::Superseded => tracing::debug!("処理は新しい入力で置き換えられました"),
    }
}

fn print_results(snapshot: &WorkflowSnapshot) {
    println!();
    println!("患者記述:\n  {}\n", snapshot.description);
    match &snapshot.candidates {
        Candidates::NotComputed => println!("（計算中）"),
        Candidates::Failed(message) => println!("✘ 類似度を取得できませんでした: {}", message),
        Candidates::Ready(rows) if rows.is_empty() => {
            println!("類似度 {:.2} 以上の試験はありません", snapshot.threshold);
        }
        Candidates::Ready(_) => {
            println!("類似度 {:.2} 以上の候補:", snapshot.threshold);
            print!("{}", render_table(&snapshot.rows_with_flags()));
        }
    }
    println!();
}

/// 候補表（順位・判定・スコア・ID・状態・試験名）
pub fn render_table(rows: &[(CandidateRow, ReviewFlag)]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:>3}  {}  {:>6}  {:<12}  {:<24}  {}\n",
        "#", "判定", "類似度", "NCT ID", "状態", "試験名"
    ));
    for (row, flag) in rows {
        out.push_str(&format!(
            "{:>3}  {:^4}  {:>6.3}  {:<12}  {:<24}  {}\n",
            row.rank,
            flag.mark(),
            row.score,
            row.nct_id(),
            row.trial.status,
            truncate(&row.trial.short_title, TITLE_WIDTH)
        ));
    }
    out
}

/// 試験の詳細表示
pub fn format_trial_details(trial: &Trial, flag: ReviewFlag) -> String {
    let mut out = format!("{} {}\n", trial.nct_id, trial.short_title);
    if !trial.long_title.is_empty() {
        out.push_str(&format!("  正式名称: {}\n", trial.long_title));
    }
    out.push_str(&format!("  状態: {}\n", trial.status));
    if !trial.start_date.is_empty() {
        out.push_str(&format!("  開始日: {}\n", trial.start_date));
    }
    out.push_str(&format!("  レビュー: {} {}\n", flag.mark(), flag));
    out.push_str(&format!("  URL: {}\n", trial.study_url));
    if !trial.summary.is_empty() {
        out.push_str(&format!("\n概要:\n{}\n", trial.summary));
    }
    if !trial.detailed_description.is_empty() {
        out.push_str(&format!("\n詳細:\n{}\n", trial.detailed_description));
    }
    out
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}
