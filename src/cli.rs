use crate::ai_provider::LlmProvider;
use crate::export::ExportFormat;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "trial-match")]
#[command(about = "患者記述から臨床試験候補を探し、LLMでレビューするデモツール", long_about = None)]
pub struct Cli {
    /// 省略時は対話セッション
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// 設定ファイル（デフォルト: ~/.config/trial-match/config.json）
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 対話セッション（入力画面 → 結果画面）
    Session {
        /// 初期表示するデモ患者ID（省略時はランダム）
        #[arg(short, long)]
        patient: Option<String>,
    },

    /// 1回だけマッチングして結果を出力
    Match(MatchArgs),

    /// 設定を表示/編集
    Config {
        /// 設定を表示
        #[arg(long)]
        show: bool,

        /// LLMのAPIキーを設定
        #[arg(long)]
        set_llm_key: Option<String>,

        /// 類似度APIのトークンを設定
        #[arg(long)]
        set_similarity_token: Option<String>,

        /// LLMプロバイダ (groq/local)
        #[arg(long)]
        provider: Option<LlmProvider>,

        /// LLMモデル名
        #[arg(long)]
        model: Option<String>,

        /// 既定の類似度閾値
        #[arg(long)]
        threshold: Option<f64>,

        /// 既定の最大候補数
        #[arg(long)]
        max: Option<usize>,
    },

    /// レビューキャッシュ管理
    Cache {
        /// キャッシュを削除
        #[arg(long)]
        clear: bool,

        /// キャッシュ情報を表示
        #[arg(long)]
        info: bool,
    },

    /// データファイルを取得
    Sync {
        /// 既存ファイルも取り直す
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug, Clone)]
#[command(group = clap::ArgGroup::new("input").required(true).args(["summary", "summary_file", "patient"]))]
pub struct MatchArgs {
    /// 患者記述
    #[arg(long)]
    pub summary: Option<String>,

    /// 患者記述ファイル
    #[arg(long)]
    pub summary_file: Option<PathBuf>,

    /// デモ患者ID
    #[arg(long)]
    pub patient: Option<String>,

    /// 類似度の閾値（省略時は設定値）
    #[arg(short, long)]
    pub threshold: Option<f64>,

    /// 最大候補数（省略時は設定値）
    #[arg(short, long)]
    pub max: Option<usize>,

    /// LLMレビューを行わない
    #[arg(long)]
    pub no_review: bool,

    /// 出力ファイル/ディレクトリ（省略時は表示のみ）
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// 出力形式 (json/excel/both)
    #[arg(short, long, default_value = "json")]
    pub format: ExportFormat,
}
