use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrialMatchError {
    #[error("設定エラー: {0}")]
    Config(String),

    #[error("{0} が設定されていません。`trial-match config` または環境変数で設定してください")]
    MissingCredential(&'static str),

    #[error("データ読み込みエラー: {0}")]
    DataLoad(String),

    #[error("データが見つかりません: {0}")]
    NotFound(String),

    #[error("{service} 呼び出しエラー (status {status}): {body}")]
    RemoteService {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("類似度の取得に失敗しました: {0}")]
    Lookup(String),

    #[error("処理を中断しました")]
    Cancelled,

    #[error("エクスポートエラー: {0}")]
    Export(String),

    #[error("入力エラー: {0}")]
    Interaction(String),

    #[error("内部エラー: {0}")]
    Internal(String),

    #[error(transparent)]
    Common(#[from] trial_match_common::Error),

    #[error("HTTPエラー: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON解析エラー: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),
}

impl TrialMatchError {
    /// リモートサービス（類似度API・LLM）起因のエラーか
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            TrialMatchError::RemoteService { .. } | TrialMatchError::Http(_) | TrialMatchError::Lookup(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TrialMatchError>;
