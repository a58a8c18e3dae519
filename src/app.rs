//! 起動時の組み立て（データ読み込み・クライアント生成）

use crate::catalog::{DemoPatients, TrialCatalog};
use crate::config::Config;
use crate::data_sync;
use crate::error::{Result, TrialMatchError};
use crate::reviewer::{LlmClient, ReviewCache, ReviewClassifier};
use crate::similarity::{SimilarityClient, SimilarityLookup, SimilarityTable};
use crate::workflow::{Controller, WorkflowSettings};
use std::sync::Arc;

/// 読み込み済みのデータとクライアント
pub struct AppContext {
    pub config: Config,
    pub catalog: Arc<TrialCatalog>,
    pub lookup: Arc<SimilarityLookup>,
    pub cache: Arc<ReviewCache>,
}

impl AppContext {
    /// データファイルを揃えて読み込む
    pub async fn load(config: Config) -> Result<Self> {
        let report = data_sync::ensure_data_files(&config, false).await?;
        for path in &report.downloaded {
            tracing::info!(path = %path.display(), "データファイルを取得しました");
        }
        Self::from_files(config)
    }

    /// ローカルのデータファイルだけで組み立てる
    pub fn from_files(config: Config) -> Result<Self> {
        let catalog = TrialCatalog::load(&config.trials_path())?;
        let patients = DemoPatients::load(&config.patients_path())?;
        let table = SimilarityTable::load(&config.similarity_path(), &catalog)?;
        let client = SimilarityClient::from_config(&config)?;
        match &client {
            Some(client) => tracing::debug!(endpoint = client.endpoint(), "類似度APIを使用します"),
            None => tracing::debug!("類似度APIが未設定です（デモ患者のみ照合できます）"),
        }
        tracing::info!(
            trials = catalog.len(),
            patients = patients.len(),
            "データを読み込みました"
        );

        let cache = ReviewCache::load(&config.review_cache_path());
        tracing::debug!(path = %cache.path().display(), entries = cache.len(), "レビューキャッシュ");
        Ok(Self {
            catalog: Arc::new(catalog),
            lookup: Arc::new(SimilarityLookup::new(patients, table, client)),
            cache: Arc::new(cache),
            config,
        })
    }

    pub fn patients(&self) -> &DemoPatients {
        self.lookup.patients()
    }

    /// LLMクライアント。APIキーが無ければ None（警告のみ）
    pub fn classifier(&self) -> Result<Option<Arc<dyn ReviewClassifier>>> {
        match LlmClient::from_config(&self.config) {
            Ok(client) => {
                tracing::debug!(model = client.model(), "LLMレビューを有効にします");
                let client: Arc<dyn ReviewClassifier> = Arc::new(client);
                Ok(Some(client))
            }
            Err(TrialMatchError::MissingCredential(name)) => {
                tracing::warn!(credential = name, "LLMのAPIキーが無いためレビューを行いません");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn controller(&self, classifier: Option<Arc<dyn ReviewClassifier>>) -> Controller {
        Controller::new(
            Arc::clone(&self.catalog),
            self.lookup.clone(),
            classifier,
            Arc::clone(&self.cache),
            WorkflowSettings {
                threshold: self.config.minimum_similarity,
                max_candidates: self.config.max_candidates,
                review_delay: self.config.review_delay(),
            },
        )
    }
}
