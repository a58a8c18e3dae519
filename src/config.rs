use crate::ai_provider::LlmProvider;
use crate::error::{Result, TrialMatchError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub patients_file: String,
    pub trials_file: String,
    pub similarity_file: String,

    /// 類似度スコアAPI
    pub similarity_endpoint: Option<String>,
    pub similarity_token: Option<String>,
    /// 類似度API用の独自CA証明書（PEM）
    pub ca_cert_path: Option<PathBuf>,

    pub llm_provider: LlmProvider,
    pub llm_base_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    /// LLM呼び出し間の待機（レート制限対策）
    pub review_delay_ms: u64,

    pub minimum_similarity: f64,
    pub max_candidates: usize,

    /// 省略時は data_dir/review-cache.json
    pub review_cache_path: Option<PathBuf>,

    /// データファイル取得元（オブジェクトストレージ）
    pub object_store_url: Option<String>,
    pub object_store_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

impl Config {
    /// 設定ファイルを読み込み、環境変数で上書きして検証する
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            serde_json::from_str(&content)?
        } else {
            Self::default_config()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| TrialMatchError::Config("ホームディレクトリが見つかりません".into()))?;
        Ok(home.join(".config").join("trial-match").join("config.json"))
    }

    fn default_config() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            patients_file: "demo_patients.csv".into(),
            trials_file: "trial_nct.june10.csv".into(),
            similarity_file: "trialpatient_sim_nct.june10.csv".into(),
            similarity_endpoint: None,
            similarity_token: None,
            ca_cert_path: None,
            llm_provider: LlmProvider::Groq,
            llm_base_url: None,
            llm_api_key: None,
            llm_model: "llama3-70b-8192".into(),
            llm_temperature: 0.01,
            llm_max_tokens: 1024,
            review_delay_ms: 300,
            minimum_similarity: 0.4,
            max_candidates: 10,
            review_cache_path: None,
            object_store_url: None,
            object_store_token: None,
        }
    }

    /// 環境変数による上書き（秘密情報・エンドポイント）
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = non_empty("TRIAL_MATCH_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(url) = non_empty("AI_SIMILAR") {
            self.similarity_endpoint = Some(url);
        }
        if let Some(token) = non_empty("TOKEN") {
            self.similarity_token = Some(token);
        }
        if let Some(cert) = non_empty("CERT_KEYNAME") {
            self.ca_cert_path = Some(PathBuf::from(cert));
        }
        if let Some(url) = non_empty("LLM_BASE_URL") {
            self.llm_base_url = Some(url);
        }
        if let Some(key) = non_empty("GROQ_API_KEY") {
            self.llm_api_key = Some(key);
        }
        if let Some(url) = non_empty("OBJECT_STORE_URL") {
            self.object_store_url = Some(url);
        }
        if let Some(token) = non_empty("OBJECT_STORE_TOKEN") {
            self.object_store_token = Some(token);
        }
    }

    /// 起動時の検証
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.minimum_similarity) {
            return Err(TrialMatchError::Config(format!(
                "minimum_similarity は0.0〜1.0で指定してください: {}",
                self.minimum_similarity
            )));
        }
        if self.max_candidates == 0 {
            return Err(TrialMatchError::Config("max_candidates は1以上で指定してください".into()));
        }
        if !(0.0..=2.0).contains(&self.llm_temperature) {
            return Err(TrialMatchError::Config(format!(
                "llm_temperature は0.0〜2.0で指定してください: {}",
                self.llm_temperature
            )));
        }
        if self.llm_max_tokens == 0 {
            return Err(TrialMatchError::Config("llm_max_tokens は1以上で指定してください".into()));
        }
        if self.llm_model.trim().is_empty() {
            return Err(TrialMatchError::Config("llm_model が空です".into()));
        }

        let urls = [
            ("similarity_endpoint", self.similarity_endpoint.as_deref()),
            ("llm_base_url", self.llm_base_url.as_deref()),
            ("object_store_url", self.object_store_url.as_deref()),
        ];
        for (name, url) in urls {
            if let Some(url) = url {
                reqwest::Url::parse(url).map_err(|e| {
                    TrialMatchError::Config(format!("{} が不正なURLです ({}): {}", name, url, e))
                })?;
            }
        }

        Ok(())
    }

    pub fn patients_path(&self) -> PathBuf {
        self.data_dir.join(&self.patients_file)
    }

    pub fn trials_path(&self) -> PathBuf {
        self.data_dir.join(&self.trials_file)
    }

    pub fn similarity_path(&self) -> PathBuf {
        self.data_dir.join(&self.similarity_file)
    }

    pub fn review_cache_path(&self) -> PathBuf {
        self.review_cache_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("review-cache.json"))
    }

    pub fn llm_base_url(&self) -> &str {
        self.llm_base_url
            .as_deref()
            .unwrap_or_else(|| self.llm_provider.default_base_url())
    }

    pub fn review_delay(&self) -> Duration {
        Duration::from_millis(self.review_delay_ms)
    }

    /// LLMのAPIキー（ローカルLLMでは不要）
    pub fn llm_api_key(&self) -> Result<Option<String>> {
        match (&self.llm_api_key, self.llm_provider.requires_api_key()) {
            (Some(key), _) => Ok(Some(key.clone())),
            (None, true) => Err(TrialMatchError::MissingCredential("GROQ_API_KEY")),
            (None, false) => Ok(None),
        }
    }

    pub fn set_llm_api_key(&mut self, key: String, path: Option<&Path>) -> Result<PathBuf> {
        self.llm_api_key = Some(key);
        self.save(path)
    }

    pub fn set_similarity_token(&mut self, token: String, path: Option<&Path>) -> Result<PathBuf> {
        self.similarity_token = Some(token);
        self.save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_candidates, 10);
        assert!((config.minimum_similarity - 0.4).abs() < f64::EPSILON);
        assert_eq!(config.review_cache_path(), PathBuf::from("data/review-cache.json"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("AI_SIMILAR", "https://sim.example.org/similar"),
            ("TOKEN", "secret"),
            ("GROQ_API_KEY", "gsk_test"),
            ("OBJECT_STORE_URL", "   "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.similarity_endpoint.as_deref(), Some("https://sim.example.org/similar"));
        assert_eq!(config.similarity_token.as_deref(), Some("secret"));
        assert_eq!(config.llm_api_key.as_deref(), Some("gsk_test"));
        // 空白のみは無視
        assert!(config.object_store_url.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let config = Config {
            minimum_similarity: 1.5,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(TrialMatchError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_candidates() {
        let config = Config {
            max_candidates: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let config = Config {
            similarity_endpoint: Some("not a url".into()),
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(format!("{}", err).contains("similarity_endpoint"));
    }

    #[test]
    fn test_llm_api_key_requirement() {
        let groq = Config::default();
        assert!(matches!(groq.llm_api_key(), Err(TrialMatchError::MissingCredential(_))));

        let local = Config {
            llm_provider: LlmProvider::Local,
            ..Config::default()
        };
        assert_eq!(local.llm_api_key().unwrap(), None);
        assert_eq!(local.llm_base_url(), "http://localhost:8000/v1");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("config.json");

        let config = Config {
            max_candidates: 5,
            llm_model: "llama-3.3-70b-versatile".into(),
            ..Config::default()
        };
        config.save(Some(&path)).expect("保存失敗");

        let content = std::fs::read_to_string(&path).unwrap();
        let loaded: Config = serde_json::from_str(&content).unwrap();
        assert_eq!(loaded.max_candidates, 5);
        assert_eq!(loaded.llm_model, "llama-3.3-70b-versatile");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let loaded: Config = serde_json::from_str(r#"{"max_candidates": 3}"#).unwrap();
        assert_eq!(loaded.max_candidates, 3);
        assert_eq!(loaded.llm_max_tokens, 1024);
    }
}
