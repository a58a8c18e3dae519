use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// レビューに使うLLMの提供元（どちらもOpenAI互換のchat completions）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Groq,
    /// 院内ホストのOpenAI互換サーバー
    Local,
}

impl LlmProvider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "https://api.groq.com/openai/v1",
            LlmProvider::Local => "http://localhost:8000/v1",
        }
    }

    /// APIキーが必須か
    pub fn requires_api_key(&self) -> bool {
        matches!(self, LlmProvider::Groq)
    }

    pub fn name(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "groq",
            LlmProvider::Local => "local",
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
