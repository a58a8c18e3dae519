//! LLM連携モジュール
//!
//! OpenAI互換の chat completions（Groq / 院内ホスト）に
//! システムプロンプト + ユーザープロンプトを送り、生の回答文を返す。

use crate::config::Config;
use crate::error::{Result, TrialMatchError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use trial_match_common::{build_review_prompt, REVIEW_SYSTEM_PROMPT};

const SERVICE_NAME: &str = "LLM";

/// 試験レビューの問い合わせ先
#[async_trait]
pub trait ReviewClassifier: Send + Sync {
    /// 患者記述と試験サマリを渡し、推論文＋Yes!/No! の回答を得る
    async fn classify(&self, patient_summary: &str, trial_summary: &str) -> Result<String>;
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

pub struct LlmClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl LlmClient {
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.llm_api_key()?;
        Ok(Self {
            client: Client::builder().build()?,
            base_url: config.llm_base_url().trim_end_matches('/').to_string(),
            api_key,
            model: config.llm_model.clone(),
            temperature: config.llm_temperature,
            max_tokens: config.llm_max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                Message { role: "system", content: system },
                Message { role: "user", content: user },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: 1.0,
            stream: false,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TrialMatchError::RemoteService {
                service: SERVICE_NAME,
                status: status.as_u16(),
                body: text,
            });
        }

        let result: ChatResponse = response.json().await?;
        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| TrialMatchError::RemoteService {
                service: SERVICE_NAME,
                status: status.as_u16(),
                body: "レスポンスに回答がありません".into(),
            })
    }
}

#[async_trait]
impl ReviewClassifier for LlmClient {
    async fn classify(&self, patient_summary: &str, trial_summary: &str) -> Result<String> {
        let prompt = build_review_prompt(trial_summary, patient_summary);
        tracing::debug!(model = %self.model, prompt_chars = prompt.len(), "LLMレビューを実行します");

        let answer = self.chat(REVIEW_SYSTEM_PROMPT, &prompt).await?;

        // 判定トークンは末尾に来る
        let skip = answer.chars().count().saturating_sub(80);
        let tail: String = answer.chars().skip(skip).collect();
        tracing::debug!(chars = answer.len(), tail = %tail, "LLMの回答を受信しました");
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_provider::LlmProvider;

    #[test]
    fn test_from_config_requires_groq_key() {
        let config = Config::default();
        assert!(matches!(
            LlmClient::from_config(&config),
            Err(TrialMatchError::MissingCredential(_))
        ));
    }

    #[test]
    fn test_from_config_local() {
        let config = Config {
            llm_provider: LlmProvider::Local,
            llm_base_url: Some("http://llm.internal:8080/v1/".into()),
            ..Config::default()
        };
        let client = LlmClient::from_config(&config).unwrap();
        assert_eq!(client.base_url, "http://llm.internal:8080/v1");
        assert_eq!(client.model(), "llama3-70b-8192");
    }

    #[test]
    fn test_request_shape() {
        let body = ChatRequest {
            model: "m",
            messages: vec![
                Message { role: "system", content: "s" },
                Message { role: "user", content: "u" },
            ],
            temperature: 0.01,
            max_tokens: 1024,
            top_p: 1.0,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "u");
        assert_eq!(json["max_tokens"], 1024);
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_response_parse() {
        let raw = r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"Reasoning... Yes!"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Reasoning... Yes!"));
    }
}
