//! 類似度スコアAPIクライアント
//!
//! 新しい患者記述を `{"summary": text}` としてPOSTし、
//! 試験ID → スコアのJSONオブジェクトを受け取る。リトライはしない。

use crate::config::Config;
use crate::error::{Result, TrialMatchError};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use trial_match_common::SimilarityScores;

const SERVICE_NAME: &str = "類似度API";

#[derive(Serialize)]
struct SimilarityRequest<'a> {
    summary: &'a str,
}

pub struct SimilarityClient {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl SimilarityClient {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Result<Self> {
        Self::with_client(Client::builder().build()?, endpoint, token)
    }

    fn with_client(client: Client, endpoint: impl Into<String>, token: Option<String>) -> Result<Self> {
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token,
        })
    }

    /// 設定から生成（エンドポイント未設定なら None）
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        let Some(endpoint) = config.similarity_endpoint.clone() else {
            return Ok(None);
        };

        let mut builder = Client::builder();
        if let Some(cert_path) = &config.ca_cert_path {
            let pem = std::fs::read(cert_path).map_err(|e| {
                TrialMatchError::Config(format!("CA証明書を読めません ({}): {}", cert_path.display(), e))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| TrialMatchError::Config(format!("CA証明書が不正です: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder.build()?;
        Self::with_client(client, endpoint, config.similarity_token.clone()).map(Some)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// 新しい患者記述の類似度スコアを取得
    pub async fn scores_for_new_description(&self, text: &str) -> Result<SimilarityScores> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&SimilarityRequest { summary: text });
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        tracing::debug!(endpoint = %self.endpoint, chars = text.len(), "類似度APIを呼び出します");
        let response = request.send().await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.text().await.unwrap_or_default();

        if status.as_u16() != 200 {
            return Err(TrialMatchError::RemoteService {
                service: SERVICE_NAME,
                status: status.as_u16(),
                body,
            });
        }
        if !content_type.contains("application/json") {
            return Err(TrialMatchError::RemoteService {
                service: SERVICE_NAME,
                status: status.as_u16(),
                body: format!("想定外のContent-Type: {}\n{}", content_type, body),
            });
        }

        parse_scores(&body)
    }
}

/// レスポンス本文を試験ID → スコアに変換（数値以外の値は捨てる）
fn parse_scores(body: &str) -> Result<SimilarityScores> {
    let raw: HashMap<String, serde_json::Value> = serde_json::from_str(body)?;

    let mut scores = SimilarityScores::with_capacity(raw.len());
    for (nct_id, value) in raw {
        match value.as_f64() {
            Some(score) => {
                scores.insert(nct_id, score);
            }
            None => tracing::warn!(nct_id = %nct_id, value = %value, "数値でないスコアを無視します"),
        }
    }

    tracing::debug!(count = scores.len(), "類似度スコアを受信しました");
    Ok(scores)
}
