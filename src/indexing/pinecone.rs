//! Pinecone REST クライアント
//!
//! - `POST {control}/embed` でホスト型の推論モデルを使って埋め込みを作る
//! - `GET {control}/indexes/{name}` でインデックスのホストを解決する（未設定時のみ、初回に一度）
//! - `POST https://{host}/vectors/upsert` で登録する

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::IndexError;
use crate::indexing::{IndexDocument, IndexMetadata, ItemIndexer};
use crate::model::IndexSettings;

/// コントロールプレーンのURL
pub const CONTROL_PLANE_URL: &str = "https://api.pinecone.io";

/// 使用するAPIバージョン
pub const API_VERSION: &str = "2025-01";

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    parameters: EmbedParameters,
    inputs: Vec<EmbedInput<'a>>,
}

#[derive(Debug, Serialize)]
struct EmbedParameters {
    input_type: &'static str,
    truncate: &'static str,
}

#[derive(Debug, Serialize)]
struct EmbedInput<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<Embedding>,
}

#[derive(Debug, Deserialize)]
struct Embedding {
    #[serde(default)]
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct DescribeIndexResponse {
    host: String,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<Vector<'a>>,
}

#[derive(Debug, Serialize)]
struct Vector<'a> {
    id: &'a str,
    values: Vec<f32>,
    metadata: &'a IndexMetadata,
}

/// Pinecone へのインデクサ
pub struct PineconeIndexer {
    client: Client,
    timeout: Duration,
    enabled: bool,
    api_key: Option<String>,
    index_name: String,
    embed_model: String,
    control_plane: String,
    host: OnceCell<String>,
}

impl PineconeIndexer {
    pub fn new(settings: &IndexSettings) -> Self {
        let host = OnceCell::new_with(settings.index_host.as_deref().map(normalize_host));
        let timeout = settings.timeout();
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "HTTPクライアントの設定に失敗しました。既定の設定を使います");
                Client::new()
            });
        Self {
            client,
            timeout,
            enabled: settings.enabled,
            api_key: settings.api_key.clone(),
            index_name: settings.index_name.clone(),
            embed_model: settings.embed_model.clone(),
            control_plane: CONTROL_PLANE_URL.to_string(),
            host,
        }
    }

    /// コントロールプレーンのURLを差し替える
    pub fn with_control_plane(mut self, url: impl Into<String>) -> Self {
        self.control_plane = url.into().trim_end_matches('/').to_string();
        self
    }

    fn api_key(&self) -> Result<&str, IndexError> {
        self.api_key.as_deref().ok_or(IndexError::MissingApiKey)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, IndexError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(IndexError::Response(format!("{status}: {body}")))
    }

    /// テキストを埋め込みベクトルに変換
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        let request = EmbedRequest {
            model: &self.embed_model,
            parameters: EmbedParameters {
                input_type: "passage",
                truncate: "END",
            },
            inputs: vec![EmbedInput { text }],
        };

        let response = self
            .client
            .post(format!("{}/embed", self.control_plane))
            .header("Api-Key", self.api_key()?)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&request)
            .send()
            .await?;
        let response: EmbedResponse = Self::check(response).await?.json().await?;

        let values = response
            .data
            .into_iter()
            .next()
            .map(|e| e.values)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| IndexError::Response("embed response contained no vector".to_string()))?;

        debug!(dimensions = values.len(), "埋め込みを取得しました");
        Ok(values)
    }

    /// インデックスのホストを解決（初回のみ問い合わせる）
    async fn host(&self) -> Result<&str, IndexError> {
        let host = self
            .host
            .get_or_try_init(|| async {
                let response = self
                    .client
                    .get(format!("{}/indexes/{}", self.control_plane, self.index_name))
                    .header("Api-Key", self.api_key()?)
                    .header("X-Pinecone-API-Version", API_VERSION)
                    .send()
                    .await?;
                let described: DescribeIndexResponse = Self::check(response).await?.json().await?;
                debug!(index = %self.index_name, host = %described.host, "インデックスのホストを解決しました");
                Ok::<_, IndexError>(normalize_host(&described.host))
            })
            .await?;
        Ok(host.as_str())
    }
}

/// スキームのないホスト名に https:// を付ける
fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

#[async_trait]
impl ItemIndexer for PineconeIndexer {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn upsert(&self, document: &IndexDocument) -> Result<(), IndexError> {
        if !self.enabled {
            return Err(IndexError::Disabled);
        }
        self.api_key()?;

        let values = self.embed(&document.text).await?;
        let host = self.host().await?;

        let request = UpsertRequest {
            vectors: vec![Vector {
                id: &document.id,
                values,
                metadata: &document.metadata,
            }],
        };

        let response = self
            .client
            .post(format!("{host}/vectors/upsert"))
            .header("Api-Key", self.api_key()?)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&request)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
