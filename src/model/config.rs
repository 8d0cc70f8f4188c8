//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、チェックポイント、色抽出、HTTPサーバ、学習、インデックス登録の設定を
//! JSON形式で保存・読み込みします。一部の値は環境変数で上書きできます。

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::color::MAX_PALETTE_SIZE;
use crate::ml::prediction::TOP_K;

/// 設定ファイルの場所を上書きする環境変数
pub const CONFIG_ENV: &str = "CLOSET_VISION_CONFIG";

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceType {
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
    /// WGPU (GPU) バックエンド（`wgpu` フィーチャが必要）
    Wgpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// チェックポイント（tar.gz）のパス
    pub checkpoint_path: String,
    /// 返す上位候補の数（1〜3 に丸められる）
    pub top_k: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            checkpoint_path: "models/closet_classifier.tar.gz".to_string(),
            top_k: TOP_K,
        }
    }
}

/// 色抽出設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorSettings {
    /// パレット色数（最大5）
    pub palette_size: usize,
    /// サンプリング間隔（画素）
    pub sample_step: usize,
}

impl Default for ColorSettings {
    fn default() -> Self {
        Self {
            palette_size: MAX_PALETTE_SIZE,
            sample_step: 10,
        }
    }
}

/// HTTPサーバ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// アップロードの上限バイト数
    pub max_upload_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5001,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// データセットのルート（クラスごとのサブディレクトリ）
    pub data_dir: String,
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// ワーカー数
    pub num_workers: usize,
    /// 学習率
    pub learning_rate: f64,
    /// ランダムシード
    pub seed: u64,
    /// トレーニングデータの割合
    pub train_ratio: f32,
    /// 事前学習済みバックボーン（burn の named mpk 形式）
    pub backbone_path: Option<String>,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            data_dir: "dataset".to_string(),
            num_epochs: 5,
            batch_size: 32,
            num_workers: 2,
            learning_rate: 1e-3,
            seed: 42,
            train_ratio: 0.8,
            backbone_path: None,
        }
    }
}

/// ベクトルインデックス登録の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub enabled: bool,
    pub index_name: String,
    pub embed_model: String,
    /// 未指定なら describe-index で解決する
    pub index_host: Option<String>,
    /// 1回の登録（埋め込み + upsert）にかけてよい時間（ミリ秒）
    pub timeout_ms: u64,
    /// `PINECONE_API_KEY` からのみ設定され、ファイルには書き出さない
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl IndexSettings {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms.max(1))
    }
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            index_name: "closetsensei".to_string(),
            embed_model: "llama-text-embed-v2".to_string(),
            index_host: None,
            timeout_ms: 10_000,
            api_key: None,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// モデル設定
    pub model: ModelSettings,
    /// 色抽出設定
    pub colors: ColorSettings,
    /// HTTPサーバ設定
    pub server: ServerSettings,
    /// トレーニング設定
    pub training: TrainingSettings,
    /// インデックス登録設定
    pub indexing: IndexSettings,
}

impl AppConfig {
    /// 設定ファイルのパス（`CLOSET_VISION_CONFIG` が優先）
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("closet_vision.json"))
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("設定ファイルを読み込めません: {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("設定ファイルの形式が不正です: {}", path.display()))?;
        Ok(config)
    }

    /// デフォルトパスから設定を読み込み、環境変数を反映する
    ///
    /// ファイルが存在しない・壊れている場合はデフォルト設定を使います。
    pub fn load_or_default() -> Self {
        let path = Self::default_path();
        let mut config = if path.exists() {
            match Self::load(&path) {
                Ok(config) => {
                    info!(path = %path.display(), "設定ファイルを読み込みました");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %format!("{e:#}"), "設定ファイルの読み込みに失敗しました。デフォルト設定を使用します");
                    Self::default()
                }
            }
        } else {
            info!(path = %path.display(), "設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// 環境変数による上書き
    ///
    /// テストから差し替えられるよう、参照関数を受け取ります。
    pub fn apply_env_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = var("PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!(value = %port, "PORT が数値ではありません。無視します"),
            }
        }
        if let Some(key) = var("PINECONE_API_KEY").filter(|k| !k.is_empty()) {
            self.indexing.api_key = Some(key);
        }
        if let Some(index) = var("PINECONE_INDEX").filter(|v| !v.is_empty()) {
            self.indexing.index_name = index;
        }
        if let Some(model) = var("PINECONE_EMBED_MODEL").filter(|v| !v.is_empty()) {
            self.indexing.embed_model = model;
        }
        if var("PINECONE_DISABLED").as_deref() == Some("1") {
            self.indexing.enabled = false;
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 設定情報をログに出す
    pub fn log_summary(&self) {
        info!(
            device = %self.device_type,
            checkpoint = %self.model.checkpoint_path,
            top_k = self.model.top_k,
            palette_size = self.colors.palette_size,
            sample_step = self.colors.sample_step,
            indexing = self.indexing.enabled,
            index_name = %self.indexing.index_name,
            "設定"
        );
    }
}
