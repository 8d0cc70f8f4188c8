//! クラスラベルの定義と変換
//!
//! 学習データのディレクトリ名（インドネシア語のカテゴリトークン）を表示用の英語ラベルに変換します。
//! 変換表は閉じた世界として扱い、表にないトークンは起動時の致命的エラーとします。
//! 「Unknown」への置き換えは行いません（クラスインデックスの対応が壊れるため）。

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::LabelError;

/// 生トークン → 正規ラベル
pub const TRANSLATION_TABLE: [(&str, &str); 15] = [
    ("Blazer", "Blazer"),
    ("Celana_Panjang", "Trousers/Long Pants"),
    ("Celana_Pendek", "Shorts"),
    ("Gaun", "Dress"),
    ("Hoodie", "Hoodie"),
    ("Jaket", "Jacket"),
    ("Jaket_Denim", "Denim Jacket"),
    ("Jaket_Olahraga", "Sports Jacket"),
    ("Jeans", "Jeans"),
    ("Kaos", "T-Shirt"),
    ("Kemeja", "Button-Up Shirt"),
    ("Mantel", "Coat"),
    ("Polo", "Polo Shirt"),
    ("Rok", "Skirt"),
    ("Sweter", "Sweater"),
];

/// 順序付きの正規クラス名一覧
///
/// インデックスがモデル出力層の次元と1対1で対応します。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassLabelSet {
    labels: Vec<String>,
}

impl ClassLabelSet {
    pub fn new(labels: Vec<String>) -> Result<Self, LabelError> {
        if labels.is_empty() {
            return Err(LabelError::Empty);
        }
        let mut seen = HashSet::new();
        for label in &labels {
            if !seen.insert(label.as_str()) {
                return Err(LabelError::Duplicate(label.clone()));
            }
        }
        Ok(Self { labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn position(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.labels
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

/// ラベル変換器
#[derive(Debug, Clone)]
pub struct LabelTranslator {
    table: Vec<(String, String)>,
}

impl Default for LabelTranslator {
    fn default() -> Self {
        Self::new(
            TRANSLATION_TABLE
                .iter()
                .map(|(token, label)| (token.to_string(), label.to_string())),
        )
    }
}

impl LabelTranslator {
    pub fn new(table: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            table: table.into_iter().collect(),
        }
    }

    /// 1トークンを変換する
    pub fn canonical(&self, token: &str) -> Result<&str, LabelError> {
        self.table
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, label)| label.as_str())
            .ok_or_else(|| LabelError::UnknownClassToken(token.to_string()))
    }

    /// トークン列を入力順のまま変換して ClassLabelSet を作る
    pub fn translate<S: AsRef<str>>(&self, tokens: &[S]) -> Result<ClassLabelSet, LabelError> {
        let labels = tokens
            .iter()
            .map(|token| self.canonical(token.as_ref()).map(str::to_string))
            .collect::<Result<Vec<_>, _>>()?;
        ClassLabelSet::new(labels)
    }
}
