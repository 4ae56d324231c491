//! クラス名 → クラスインデックスの静的マッピング
//!
//! `imagenet_index.json` (`{"tabby cat": 281, ...}`) を読み込み、
//! 大文字小文字・アンダースコアを区別せずにクラス名を解決します。

use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// ラベル文字列を正規化（小文字化、`_` → 空白）
pub fn normalize_label(label: &str) -> String {
    label.to_lowercase().replace('_', " ")
}

/// 正規化済みクラス名からクラスインデックスへの不変マップ
#[derive(Debug, Clone, Default)]
pub struct LabelIndex {
    entries: HashMap<String, usize>,
}

impl LabelIndex {
    /// JSONファイルから読み込む
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read label index: {:?}", path))?;
        Self::from_json_str(&content)
            .context(format!("Failed to parse label index: {:?}", path))
    }

    /// JSON文字列から生成
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: HashMap<String, usize> = serde_json::from_str(json)?;
        Ok(Self::from_entries(raw))
    }

    /// (クラス名, インデックス) の組から生成（キーは正規化される）
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, usize)>,
        S: AsRef<str>,
    {
        let entries = entries
            .into_iter()
            .map(|(name, index)| (normalize_label(name.as_ref()), index))
            .collect();
        Self { entries }
    }

    /// 分類器の出力順に並んだラベル列から生成（インデックス = 位置）
    ///
    /// 同じラベルが複数回現れる場合は先頭の位置を採用します。
    pub fn from_class_labels(labels: &[String]) -> Self {
        let mut entries = HashMap::with_capacity(labels.len());
        for (index, label) in labels.iter().enumerate() {
            entries.entry(normalize_label(label)).or_insert(index);
        }
        Self { entries }
    }

    /// JSONファイルに保存する（キーは名前順）
    pub fn save(&self, path: &Path) -> Result<()> {
        let ordered: BTreeMap<&String, &usize> = self.entries.iter().collect();
        let content = serde_json::to_string_pretty(&ordered)?;
        std::fs::write(path, content).context(format!("Failed to write label index: {:?}", path))
    }

    /// クラス名を解決する。存在しない場合は `None`
    pub fn resolve(&self, label: &str) -> Option<usize> {
        self.entries.get(&normalize_label(label)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
