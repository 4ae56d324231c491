use serde::{Deserialize, Serialize};

/// 分類器が出力する1件の予測
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// クラスインデックス（分類器の出力次元）
    pub index: usize,
    /// クラス識別子（ImageNetのWordNet ID、例: "n02123045"）
    pub class_id: String,
    /// 人が読めるラベル（例: "tabby"）
    pub label: String,
    /// 信頼度 (0.0 - 1.0)
    pub confidence: f32,
}

impl std::fmt::Display for Prediction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {:.5}) [#{}]",
            self.class_id, self.label, self.confidence, self.index
        )
    }
}

/// 予測リストを1行で表示するための整形
pub fn format_predictions(predictions: &[Prediction]) -> String {
    let items: Vec<String> = predictions.iter().map(|p| p.to_string()).collect();
    format!("[{}]", items.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_predictions() {
        let predictions = vec![
            Prediction {
                index: 281,
                class_id: "n02123045".to_string(),
                label: "tabby".to_string(),
                confidence: 0.5,
            },
            Prediction {
                index: 574,
                class_id: "n03445777".to_string(),
                label: "golf_ball".to_string(),
                confidence: 0.25,
            },
        ];

        assert_eq!(
            format_predictions(&predictions),
            "[(n02123045, tabby, 0.50000) [#281], (n03445777, golf_ball, 0.25000) [#574]]"
        );
    }
}
