//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、攻撃パラメータ、分類器アーカイブのパスなどをJSON形式で保存・読み込みします。
//! 設定はドライバと最適化ループへ明示的に渡され、グローバルな状態は持ちません。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 計算デバイスの種類
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl Default for DeviceType {
    fn default() -> Self {
        // 再現性のためCPUを既定とする
        DeviceType::Cpu
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// 攻撃パラメータ
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackSettings {
    /// 摂動の最大絶対値（ピクセル値スケール）
    pub epsilon: f64,
    /// Adamの学習率
    pub learning_rate: f64,
    /// 最適化ステップ数（早期終了なし）
    pub num_steps: usize,
    /// 損失を表示する間隔（ステップ）
    pub log_interval: usize,
    /// 表示する上位予測数
    pub top_k: usize,
    /// Adamの数値安定化項
    #[serde(default = "default_adam_epsilon")]
    pub adam_epsilon: f32,
}

fn default_adam_epsilon() -> f32 {
    1e-7
}

impl Default for AttackSettings {
    fn default() -> Self {
        Self {
            epsilon: 2.0 / 255.0,
            learning_rate: 0.01,
            num_steps: 100,
            log_interval: 10,
            top_k: 3,
            adam_epsilon: default_adam_epsilon(),
        }
    }
}

/// 分類器アーカイブの設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// 摂動を最適化する分類器（tar.gz）
    pub primary_model_path: String,
    /// 転移性を確認する分類器（tar.gz）。未設定なら転移評価を省略
    pub transfer_model_path: Option<String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            primary_model_path: "models/resnet50.tar.gz".to_string(),
            transfer_model_path: Some("models/mobilenet_v2.tar.gz".to_string()),
        }
    }
}

/// 入出力ファイルの設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// クラス名 → インデックスのマッピングJSON
    pub label_index_path: String,
    /// 敵対的画像の出力先（実行ごとに上書き）
    pub output_path: String,
    /// 損失履歴CSVの出力先
    #[serde(default)]
    pub loss_history_path: Option<String>,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            label_index_path: "imagenet_index.json".to_string(),
            output_path: "output.png".to_string(),
            loss_history_path: None,
        }
    }
}

/// 表示ウィンドウの設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplaySettings {
    /// 敵対的画像をウィンドウ表示し、キー入力を待つ
    pub show_window: bool,
    /// ウィンドウ名
    pub window_name: String,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            show_window: true,
            window_name: "Output".to_string(),
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    /// 攻撃パラメータ
    #[serde(default)]
    pub attack: AttackSettings,
    /// 分類器設定
    #[serde(default)]
    pub models: ModelSettings,
    /// 入出力パス
    #[serde(default)]
    pub paths: PathSettings,
    /// 表示設定
    #[serde(default)]
    pub display: DisplaySettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("attack_config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// デフォルトパスから設定を読み込む、存在しない場合はデフォルト設定を返す
    pub fn load_or_default() -> Self {
        let path = Self::default_path();
        if path.exists() {
            match Self::load(&path) {
                Ok(config) => {
                    println!("[Config] 設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    eprintln!(
                        "[Config] 警告: 設定ファイルの読み込みに失敗しました ({}): {}",
                        path.display(),
                        e
                    );
                    eprintln!("[Config] デフォルト設定を使用します");
                    Self::default()
                }
            }
        } else {
            println!("[Config] 設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 計算デバイスを設定
    pub fn set_device_type(&mut self, device_type: DeviceType) {
        self.device_type = device_type;
    }

    /// 設定情報を表示
    pub fn display(&self) {
        println!("=== 攻撃設定 ===");
        println!("計算デバイス: {}", self.device_type);
        println!("epsilon: {:.6}", self.attack.epsilon);
        println!("学習率: {}", self.attack.learning_rate);
        println!("ステップ数: {}", self.attack.num_steps);
        println!("主分類器: {}", self.models.primary_model_path);
        match self.models.transfer_model_path {
            Some(ref transfer) => println!("転移評価用分類器: {}", transfer),
            None => println!("転移評価用分類器: なし"),
        }
        println!("ラベルマップ: {}", self.paths.label_index_path);
        println!("出力画像: {}", self.paths.output_path);
        println!("================\n");
    }
}

/// リソースファイルのパスを解決する
///
/// 相対パスは実行ファイルのディレクトリを優先し、見つからなければ
/// カレントディレクトリからの相対パスとして扱います。
pub fn resolve_resource_path(path: &str) -> PathBuf {
    let candidate = PathBuf::from(path);
    if candidate.is_absolute() {
        return candidate;
    }

    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        let beside_exe = exe_dir.join(&candidate);
        if beside_exe.exists() {
            return beside_exe;
        }
    }

    candidate
}
