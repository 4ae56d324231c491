//! 事前学習済みImageNet分類器に対する標的型の敵対的摂動攻撃
//!
//! - `ml`: 分類器（ResNet50 / MobileNetV2）、前処理、摂動の最適化
//! - `model`: 分類器アーカイブ、ラベルデコーダ、設定
//! - `attack`: 攻撃全体のドライバ
//! - `transfer`: 別構造の分類器での転移評価

pub mod types;
pub mod label_index;
pub mod model;
pub mod ml;
pub mod attack;
pub mod transfer;
pub mod display;
#[cfg(feature = "pytorch")]
pub mod import;

pub use attack::{AttackDriver, AttackError, AttackReport, AttackRequest};
pub use label_index::LabelIndex;
pub use transfer::{evaluate_transfer, TransferReport};
pub use types::Prediction;
