//! 標的型敵対的攻撃のコマンドラインエントリポイント

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use targeted_adversary_lib::attack::{
    exit_code_for, AttackDriver, AttackReport, AttackRequest, EXIT_FAILURE, EXIT_SUCCESS,
    EXIT_UNKNOWN_TARGET,
};
use targeted_adversary_lib::model::{AppConfig, DeviceType};

#[derive(Parser)]
#[command(name = "targeted_adversary")]
#[command(about = "Targeted adversarial perturbation against a pretrained ImageNet classifier", long_about = None)]
struct Cli {
    /// 入力画像
    file_in: PathBuf,
    /// ターゲットクラス名（例: golf_ball）
    target_class: String,
    /// 設定ファイル（省略時は attack_config.json、なければ既定値）
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    println!("=== Targeted Adversarial Attack ===\n");

    let config = match cli.config {
        Some(ref path) => match AppConfig::load(path) {
            Ok(config) => {
                println!("[Config] 設定ファイルを読み込みました: {}", path.display());
                config
            }
            Err(e) => {
                eprintln!("[Config] エラー: 設定ファイルを読み込めません ({}): {}", path.display(), e);
                return ExitCode::from(EXIT_FAILURE);
            }
        },
        None => AppConfig::load_or_default(),
    };
    config.display();

    let request = AttackRequest {
        image_path: cli.file_in,
        target_class: cli.target_class,
    };

    match run(config, &request) {
        Ok(report) => {
            print_summary(&report);
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            let code = exit_code_for(&e);
            if code == EXIT_UNKNOWN_TARGET {
                eprintln!("{}", e);
            } else {
                eprintln!("[Attack] エラー: {:#}", e);
            }
            ExitCode::from(code)
        }
    }
}

fn run(config: AppConfig, request: &AttackRequest) -> anyhow::Result<AttackReport> {
    match config.device_type {
        DeviceType::Cpu => {
            use burn::backend::{Autodiff, NdArray};
            println!("[Device] CPU (NdArray) バックエンドを使用します");
            AttackDriver::new(config).run::<Autodiff<NdArray>>(request, &Default::default())
        }
        #[cfg(feature = "wgpu")]
        DeviceType::Wgpu => {
            use burn::backend::Autodiff;
            use burn_wgpu::{Wgpu, WgpuDevice};
            println!("[Device] WGPU (GPU) バックエンドを使用します");
            AttackDriver::new(config).run::<Autodiff<Wgpu>>(request, &WgpuDevice::default())
        }
        #[cfg(not(feature = "wgpu"))]
        DeviceType::Wgpu => {
            use burn::backend::{Autodiff, NdArray};
            eprintln!("[Device] 警告: wgpuフィーチャが無効のためCPUで実行します");
            AttackDriver::new(config).run::<Autodiff<NdArray>>(request, &Default::default())
        }
    }
}

fn print_summary(report: &AttackReport) {
    println!("\n=== 結果 ===");
    println!("元クラス: {}", report.original_index);
    println!("ターゲットクラス: {}", report.target_index);
    println!("攻撃成功: {}", if report.success { "はい" } else { "いいえ" });
    if let Some(ref transfer) = report.transfer {
        println!(
            "転移 ({}): ターゲット到達={}, 元クラス維持={}",
            transfer.model_name, transfer.target_hit, transfer.original_retained
        );
    }
    println!("出力画像: {}", report.output_path.display());
}
