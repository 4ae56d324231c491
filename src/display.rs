//! 敵対的画像の表示
//!
//! `display` フィーチャ有効時はOpenCV (highgui) で上位予測を重ねて表示し、
//! キー入力があるまでブロックします。

use anyhow::Result;
use image::RgbImage;

use crate::types::Prediction;

/// オーバーレイに描く文字列: "ラベル: 信頼度%"
pub fn overlay_caption(prediction: &Prediction) -> String {
    format!("{}: {:.2}%", prediction.label, prediction.confidence * 100.0)
}

/// RGB画素列をOpenCVの表示順（BGR）に並べ替える
pub fn rgb_to_bgr_bytes(img: &RgbImage) -> Vec<u8> {
    img.pixels()
        .flat_map(|pixel| [pixel[2], pixel[1], pixel[0]])
        .collect()
}

/// 画像にキャプションを重ねて表示し、キー入力を待つ
#[cfg(feature = "display")]
pub fn show_with_caption(img: &RgbImage, caption: &str, window_name: &str) -> Result<()> {
    use opencv::{
        core::{self, Mat, Point, Scalar},
        highgui, imgproc,
        prelude::*,
    };

    let (width, height) = img.dimensions();
    let mut frame = Mat::new_rows_cols_with_default(
        height as i32,
        width as i32,
        core::CV_8UC3,
        Scalar::all(0.0),
    )?;
    frame.data_bytes_mut()?.copy_from_slice(&rgb_to_bgr_bytes(img));

    imgproc::put_text(
        &mut frame,
        caption,
        Point::new(3, 20),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.5,
        Scalar::new(0.0, 255.0, 0.0, 0.0), // Green (BGR)
        2,
        imgproc::LINE_8,
        false,
    )?;

    println!("[Display] ウィンドウを閉じるには任意のキーを押してください");
    highgui::imshow(window_name, &frame)?;
    highgui::wait_key(0)?;
    highgui::destroy_window(window_name)?;
    Ok(())
}

/// `display` フィーチャ無効時はキャプションのみ表示する
#[cfg(not(feature = "display"))]
pub fn show_with_caption(_img: &RgbImage, caption: &str, _window_name: &str) -> Result<()> {
    println!(
        "[Display] displayフィーチャが無効のためウィンドウ表示を省略します ({})",
        caption
    );
    Ok(())
}
