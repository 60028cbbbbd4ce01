// 该文件是 Terra Detect （田鉴） 项目的一部分。
// src/output/save_image_file.rs - 保存标注后的图像文件
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  path::{Path, PathBuf},
  sync::atomic::{AtomicUsize, Ordering},
};

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  detection::{Detection, DetectionResult},
  input::{DecodeError, Upload},
  output::Render,
};

const BOX_THICKNESS: i32 = 2;

// 按类别名称取色
const PALETTE: [[u8; 3]; 6] = [
  [255, 56, 56],
  [255, 157, 151],
  [255, 112, 31],
  [255, 178, 29],
  [207, 210, 49],
  [72, 249, 10],
];

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(image::ImageError),
  #[error("图像解码错误: {0}")]
  DecodeError(#[from] DecodeError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 把检测框画到原图上，保存为 `<目录>/<文件名>-detect.png`
pub struct SaveImageFileOutput {
  directory: PathBuf,
  unnamed_counter: AtomicUsize,
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let path = urlencoding::decode(uri.path())
      .map(|p| p.into_owned())
      .unwrap_or_else(|_| uri.path().to_string());
    Ok(SaveImageFileOutput {
      directory: PathBuf::from(path),
      unnamed_counter: AtomicUsize::new(0),
    })
  }
}

fn class_color(class_name: &str) -> Rgb<u8> {
  let hash = class_name
    .bytes()
    .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
  Rgb(PALETTE[hash % PALETTE.len()])
}

/// 在图像上绘制检测框，超出图像的部分由 imageproc 裁剪
pub fn draw_detections(image: &mut RgbImage, detections: &[Detection]) {
  for detection in detections {
    let [x1, y1, x2, y2] = detection.bbox;
    let color = class_color(&detection.class_name);
    for t in 0..BOX_THICKNESS {
      let left = x1.floor() as i32 + t;
      let top = y1.floor() as i32 + t;
      let width = (x2.ceil() - x1.floor()) as i32 - 2 * t;
      let height = (y2.ceil() - y1.floor()) as i32 - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(left, top).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }
  }
}

impl SaveImageFileOutput {
  fn output_path(&self, input: &Upload) -> PathBuf {
    let stem = input
      .filename
      .as_deref()
      .and_then(|name| Path::new(name).file_stem())
      .map(|stem| stem.to_string_lossy().into_owned())
      .unwrap_or_else(|| {
        format!(
          "upload-{:04}",
          self.unnamed_counter.fetch_add(1, Ordering::Relaxed)
        )
      });
    self.directory.join(format!("{}-detect.png", stem))
  }

  fn save_image(&self, path: &Path, image: &RgbImage) -> Result<(), SaveImageFileError> {
    std::fs::create_dir_all(&self.directory).map_err(SaveImageFileError::IoError)?;
    image.save(path).map_err(SaveImageFileError::ImageError)?;
    info!("保存标注图像到文件: {}", path.display());
    Ok(())
  }
}

impl Render<Upload, DetectionResult> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, input: &Upload, result: &DetectionResult) -> Result<(), Self::Error> {
    let mut image = input.decode()?.into_image();
    draw_detections(&mut image, &result.diseases);
    let path = self.output_path(input);
    self.save_image(&path, &image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detection::ImageSize;
  use image::ImageFormat;
  use std::io::Cursor;

  fn png_upload(name: &str, width: u32, height: u32) -> Upload {
    let image = RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png).unwrap();
    Upload::new(bytes.into_inner()).with_filename(name)
  }

  #[test]
  fn draws_box_outline() {
    let mut image = RgbImage::from_pixel(20, 20, Rgb([0, 0, 0]));
    let detection = Detection {
      class_name: "leaf_spot".to_string(),
      confidence: 0.9,
      bbox: [2.0, 3.0, 12.0, 15.0],
    };
    draw_detections(&mut image, std::slice::from_ref(&detection));

    let color = class_color("leaf_spot");
    assert_eq!(*image.get_pixel(2, 3), color);
    assert_eq!(*image.get_pixel(3, 4), color);
    assert_eq!(*image.get_pixel(7, 9), Rgb([0, 0, 0]));
  }

  #[test]
  fn saves_annotated_copy_next_to_stem() {
    let directory = std::env::temp_dir().join(format!("terra-detect-image-{}", std::process::id()));
    let url = Url::parse(&format!("image://{}", directory.display())).unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();

    let upload = png_upload("photos/tomato.jpg", 16, 16);
    let result = DetectionResult::new(
      vec![Detection {
        class_name: "late_blight".to_string(),
        confidence: 0.8,
        bbox: [1.0, 1.0, 8.0, 8.0],
      }],
      ImageSize {
        width: 16,
        height: 16,
      },
    );
    output.render_result(&upload, &result).unwrap();

    let saved = directory.join("tomato-detect.png");
    let image = image::open(&saved).unwrap().to_rgb8();
    assert_eq!(image.dimensions(), (16, 16));
    assert_eq!(*image.get_pixel(1, 1), class_color("late_blight"));

    std::fs::remove_dir_all(&directory).unwrap();
  }
}
