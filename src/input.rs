// 该文件是 Terra Detect （田鉴） 项目的一部分。
// src/input.rs - 上传图像与解码
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

use std::io::Cursor;

use image::{ImageFormat, ImageReader, Limits};
use thiserror::Error;
use tracing::debug;

use crate::frame::RgbFrame;

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

/// 单边像素上限，超过即视为损坏输入
pub const MAX_IMAGE_DIMENSION: u32 = 16384;

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("图像数据为空")]
  Empty,
  #[error("不支持的图像格式 (content-type: {0})")]
  UnsupportedFormat(String),
  #[error("图像数据损坏: {0}")]
  Malformed(image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(std::io::Error),
}

impl From<std::io::Error> for DecodeError {
  fn from(err: std::io::Error) -> Self {
    DecodeError::IoError(err)
  }
}

impl From<image::ImageError> for DecodeError {
  fn from(err: image::ImageError) -> Self {
    DecodeError::Malformed(err)
  }
}

/// 无法读取的输入，保留文件名以便在结果中报告
#[derive(Error, Debug)]
#[error("读取 {filename} 失败: {source}")]
pub struct ReadError {
  pub filename: String,
  #[source]
  pub source: std::io::Error,
}

impl ReadError {
  /// 只带文件名的空上传，用于向输出报告该错误
  pub fn placeholder(&self) -> Upload {
    Upload::new(Vec::new()).with_filename(self.filename.clone())
  }
}

/// 一次上传：原始字节、可选文件名与声明的 content type
#[derive(Debug, Clone, Default)]
pub struct Upload {
  pub filename: Option<String>,
  pub content_type: Option<String>,
  pub bytes: Vec<u8>,
}

impl Upload {
  pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
    Self {
      bytes: bytes.into(),
      ..Default::default()
    }
  }

  pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
    self.filename = Some(filename.into());
    self
  }

  pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
    self.content_type = Some(content_type.into());
    self
  }

  /// 日志与错误信息中使用的名称
  pub fn display_name(&self) -> &str {
    self.filename.as_deref().unwrap_or("<unnamed>")
  }

  pub fn decode(&self) -> Result<RgbFrame, DecodeError> {
    decode_image(&self.bytes, self.content_type.as_deref())
  }
}

/// 把上传的字节解码为 RGB 图像
///
/// 优先根据文件头识别格式，识别失败时才参考声明的 content type。
/// 灰度、调色板、RGBA 等颜色模式统一转换为 8 位 RGB，alpha 通道丢弃。
pub fn decode_image(bytes: &[u8], content_type: Option<&str>) -> Result<RgbFrame, DecodeError> {
  if bytes.is_empty() {
    return Err(DecodeError::Empty);
  }

  let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
  if reader.format().is_none() {
    let hinted = content_type
      .map(|mime| mime.split(';').next().unwrap_or(mime).trim())
      .and_then(ImageFormat::from_mime_type);
    match hinted {
      Some(format) => reader.set_format(format),
      None => {
        return Err(DecodeError::UnsupportedFormat(
          content_type.unwrap_or("unknown").to_string(),
        ));
      }
    }
  }

  let mut limits = Limits::default();
  limits.max_image_width = Some(MAX_IMAGE_DIMENSION);
  limits.max_image_height = Some(MAX_IMAGE_DIMENSION);
  reader.limits(limits);

  let format = reader.format();
  let image = reader.decode()?.to_rgb8();
  debug!(
    "图像解码完成: {:?} {}x{}",
    format,
    image.width(),
    image.height()
  );

  Ok(RgbFrame::from(image))
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{DynamicImage, GrayImage, Luma, Rgba, RgbaImage};

  fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format).unwrap();
    buffer.into_inner()
  }

  #[test]
  fn rejects_empty_input() {
    assert!(matches!(decode_image(&[], None), Err(DecodeError::Empty)));
  }

  #[test]
  fn rejects_random_bytes() {
    let result = decode_image(&[0xde, 0xad, 0xbe, 0xef], Some("image/jpeg"));
    assert!(result.is_err());
  }

  #[test]
  fn rejects_unknown_format_without_hint() {
    let result = decode_image(b"definitely not an image", Some("text/plain"));
    assert!(matches!(result, Err(DecodeError::UnsupportedFormat(_))));
  }

  #[test]
  fn rejects_truncated_png() {
    let bytes = encode(
      DynamicImage::ImageRgb8(image::RgbImage::new(32, 32)),
      ImageFormat::Png,
    );
    let result = decode_image(&bytes[..bytes.len() / 2], Some("image/png"));
    assert!(matches!(result, Err(DecodeError::Malformed(_))));
  }

  #[test]
  fn converts_grayscale_to_rgb() {
    let gray = GrayImage::from_pixel(8, 6, Luma([200]));
    let bytes = encode(DynamicImage::ImageLuma8(gray), ImageFormat::Png);
    let frame = decode_image(&bytes, Some("image/png")).unwrap();
    assert_eq!((frame.width(), frame.height()), (8, 6));
    assert_eq!(frame.as_image().get_pixel(0, 0).0, [200, 200, 200]);
  }

  #[test]
  fn drops_alpha_channel() {
    let rgba = RgbaImage::from_pixel(3, 3, Rgba([10, 20, 30, 0]));
    let bytes = encode(DynamicImage::ImageRgba8(rgba), ImageFormat::Png);
    let frame = decode_image(&bytes, None).unwrap();
    assert_eq!(frame.as_image().get_pixel(1, 1).0, [10, 20, 30]);
  }

  #[test]
  fn sniffs_format_despite_wrong_content_type() {
    let bytes = encode(
      DynamicImage::ImageRgb8(image::RgbImage::new(5, 4)),
      ImageFormat::Png,
    );
    let frame = decode_image(&bytes, Some("image/jpeg")).unwrap();
    assert_eq!((frame.width(), frame.height()), (5, 4));
  }
}
