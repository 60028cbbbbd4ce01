// 该文件是 Terra Detect （田鉴） 项目的一部分。
// src/frame.rs - RGB 帧与 letterbox 预处理
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

use image::{RgbImage, imageops::FilterType};

const RGB_CHANNELS: usize = 3;
const LETTERBOX_FILL: f32 = 114.0 / 255.0;

/// 解码后的 RGB 图像，只属于一次检测请求，推理结束后丢弃
#[derive(Debug, Clone)]
pub struct RgbFrame {
  image: RgbImage,
}

impl From<RgbImage> for RgbFrame {
  fn from(image: RgbImage) -> Self {
    Self { image }
  }
}

impl RgbFrame {
  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_image(&self) -> &RgbImage {
    &self.image
  }

  pub fn into_image(self) -> RgbImage {
    self.image
  }

  /// 保持宽高比缩放到 `size × size`，居中并以灰色填充，输出归一化的 NCHW 张量
  pub fn letterbox_nchw(&self, size: u32) -> (Vec<f32>, Letterbox) {
    let (width, height) = self.image.dimensions();
    let letterbox = Letterbox::new(width, height, size);

    let resized = image::imageops::resize(
      &self.image,
      letterbox.resized_width,
      letterbox.resized_height,
      FilterType::Triangle,
    );

    let plane = (size as usize) * (size as usize);
    let mut tensor = vec![LETTERBOX_FILL; RGB_CHANNELS * plane];
    let offset_x = letterbox.pad_x.round() as usize;
    let offset_y = letterbox.pad_y.round() as usize;

    for (w, h, pixel) in resized.enumerate_pixels() {
      let x = w as usize + offset_x;
      let y = h as usize + offset_y;
      if x >= size as usize || y >= size as usize {
        continue;
      }
      for c in 0..RGB_CHANNELS {
        let index = c * plane + y * (size as usize) + x;
        tensor[index] = pixel[c] as f32 / 255.0;
      }
    }

    (tensor, letterbox)
  }
}

/// letterbox 变换参数，用于把模型输入坐标映射回原图像素坐标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  pub scale: f32,
  pub pad_x: f32,
  pub pad_y: f32,
  pub resized_width: u32,
  pub resized_height: u32,
  pub source_width: u32,
  pub source_height: u32,
}

impl Letterbox {
  pub fn new(source_width: u32, source_height: u32, size: u32) -> Self {
    let scale = (size as f32 / source_width.max(1) as f32)
      .min(size as f32 / source_height.max(1) as f32);
    let resized_width = ((source_width as f32 * scale).round() as u32).clamp(1, size);
    let resized_height = ((source_height as f32 * scale).round() as u32).clamp(1, size);

    Self {
      scale,
      pad_x: (size - resized_width) as f32 / 2.0,
      pad_y: (size - resized_height) as f32 / 2.0,
      resized_width,
      resized_height,
      source_width,
      source_height,
    }
  }

  /// 恒等变换，模型输出已经是原图坐标时使用
  pub fn identity(width: u32, height: u32) -> Self {
    Self {
      scale: 1.0,
      pad_x: 0.0,
      pad_y: 0.0,
      resized_width: width,
      resized_height: height,
      source_width: width,
      source_height: height,
    }
  }

  /// 把模型输入坐标系下的 `[x1, y1, x2, y2]` 还原到原图，并裁剪到图像范围内
  pub fn restore(&self, bbox: [f32; 4]) -> [f32; 4] {
    let max_x = self.source_width as f32;
    let max_y = self.source_height as f32;
    [
      ((bbox[0] - self.pad_x) / self.scale).clamp(0.0, max_x),
      ((bbox[1] - self.pad_y) / self.scale).clamp(0.0, max_y),
      ((bbox[2] - self.pad_x) / self.scale).clamp(0.0, max_x),
      ((bbox[3] - self.pad_y) / self.scale).clamp(0.0, max_y),
    ]
  }
}
