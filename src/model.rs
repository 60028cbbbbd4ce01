// 该文件是 Terra Detect （田鉴） 项目的一部分。
// src/model.rs - 检测模型
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

use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::frame::RgbFrame;

mod labels;
pub mod nms;
pub mod postprocess;
#[cfg(feature = "model_onnx")]
mod yolo;

pub use self::labels::{LabelError, LabelMap};
#[cfg(feature = "model_onnx")]
pub use self::yolo::{YoloOnnx, YoloOnnxBuilder};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// 推理阈值，原样传入模型，不做任何替换
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
  /// 最低置信度，低于该值的候选框被丢弃
  pub confidence: f32,
  /// NMS IoU 阈值，重叠度不低于该值时抑制置信度较低的框
  pub iou: f32,
}

impl Default for Thresholds {
  fn default() -> Self {
    Self {
      confidence: DEFAULT_CONFIDENCE_THRESHOLD,
      iou: DEFAULT_IOU_THRESHOLD,
    }
  }
}

/// 模型输出的单个目标，坐标为输入图像像素
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDetections {
  pub items: Box<[RawDetection]>,
}

impl RawDetections {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  /// 检查每个分数都是有限正数，超过 1 的分数由归一化阶段截断
  pub fn check_scores(&self) -> Result<(), ModelError> {
    match self.items.iter().position(|item| !(item.score.is_finite() && item.score > 0.0)) {
      Some(index) => Err(ModelError::InvalidOutput(format!(
        "第 {} 个检测框的分数无效: {}",
        index, self.items[index].score
      ))),
      None => Ok(()),
    }
  }
}

impl From<Vec<RawDetection>> for RawDetections {
  fn from(items: Vec<RawDetection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("标签错误: {0}")]
  LabelError(#[from] LabelError),
  #[error("推理输出无效: {0}")]
  InvalidOutput(String),
  #[error("推理会话不可用")]
  SessionPoisoned,
  #[cfg(feature = "model_onnx")]
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
}

impl From<std::io::Error> for ModelError {
  fn from(err: std::io::Error) -> Self {
    ModelError::ModelLoadError(err)
  }
}

/// 预训练检测模型的能力接口
///
/// 实现必须可以被多个请求并发调用；若底层引擎不支持并发，
/// 由实现自行在模型内部加锁串行化。返回的分数必须是有限正数，
/// 否则整张图像按推理失败处理。
pub trait Model: Send + Sync {
  fn infer(&self, frame: &RgbFrame, thresholds: &Thresholds) -> Result<RawDetections, ModelError>;

  /// 模型固定的类别索引到名称的映射
  fn labels(&self) -> &LabelMap;
}

/// 根据 URL 方案加载模型
pub fn load_model(url: &Url) -> Result<Arc<dyn Model>, ModelError> {
  #[cfg(feature = "model_onnx")]
  {
    use crate::{FromUrl, FromUrlWithScheme};

    if url.scheme() == YoloOnnxBuilder::SCHEME {
      let model = YoloOnnxBuilder::from_url(url)?.build()?;
      return Ok(Arc::new(model));
    }
  }

  Err(ModelError::ModelPathError(format!(
    "不支持的模型方案 '{}'",
    url.scheme()
  )))
}
