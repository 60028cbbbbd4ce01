// 该文件是 Terra Detect （田鉴） 项目的一部分。
// src/config.rs - 检测器配置
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

use clap::Args;
use thiserror::Error;
use url::Url;

use crate::model::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_IOU_THRESHOLD, Thresholds};

pub const DEFAULT_MODEL_LOCATION: &str = "onnx:models/best.onnx";
const MODEL_DEFAULT_SCHEME: &str = "onnx";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("阈值 {name} = {value} 超出范围 [0, 1]")]
  ThresholdOutOfRange { name: &'static str, value: f32 },
  #[error("模型位置无效 '{0}': {1}")]
  InvalidModelLocation(String, url::ParseError),
}

/// 启动时确定的检测配置
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
  pub model: Url,
  pub thresholds: Thresholds,
}

impl DetectorConfig {
  pub fn new(model: Url) -> Self {
    Self {
      model,
      thresholds: Thresholds::default(),
    }
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    check_threshold("confidence", self.thresholds.confidence)?;
    check_threshold("iou", self.thresholds.iou)?;
    Ok(())
  }
}

fn check_threshold(name: &'static str, value: f32) -> Result<(), ConfigError> {
  if value.is_finite() && (0.0..=1.0).contains(&value) {
    Ok(())
  } else {
    Err(ConfigError::ThresholdOutOfRange { name, value })
  }
}

/// 解析资源位置：完整 URL 原样使用，裸文件路径加上默认方案
pub fn parse_location(location: &str, default_scheme: &str) -> Result<Url, url::ParseError> {
  // Windows 盘符会被误认为单字母方案
  match Url::parse(location) {
    Ok(url) if url.scheme().len() > 1 => Ok(url),
    Ok(_) | Err(url::ParseError::RelativeUrlWithoutBase) => {
      let encoded = location
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
      Url::parse(&format!("{}:{}", default_scheme, encoded))
    }
    Err(err) => Err(err),
  }
}

/// 解析模型位置，裸文件路径视为 `onnx:<path>`
pub fn parse_model_location(location: &str) -> Result<Url, ConfigError> {
  parse_location(location, MODEL_DEFAULT_SCHEME)
    .map_err(|err| ConfigError::InvalidModelLocation(location.to_string(), err))
}

/// 检测器命令行参数，可通过 `#[command(flatten)]` 嵌入各个程序
#[derive(Args, Debug, Clone)]
pub struct DetectorArgs {
  /// 模型位置，URL（如 onnx:///models/best.onnx?labels=labels.json）或 ONNX 文件路径
  #[arg(long, env = "TERRA_MODEL", default_value = DEFAULT_MODEL_LOCATION, value_name = "MODEL")]
  pub model: String,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, env = "TERRA_CONFIDENCE", default_value_t = DEFAULT_CONFIDENCE_THRESHOLD, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IoU 阈值 (0.0 - 1.0)
  #[arg(long, env = "TERRA_IOU", default_value_t = DEFAULT_IOU_THRESHOLD, value_name = "THRESHOLD")]
  pub iou: f32,
}

impl DetectorArgs {
  pub fn into_config(self) -> Result<DetectorConfig, ConfigError> {
    let config = DetectorConfig {
      model: parse_model_location(&self.model)?,
      thresholds: Thresholds {
        confidence: self.confidence,
        iou: self.iou,
      },
    };
    config.validate()?;
    Ok(config)
  }
}
