// 该文件是 Terra Detect （田鉴） 项目的一部分。
// src/service.rs - 检测服务
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

use std::{sync::Arc, time::Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::DetectorConfig,
  detection::{DetectionResult, ImageSize, InvalidClassIndex, normalize},
  input::{DecodeError, Upload},
  model::{LabelMap, Model, ModelError, Thresholds, load_model},
};

pub const SERVICE_NAME: &str = "Terra Detect Plant Disease Detection";

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("模型不可用: {0}")]
  ModelUnavailable(String),
  #[error("图像解码失败: {0}")]
  Decode(#[from] DecodeError),
  #[error("标签与模型不匹配: {0}")]
  InvalidClassIndex(#[from] InvalidClassIndex),
  #[error("推理失败: {0}")]
  Inference(#[from] ModelError),
}

/// 进程内的模型状态，启动时确定，之后只读
enum ModelState {
  Loaded(Arc<dyn Model>),
  Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
  pub status: String,
  pub model_loaded: bool,
  /// 按类别索引排列的类别名称，未加载模型时为 null
  pub classes: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
  pub service: String,
  pub status: String,
  pub model_loaded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchOutcome {
  Result(DetectionResult),
  Error(String),
}

/// 批量检测中单个文件的结果，序列化为 `{filename, result}` 或 `{filename, error}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemResult {
  pub filename: Option<String>,
  #[serde(flatten)]
  pub outcome: BatchOutcome,
}

impl BatchItemResult {
  pub fn result(&self) -> Option<&DetectionResult> {
    match &self.outcome {
      BatchOutcome::Result(result) => Some(result),
      BatchOutcome::Error(_) => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match &self.outcome {
      BatchOutcome::Result(_) => None,
      BatchOutcome::Error(message) => Some(message),
    }
  }
}

/// 解码、推理、归一化与汇总的完整流水线
///
/// 服务在多个请求之间共享（通常放在 `Arc` 中），本身不保存任何请求状态。
pub struct DetectionService {
  model: ModelState,
  thresholds: Thresholds,
}

impl DetectionService {
  pub fn new(model: Arc<dyn Model>, thresholds: Thresholds) -> Self {
    Self {
      model: ModelState::Loaded(model),
      thresholds,
    }
  }

  pub fn unavailable(reason: impl Into<String>, thresholds: Thresholds) -> Self {
    Self {
      model: ModelState::Unavailable(reason.into()),
      thresholds,
    }
  }

  /// 按配置加载模型；加载失败时服务仍然可用，只是所有检测请求返回模型不可用
  pub fn load(config: &DetectorConfig) -> Self {
    info!("加载检测模型: {}", config.model);
    match load_model(&config.model) {
      Ok(model) => {
        info!("检测模型已就绪");
        Self::new(model, config.thresholds)
      }
      Err(err) => {
        error!("模型加载失败: {}", err);
        Self::unavailable(err.to_string(), config.thresholds)
      }
    }
  }

  pub fn is_model_loaded(&self) -> bool {
    matches!(self.model, ModelState::Loaded(_))
  }

  pub fn thresholds(&self) -> &Thresholds {
    &self.thresholds
  }

  pub fn labels(&self) -> Option<&LabelMap> {
    match &self.model {
      ModelState::Loaded(model) => Some(model.labels()),
      ModelState::Unavailable(_) => None,
    }
  }

  pub fn health(&self) -> HealthReport {
    HealthReport {
      status: "healthy".to_string(),
      model_loaded: self.is_model_loaded(),
      classes: self.labels().map(LabelMap::names),
    }
  }

  pub fn info(&self) -> ServiceInfo {
    ServiceInfo {
      service: SERVICE_NAME.to_string(),
      status: "running".to_string(),
      model_loaded: self.is_model_loaded(),
    }
  }

  fn model(&self) -> Result<&Arc<dyn Model>, DetectError> {
    match &self.model {
      ModelState::Loaded(model) => Ok(model),
      ModelState::Unavailable(reason) => Err(DetectError::ModelUnavailable(reason.clone())),
    }
  }

  /// 检测单张图像
  pub fn detect(&self, upload: &Upload) -> Result<DetectionResult, DetectError> {
    let model = self.model()?;
    self.run_pipeline(model.as_ref(), upload)
  }

  fn run_pipeline(&self, model: &dyn Model, upload: &Upload) -> Result<DetectionResult, DetectError> {
    let started = Instant::now();
    let frame = upload.decode()?;
    let image_size = ImageSize {
      width: frame.width(),
      height: frame.height(),
    };

    let raw = model.infer(&frame, &self.thresholds)?;
    raw.check_scores()?;
    let diseases = normalize(&raw, model.labels()).inspect_err(|err| {
      error!(
        "标签文件与模型不匹配 ({}): {}",
        upload.display_name(),
        err
      )
    })?;

    let result = DetectionResult::new(diseases, image_size);
    debug!(
      "{}: {}x{}, 检测到 {} 个目标, 耗时 {:.2?}",
      upload.display_name(),
      image_size.width,
      image_size.height,
      result.summary.total_detections,
      started.elapsed()
    );
    Ok(result)
  }

  /// 批量检测，结果与输入一一对应且顺序一致
  ///
  /// 模型不可用时整个批次失败；单个文件的失败只记录在对应条目中。
  pub fn detect_batch(&self, uploads: &[Upload]) -> Result<Vec<BatchItemResult>, DetectError> {
    let model = self.model()?;
    info!("开始批量检测, 共 {} 个文件", uploads.len());

    let results: Vec<BatchItemResult> = uploads
      .iter()
      .map(|upload| {
        let outcome = match self.run_pipeline(model.as_ref(), upload) {
          Ok(result) => BatchOutcome::Result(result),
          Err(err) => {
            warn!("文件 {} 检测失败: {}", upload.display_name(), err);
            BatchOutcome::Error(err.to_string())
          }
        };
        BatchItemResult {
          filename: upload.filename.clone(),
          outcome,
        }
      })
      .collect();

    let failed = results.iter().filter(|item| item.error().is_some()).count();
    info!(
      "批量检测完成: 成功 {}, 失败 {}",
      results.len() - failed,
      failed
    );
    Ok(results)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detection::{Detection, DetectionSummary};

  fn sample_result() -> DetectionResult {
    DetectionResult::new(
      vec![Detection {
        class_name: "leaf_spot".to_string(),
        confidence: 0.5,
        bbox: [1.0, 2.0, 3.0, 4.0],
      }],
      ImageSize {
        width: 8,
        height: 8,
      },
    )
  }

  #[test]
  fn batch_item_flattens_outcome() {
    let ok = BatchItemResult {
      filename: Some("a.jpg".to_string()),
      outcome: BatchOutcome::Result(sample_result()),
    };
    let json = serde_json::to_value(&ok).unwrap();
    assert_eq!(json["filename"], "a.jpg");
    assert_eq!(json["result"]["detected"], true);
    assert!(json.get("error").is_none());

    let failed = BatchItemResult {
      filename: None,
      outcome: BatchOutcome::Error("图像数据为空".to_string()),
    };
    let json = serde_json::to_value(&failed).unwrap();
    assert!(json["filename"].is_null());
    assert_eq!(json["error"], "图像数据为空");
    assert!(json.get("result").is_none());
  }

  #[test]
  fn batch_item_accessors() {
    let ok = BatchItemResult {
      filename: None,
      outcome: BatchOutcome::Result(sample_result()),
    };
    assert_eq!(
      ok.result().map(|r| &r.summary),
      Some(&DetectionSummary::from_detections(&sample_result().diseases))
    );
    assert_eq!(ok.error(), None);
  }

  #[test]
  fn unavailable_service_reports_health() {
    let service = DetectionService::unavailable("找不到模型文件", Thresholds::default());
    assert!(!service.is_model_loaded());

    let health = service.health();
    assert_eq!(health.status, "healthy");
    assert!(!health.model_loaded);
    assert_eq!(health.classes, None);

    let info = service.info();
    assert_eq!(info.status, "running");
    assert!(!info.model_loaded);
  }

  #[test]
  fn unavailable_service_rejects_requests() {
    let service = DetectionService::unavailable("找不到模型文件", Thresholds::default());
    let upload = Upload::new(vec![1, 2, 3]).with_filename("x.jpg");

    assert!(matches!(
      service.detect(&upload),
      Err(DetectError::ModelUnavailable(reason)) if reason == "找不到模型文件"
    ));
    assert!(matches!(
      service.detect_batch(&[upload]),
      Err(DetectError::ModelUnavailable(_))
    ));
  }

  #[test]
  fn load_failure_keeps_service_up() {
    let config = DetectorConfig {
      model: url::Url::parse("bogus:///nowhere.bin").unwrap(),
      thresholds: Thresholds::default(),
    };
    let service = DetectionService::load(&config);
    assert!(!service.is_model_loaded());
    assert_eq!(service.thresholds(), &Thresholds::default());
  }
}
