// 该文件是 Terra Detect （田鉴） 项目的一部分。
// src/detection.rs - 检测结果与汇总
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

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{LabelMap, RawDetections};

/// 类别索引不在标签表中，说明标签文件与模型不匹配
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("类别索引 {class_id} 不在标签表中（共 {known} 个类别）")]
pub struct InvalidClassIndex {
  pub class_id: u32,
  pub known: usize,
}

/// 对外可见的单个检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  #[serde(rename = "class")]
  pub class_name: String,
  pub confidence: f32,
  pub bbox: [f32; 4], // [x1, y1, x2, y2]
}

/// 把模型原始输出逐个映射为 `Detection`，保持模型输出顺序，不做过滤
pub fn normalize(raw: &RawDetections, labels: &LabelMap) -> Result<Vec<Detection>, InvalidClassIndex> {
  raw
    .items
    .iter()
    .map(|item| {
      let class_name = labels.get(item.class_id).ok_or(InvalidClassIndex {
        class_id: item.class_id,
        known: labels.len(),
      })?;
      Ok(Detection {
        class_name: class_name.to_string(),
        confidence: item.score.clamp(0.0, 1.0),
        bbox: item.bbox,
      })
    })
    .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSummary {
  pub total_detections: usize,
  /// 去重后的病害类别，顺序无意义
  pub disease_types: BTreeSet<String>,
  pub max_confidence: f32,
  pub healthy: bool,
}

impl DetectionSummary {
  pub fn from_detections(detections: &[Detection]) -> Self {
    let disease_types = detections.iter().map(|d| d.class_name.clone()).collect();
    let max_confidence = detections
      .iter()
      .map(|d| d.confidence)
      .fold(0.0f32, f32::max);

    Self {
      total_detections: detections.len(),
      disease_types,
      max_confidence,
      healthy: detections.is_empty(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
  pub width: u32,
  pub height: u32,
}

/// 单张图像的完整检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
  pub detected: bool,
  pub diseases: Vec<Detection>,
  pub summary: DetectionSummary,
  pub image_size: ImageSize,
}

impl DetectionResult {
  pub fn new(diseases: Vec<Detection>, image_size: ImageSize) -> Self {
    let summary = DetectionSummary::from_detections(&diseases);
    Self {
      detected: !diseases.is_empty(),
      diseases,
      summary,
      image_size,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::RawDetection;

  fn detection(class_name: &str, confidence: f32) -> Detection {
    Detection {
      class_name: class_name.to_string(),
      confidence,
      bbox: [0.0, 0.0, 1.0, 1.0],
    }
  }

  #[test]
  fn normalize_resolves_names_in_model_order() {
    let labels: LabelMap = ["early_blight", "late_blight"].into_iter().collect();
    let raw = RawDetections::from(vec![
      RawDetection {
        class_id: 1,
        score: 0.4,
        bbox: [1.0, 2.0, 3.0, 4.0],
      },
      RawDetection {
        class_id: 0,
        score: 0.8,
        bbox: [5.0, 6.0, 7.0, 8.0],
      },
    ]);

    let detections = normalize(&raw, &labels).unwrap();
    assert_eq!(detections[0].class_name, "late_blight");
    assert_eq!(detections[0].bbox, [1.0, 2.0, 3.0, 4.0]);
    assert_eq!(detections[1].class_name, "early_blight");
    assert_eq!(detections[1].confidence, 0.8);
  }

  #[test]
  fn normalize_fails_on_unknown_class() {
    let labels: LabelMap = ["rust"].into_iter().collect();
    let raw = RawDetections::from(vec![
      RawDetection {
        class_id: 0,
        score: 0.9,
        bbox: [0.0, 0.0, 1.0, 1.0],
      },
      RawDetection {
        class_id: 7,
        score: 0.5,
        bbox: [0.0, 0.0, 1.0, 1.0],
      },
    ]);

    assert_eq!(
      normalize(&raw, &labels),
      Err(InvalidClassIndex {
        class_id: 7,
        known: 1
      })
    );
  }

  #[test]
  fn empty_summary_is_healthy() {
    let summary = DetectionSummary::from_detections(&[]);
    assert_eq!(summary.total_detections, 0);
    assert!(summary.disease_types.is_empty());
    assert_eq!(summary.max_confidence, 0.0);
    assert!(summary.healthy);
  }

  #[test]
  fn summary_collapses_duplicate_classes() {
    let summary = DetectionSummary::from_detections(&[
      detection("leaf_spot", 0.3),
      detection("late_blight", 0.95),
      detection("leaf_spot", 0.6),
    ]);
    assert_eq!(summary.total_detections, 3);
    assert_eq!(
      summary.disease_types.iter().collect::<Vec<_>>(),
      vec!["late_blight", "leaf_spot"]
    );
    assert_eq!(summary.max_confidence, 0.95);
    assert!(!summary.healthy);
  }

  #[test]
  fn result_serializes_to_wire_shape() {
    let result = DetectionResult::new(
      vec![detection("late_blight", 0.5)],
      ImageSize {
        width: 640,
        height: 480,
      },
    );
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["detected"], true);
    assert_eq!(json["diseases"][0]["class"], "late_blight");
    assert_eq!(json["diseases"][0]["confidence"], 0.5);
    assert_eq!(json["diseases"][0]["bbox"].as_array().unwrap().len(), 4);
    assert_eq!(json["summary"]["total_detections"], 1);
    assert_eq!(json["summary"]["disease_types"][0], "late_blight");
    assert_eq!(json["summary"]["healthy"], false);
    assert_eq!(json["image_size"]["width"], 640);
    assert_eq!(json["image_size"]["height"], 480);
  }
}
