// 该文件是 Terra Detect （田鉴） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
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

use crate::model::RawDetection;

pub const DEFAULT_MAX_DETECTIONS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NmsOptions {
  /// 为 true 时不同类别之间也相互抑制
  pub agnostic: bool,
  /// 保留框数量上限
  pub max_detections: usize,
}

impl Default for NmsOptions {
  fn default() -> Self {
    Self {
      agnostic: false,
      max_detections: DEFAULT_MAX_DETECTIONS,
    }
  }
}

/// 计算两个 `[x1, y1, x2, y2]` 边界框的 IoU
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 贪心 NMS：按置信度降序依次保留，与已保留框 IoU 不低于阈值的候选框被抑制
pub fn non_max_suppression(
  mut candidates: Vec<RawDetection>,
  iou_threshold: f32,
  options: &NmsOptions,
) -> Vec<RawDetection> {
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<RawDetection> = Vec::new();
  for candidate in candidates {
    if kept.len() >= options.max_detections {
      break;
    }

    let suppressed = kept.iter().any(|best| {
      (options.agnostic || best.class_id == candidate.class_id)
        && iou(&best.bbox, &candidate.bbox) >= iou_threshold
    });

    if !suppressed {
      kept.push(candidate);
    }
  }

  kept
}
