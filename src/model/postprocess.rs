// 该文件是 Terra Detect （田鉴） 项目的一部分。
// src/model/postprocess.rs - YOLO 输出后处理
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

use tracing::debug;

use crate::{
  frame::Letterbox,
  model::{
    ModelError, RawDetection, RawDetections, Thresholds,
    nms::{NmsOptions, non_max_suppression},
  },
};

const BOX_FEATURES: usize = 4;

/// 输出张量布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
  /// `[features, anchors]`，导出模型的默认布局
  FeaturesFirst { features: usize, anchors: usize },
  /// `[anchors, features]`
  AnchorsFirst { features: usize, anchors: usize },
}

impl Layout {
  /// 已知类别数时按 `4+nc` 所在的维度确定布局，否则假定锚点数量多于特征数量
  fn from_shape(shape: &[usize], classes: Option<usize>) -> Result<Self, ModelError> {
    let dims = match shape {
      [1, a, b] | [a, b] => (*a, *b),
      _ => {
        return Err(ModelError::InvalidOutput(format!(
          "期望输出形状 [1, 4+nc, N] 或 [1, N, 4+nc], 实际为 {:?}",
          shape
        )));
      }
    };

    let expected = classes.map(|nc| nc + BOX_FEATURES);
    let features_first = match expected {
      Some(features) if dims.0 == features => true,
      Some(features) if dims.1 == features => false,
      _ => {
        if let Some(features) = expected {
          debug!("输出形状 {:?} 与类别数 {} 不符，按维度大小推断布局", shape, features - BOX_FEATURES);
        }
        dims.0 <= dims.1
      }
    };

    let layout = if features_first {
      Layout::FeaturesFirst {
        features: dims.0,
        anchors: dims.1,
      }
    } else {
      Layout::AnchorsFirst {
        features: dims.1,
        anchors: dims.0,
      }
    };

    if layout.features() <= BOX_FEATURES {
      return Err(ModelError::InvalidOutput(format!(
        "输出特征数 {} 不足以包含边界框与类别分数",
        layout.features()
      )));
    }
    Ok(layout)
  }

  fn features(&self) -> usize {
    match *self {
      Layout::FeaturesFirst { features, .. } | Layout::AnchorsFirst { features, .. } => features,
    }
  }

  fn anchors(&self) -> usize {
    match *self {
      Layout::FeaturesFirst { anchors, .. } | Layout::AnchorsFirst { anchors, .. } => anchors,
    }
  }

  fn at(&self, data: &[f32], anchor: usize, feature: usize) -> f32 {
    match *self {
      Layout::FeaturesFirst { anchors, .. } => data[feature * anchors + anchor],
      Layout::AnchorsFirst { features, .. } => data[anchor * features + feature],
    }
  }
}

/// 把 YOLO 检测头输出解码为原图坐标下的检测框
///
/// `classes` 为标签表中的类别数，用于确定张量布局。
/// 每个锚点取最高类别分数，低于置信度阈值的丢弃；`cx, cy, w, h` 转为
/// `x1, y1, x2, y2` 后撤销 letterbox 并裁剪到图像范围，退化框丢弃；最后执行 NMS。
pub fn decode_yolo_output(
  data: &[f32],
  shape: &[usize],
  classes: Option<usize>,
  letterbox: &Letterbox,
  thresholds: &Thresholds,
  options: &NmsOptions,
) -> Result<RawDetections, ModelError> {
  let layout = Layout::from_shape(shape, classes)?;
  let (features, anchors) = (layout.features(), layout.anchors());
  if data.len() != features * anchors {
    return Err(ModelError::InvalidOutput(format!(
      "输出长度 {} 与形状 {:?} 不一致",
      data.len(),
      shape
    )));
  }

  let mut candidates = Vec::new();
  for anchor in 0..anchors {
    let (class_id, score) = (BOX_FEATURES..features)
      .map(|feature| (feature - BOX_FEATURES, layout.at(data, anchor, feature)))
      .fold((0usize, f32::MIN), |best, current| {
        if current.1 > best.1 { current } else { best }
      });

    // NaN 分数也在这里被过滤；阈值为 0 时零分锚点同样不算检测
    if !(score >= thresholds.confidence && score > 0.0) {
      continue;
    }

    let cx = layout.at(data, anchor, 0);
    let cy = layout.at(data, anchor, 1);
    let w = layout.at(data, anchor, 2);
    let h = layout.at(data, anchor, 3);

    let bbox = letterbox.restore([cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]);
    if !(bbox[0] < bbox[2] && bbox[1] < bbox[3]) {
      continue;
    }

    candidates.push(RawDetection {
      class_id: class_id as u32,
      score: score.clamp(0.0, 1.0),
      bbox,
    });
  }

  let before_nms = candidates.len();
  let kept = non_max_suppression(candidates, thresholds.iou, options);
  debug!(
    "后处理完成: 锚点 {}, 候选框 {}, NMS 后 {}",
    anchors,
    before_nms,
    kept.len()
  );

  Ok(RawDetections::from(kept))
}
