// 该文件是 Terra Detect （田鉴） 项目的一部分。
// src/model/yolo.rs - YOLO ONNX 检测模型
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

use std::{sync::Mutex, time::Instant};

use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor,
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  model::{
    LabelMap, Model, ModelError, RawDetections, Thresholds,
    nms::NmsOptions,
    postprocess::decode_yolo_output,
  },
};

const YOLO_DEFAULT_INPUT_SIZE: u32 = 640;
const YOLO_METADATA_NAMES: &str = "names";
const YOLO_METADATA_IMGSZ: &str = "imgsz";

/// ONNX Runtime 上的 YOLO 检测模型
///
/// 会话运行需要独占访问，因此放在互斥锁内，同一模型实例上的推理串行执行。
pub struct YoloOnnx {
  session: Mutex<Session>,
  input_name: String,
  output_name: String,
  input_size: u32,
  labels: LabelMap,
  nms: NmsOptions,
}

pub struct YoloOnnxBuilder {
  model_path: String,
  labels_path: Option<String>,
  input_size: Option<u32>,
  threads: Option<usize>,
  nms: NmsOptions,
}

impl FromUrlWithScheme for YoloOnnxBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for YoloOnnxBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let model_path = urlencoding::decode(url.path())
      .map(|p| p.into_owned())
      .unwrap_or_else(|_| url.path().to_string());
    let mut builder = YoloOnnxBuilder::new(model_path);

    for (key, value) in url.query_pairs() {
      match &*key {
        "labels" => builder = builder.labels_path(value.into_owned()),
        "imgsz" => builder = builder.input_size(parse_query(&key, &value)?),
        "agnostic" => builder = builder.agnostic(parse_query(&key, &value)?),
        "max_det" => builder = builder.max_detections(parse_query(&key, &value)?),
        "threads" => builder = builder.threads(parse_query(&key, &value)?),
        _ => warn!("忽略未知的模型参数: {}={}", key, value),
      }
    }

    Ok(builder)
  }
}

fn parse_query<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ModelError> {
  value
    .parse()
    .map_err(|_| ModelError::ModelPathError(format!("模型参数 {}={} 无效", key, value)))
}

/// 解析元数据中的输入尺寸，形如 `[640, 640]`
fn parse_imgsz(text: &str) -> Option<u32> {
  text
    .trim()
    .trim_start_matches('[')
    .trim_end_matches(']')
    .split(',')
    .next()?
    .trim()
    .parse()
    .ok()
}

impl YoloOnnxBuilder {
  pub fn new(model_path: impl Into<String>) -> Self {
    Self {
      model_path: model_path.into(),
      labels_path: None,
      input_size: None,
      threads: None,
      nms: NmsOptions::default(),
    }
  }

  pub fn labels_path(mut self, path: impl Into<String>) -> Self {
    self.labels_path = Some(path.into());
    self
  }

  pub fn input_size(mut self, size: u32) -> Self {
    self.input_size = Some(size);
    self
  }

  pub fn agnostic(mut self, agnostic: bool) -> Self {
    self.nms.agnostic = agnostic;
    self
  }

  pub fn max_detections(mut self, max_detections: usize) -> Self {
    self.nms.max_detections = max_detections;
    self
  }

  pub fn threads(mut self, threads: usize) -> Self {
    self.threads = Some(threads);
    self
  }

  pub fn build(self) -> Result<YoloOnnx, ModelError> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 ONNX Runtime 推理会话");
    let mut builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
    if let Some(threads) = self.threads {
      builder = builder.with_intra_threads(threads)?;
    }
    let session = builder.commit_from_memory(&model_data)?;

    let input_name = session
      .inputs
      .first()
      .map(|input| input.name.clone())
      .ok_or_else(|| ModelError::ModelInvalid("模型没有输入".to_string()))?;
    let output_name = session
      .outputs
      .first()
      .map(|output| output.name.clone())
      .ok_or_else(|| ModelError::ModelInvalid("模型没有输出".to_string()))?;

    let (metadata_names, metadata_imgsz) = {
      let metadata = session.metadata()?;
      (
        metadata.custom(YOLO_METADATA_NAMES).ok().flatten(),
        metadata.custom(YOLO_METADATA_IMGSZ).ok().flatten(),
      )
    };

    let labels = match (&self.labels_path, metadata_names) {
      (Some(path), _) => {
        info!("从标签文件加载类别: {}", path);
        LabelMap::from_json_file(path)?
      }
      (None, Some(names)) => LabelMap::from_metadata(&names)?,
      (None, None) => {
        error!("模型元数据中没有类别名称，且未指定标签文件");
        return Err(ModelError::ModelInvalid(
          "缺少类别名称，请通过 labels 参数指定标签文件".to_string(),
        ));
      }
    };

    let input_size = self
      .input_size
      .or_else(|| metadata_imgsz.as_deref().and_then(parse_imgsz))
      .unwrap_or(YOLO_DEFAULT_INPUT_SIZE);
    if input_size == 0 {
      return Err(ModelError::ModelInvalid("输入尺寸不能为 0".to_string()));
    }

    debug!("模型输入: {}, 输出: {}", input_name, output_name);
    debug!("模型输入尺寸: {}x{}", input_size, input_size);
    info!("模型加载完成, 共 {} 个类别: {:?}", labels.len(), labels.names());

    Ok(YoloOnnx {
      session: Mutex::new(session),
      input_name,
      output_name,
      input_size,
      labels,
      nms: self.nms,
    })
  }
}

impl YoloOnnx {
  fn run_session(&self, tensor: Vec<f32>) -> Result<(Vec<f32>, Vec<usize>), ModelError> {
    let size = self.input_size as usize;
    let input = Tensor::from_array(([1usize, 3, size, size], tensor.into_boxed_slice()))?;

    let mut session = self.session.lock().map_err(|_| ModelError::SessionPoisoned)?;
    let outputs = session.run(ort::inputs![self.input_name.as_str() => input])?;
    let output = outputs
      .get(self.output_name.as_str())
      .ok_or_else(|| ModelError::InvalidOutput(format!("缺少输出 {}", self.output_name)))?;

    let (shape, data) = output.try_extract_tensor::<f32>()?;
    let shape = shape.iter().map(|&d| d.max(0) as usize).collect();
    Ok((data.to_vec(), shape))
  }
}

impl Model for YoloOnnx {
  fn infer(&self, frame: &RgbFrame, thresholds: &Thresholds) -> Result<RawDetections, ModelError> {
    let started = Instant::now();
    let (tensor, letterbox) = frame.letterbox_nchw(self.input_size);
    let preprocessed = started.elapsed();

    debug!("执行模型推理");
    let (data, shape) = self.run_session(tensor)?;
    let inferred = started.elapsed();
    debug!("模型输出形状: {:?}", shape);

    let result = decode_yolo_output(
      &data,
      &shape,
      Some(self.labels.len()),
      &letterbox,
      thresholds,
      &self.nms,
    )?;
    debug!(
      "推理完成: 预处理 {:.2?}, 推理 {:.2?}, 总计 {:.2?}, 检测到 {} 个目标",
      preprocessed,
      inferred - preprocessed,
      started.elapsed(),
      result.len()
    );

    Ok(result)
  }

  fn labels(&self) -> &LabelMap {
    &self.labels
  }
}
