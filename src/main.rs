// 该文件是 Terra Detect （田鉴） 项目的一部分。
// src/main.rs - 命令行检测程序
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

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use terra_detect::{
  FromUrl, FromUrlWithScheme,
  config::parse_location,
  input::ImageFileInput,
  output::OutputWrapper,
  service::DetectionService,
  task::{BatchTask, OneShotTask, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();
  let config = args.detector.into_config()?;

  info!("模型位置: {}", config.model);
  info!("输入来源: {:?}", args.input);
  info!("输出方式: {}", args.output);
  info!(
    "置信度阈值: {}, IoU 阈值: {}",
    config.thresholds.confidence, config.thresholds.iou
  );

  let mut inputs = Vec::with_capacity(args.input.len());
  for location in &args.input {
    let url = parse_location(location, ImageFileInput::SCHEME)
      .with_context(|| format!("输入来源无效: {}", location))?;
    let input =
      ImageFileInput::from_url(&url).with_context(|| format!("无法打开输入来源: {}", location))?;
    inputs.push(input);
  }
  let total: usize = inputs.iter().map(ImageFileInput::len).sum();

  let output = OutputWrapper::from_url(&args.output)?;

  let service = DetectionService::load(&config);
  if !service.is_model_loaded() {
    anyhow::bail!("模型不可用，无法执行检测");
  }

  let uploads = inputs.into_iter().flat_map(ImageFileInput::into_uploads);
  if total == 1 {
    OneShotTask.run_task(uploads, &service, output)?;
  } else {
    info!("共 {} 张图片，使用批量任务", total);
    BatchTask::default()
      .with_chunk_size(args.chunk_size)
      .run_task(uploads, &service, output)?;
  }

  Ok(())
}
