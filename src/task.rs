// 该文件是 Terra Detect （田鉴） 项目的一部分。
// src/task.rs - 检测任务
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

use std::time::Instant;

use anyhow::Context;
use tracing::{info, warn};

use crate::{
  detection::DetectionResult,
  input::{ReadError, Upload},
  output::Render,
  service::{BatchOutcome, DetectionService},
};

pub trait Task<I, O>: Sized {
  type Error;
  fn run_task(self, input: I, service: &DetectionService, output: O) -> Result<(), Self::Error>;
}

/// 只处理第一个输入，任何错误都会终止任务
pub struct OneShotTask;

impl<RE, I, O> Task<I, O> for OneShotTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<Upload, ReadError>>,
  O: Render<Upload, DetectionResult, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, service: &DetectionService, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let upload = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))??;
    info!("输入图像获取成功: {}", upload.display_name());

    let now = Instant::now();
    let result = service
      .detect(&upload)
      .with_context(|| format!("检测 {} 失败", upload.display_name()))?;
    info!(
      "推理完成，耗时: {:.2?}, 检测到 {} 个目标",
      now.elapsed(),
      result.summary.total_detections
    );

    output.render_result(&upload, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());
    Ok(())
  }
}

pub const DEFAULT_BATCH_CHUNK_SIZE: usize = 16;

/// 分块批量处理全部输入，单个输入失败只记录，不影响其他输入
#[derive(Debug)]
pub struct BatchTask {
  chunk_size: usize,
}

impl Default for BatchTask {
  fn default() -> Self {
    Self {
      chunk_size: DEFAULT_BATCH_CHUNK_SIZE,
    }
  }
}

impl BatchTask {
  pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
    self.chunk_size = chunk_size.max(1);
    self
  }
}

impl<RE, I, O> Task<I, O> for BatchTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<Upload, ReadError>>,
  O: Render<Upload, DetectionResult, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, service: &DetectionService, output: O) -> Result<(), Self::Error> {
    info!("开始批量任务, 每批 {} 个文件", self.chunk_size);
    let now = Instant::now();
    let (mut succeeded, mut failed) = (0usize, 0usize);

    loop {
      let chunk: Vec<Result<Upload, ReadError>> = input.by_ref().take(self.chunk_size).collect();
      if chunk.is_empty() {
        break;
      }

      // 读取失败的文件不进入流水线，但仍按原顺序输出
      let mut uploads = Vec::with_capacity(chunk.len());
      let mut slots = Vec::with_capacity(chunk.len());
      for item in chunk {
        match item {
          Ok(upload) => {
            slots.push(Ok(uploads.len()));
            uploads.push(upload);
          }
          Err(err) => slots.push(Err(err)),
        }
      }

      let results = service.detect_batch(&uploads).context("批量检测失败")?;
      for slot in slots {
        match slot {
          Ok(index) => match &results[index].outcome {
            BatchOutcome::Result(result) => {
              succeeded += 1;
              output.render_result(&uploads[index], result)?;
            }
            BatchOutcome::Error(message) => {
              failed += 1;
              output.render_error(&uploads[index], message)?;
            }
          },
          Err(err) => {
            warn!("{}", err);
            failed += 1;
            output.render_error(&err.placeholder(), &err.to_string())?;
          }
        }
      }
    }

    if failed > 0 {
      warn!("批量任务完成: 成功 {}, 失败 {}", succeeded, failed);
    } else {
      info!("批量任务完成: 成功 {}", succeeded);
    }
    info!("总耗时: {:.2?}", now.elapsed());
    Ok(())
  }
}
