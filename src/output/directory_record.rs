// 该文件是 Terra Detect （田鉴） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::{
  fs::File,
  io::BufWriter,
  path::PathBuf,
  sync::atomic::{AtomicU16, Ordering},
};

use chrono::{DateTime, Datelike, Utc};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  detection::DetectionResult,
  input::Upload,
  output::Render,
  service::{BatchItemResult, BatchOutcome},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 把检测记录按日期写入目录：`<目录>/YYYY/MM/DD/HH-MM-SS-XXXX.json`
///
/// 默认只记录检出病害的图像；带 `always` 参数时健康图像与失败的输入也会记录。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  record_counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");
    let path = urlencoding::decode(uri.path())
      .map(|p| p.into_owned())
      .unwrap_or_else(|_| uri.path().to_string());

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(path),
      record_counter: AtomicU16::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  fn record_id(&self) -> u16 {
    self.record_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn record_path(&self, now: DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.json",
      now.format("%H-%M-%S"),
      self.record_id()
    )))
  }

  fn write_record(&self, record: &BatchItemResult) -> Result<(), DirectoryRecordOutputError> {
    let path = self.record_path(Utc::now())?;
    let writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(writer, record)?;
    debug!("写入检测记录: {}", path.display());
    Ok(())
  }
}

impl Render<Upload, DetectionResult> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, input: &Upload, result: &DetectionResult) -> Result<(), Self::Error> {
    if !self.always && !result.detected {
      return Ok(());
    }
    self.write_record(&BatchItemResult {
      filename: input.filename.clone(),
      outcome: BatchOutcome::Result(result.clone()),
    })
  }

  fn render_error(&self, input: &Upload, message: &str) -> Result<(), Self::Error> {
    if !self.always {
      return Ok(());
    }
    self.write_record(&BatchItemResult {
      filename: input.filename.clone(),
      outcome: BatchOutcome::Error(message.to_string()),
    })
  }
}
