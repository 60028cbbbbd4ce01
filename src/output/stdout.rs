// 该文件是 Terra Detect （田鉴） 项目的一部分。
// src/output/stdout.rs - 标准输出 JSON 行
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

use std::io::Write;

use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  detection::DetectionResult,
  input::Upload,
  output::Render,
  service::{BatchItemResult, BatchOutcome},
};

#[derive(Error, Debug)]
pub enum StdoutOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 每个输入输出一行 `{filename, result}` 或 `{filename, error}`
pub struct StdoutOutput;

impl FromUrlWithScheme for StdoutOutput {
  const SCHEME: &'static str = "stdout";
}

impl FromUrl for StdoutOutput {
  type Error = StdoutOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(StdoutOutputError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(StdoutOutput)
  }
}

fn record_line(input: &Upload, outcome: BatchOutcome) -> Result<String, serde_json::Error> {
  serde_json::to_string(&BatchItemResult {
    filename: input.filename.clone(),
    outcome,
  })
}

impl StdoutOutput {
  fn write_line(&self, line: &str) -> Result<(), StdoutOutputError> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", line)?;
    stdout.flush()?;
    Ok(())
  }
}

impl Render<Upload, DetectionResult> for StdoutOutput {
  type Error = StdoutOutputError;

  fn render_result(&self, input: &Upload, result: &DetectionResult) -> Result<(), Self::Error> {
    let line = record_line(input, BatchOutcome::Result(result.clone()))?;
    self.write_line(&line)
  }

  fn render_error(&self, input: &Upload, message: &str) -> Result<(), Self::Error> {
    let line = record_line(input, BatchOutcome::Error(message.to_string()))?;
    self.write_line(&line)
  }
}
