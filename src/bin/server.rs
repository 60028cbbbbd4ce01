// 该文件是 Terra Detect （田鉴） 项目的一部分。
// src/bin/server.rs - HTTP 检测服务程序
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

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use terra_detect::{
  config::DetectorArgs,
  server::{
    DEFAULT_ALLOWED_ORIGINS, DEFAULT_BIND_ADDRESS, DEFAULT_MAX_BODY_BYTES, DetectionServer, ServerConfig,
  },
  service::DetectionService,
};

/// Terra Detect HTTP 检测服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub detector: DetectorArgs,

  /// 监听地址
  #[arg(long, env = "TERRA_BIND", default_value = DEFAULT_BIND_ADDRESS, value_name = "ADDR")]
  pub bind: String,

  /// 允许跨域访问的来源，可重复指定
  #[arg(
    long = "allow-origin",
    value_name = "ORIGIN",
    default_values_t = DEFAULT_ALLOWED_ORIGINS.map(String::from)
  )]
  pub allow_origins: Vec<String>,

  /// 请求体大小上限（字节）
  #[arg(long, default_value_t = DEFAULT_MAX_BODY_BYTES, value_name = "BYTES")]
  pub max_body_bytes: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let config = args.detector.into_config()?;

  info!("模型位置: {}", config.model);
  info!(
    "置信度阈值: {}, IoU 阈值: {}",
    config.thresholds.confidence, config.thresholds.iou
  );

  // 模型加载失败时服务照常启动，健康检查会报告 model_loaded = false
  let service = Arc::new(DetectionService::load(&config));
  if !service.is_model_loaded() {
    warn!("模型未加载，检测接口将返回 503");
  }

  let server = DetectionServer::bind(
    ServerConfig {
      bind: args.bind,
      allowed_origins: args.allow_origins,
      max_body_bytes: args.max_body_bytes,
    },
    service,
  )?;

  let handle = server.handle();
  ctrlc::set_handler(move || {
    info!("收到中断信号，停止服务...");
    handle.unblock();
  })
  .context("无法设置 Ctrl-C 处理函数")?;

  server.serve();
  info!("服务已退出");
  Ok(())
}
