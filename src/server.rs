// 该文件是 Terra Detect （田鉴） 项目的一部分。
// src/server.rs - HTTP 检测服务
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

use thiserror::Error;
use tiny_http::Server;
use tracing::{info, warn};

use crate::service::DetectionService;

pub mod multipart;
pub mod routes;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:5000";
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://localhost:8000"];
pub const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ServerError {
  #[error("无法监听地址 {0}: {1}")]
  BindError(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
  pub bind: String,
  /// 允许跨域访问的来源，原样回显在 `Access-Control-Allow-Origin` 中
  pub allowed_origins: Vec<String>,
  pub max_body_bytes: usize,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      bind: DEFAULT_BIND_ADDRESS.to_string(),
      allowed_origins: DEFAULT_ALLOWED_ORIGINS.iter().map(|o| o.to_string()).collect(),
      max_body_bytes: DEFAULT_MAX_BODY_BYTES,
    }
  }
}

/// 每个请求在独立线程中处理，所有线程共享同一个检测服务
pub struct DetectionServer {
  server: Arc<Server>,
  service: Arc<DetectionService>,
  config: Arc<ServerConfig>,
}

impl DetectionServer {
  pub fn bind(config: ServerConfig, service: Arc<DetectionService>) -> Result<Self, ServerError> {
    let server = Server::http(&config.bind)
      .map_err(|err| ServerError::BindError(config.bind.clone(), err.to_string()))?;
    info!("HTTP 服务监听于 {}", config.bind);

    Ok(Self {
      server: Arc::new(server),
      service,
      config: Arc::new(config),
    })
  }

  /// 用于在其他线程中停止 `serve` 循环
  pub fn handle(&self) -> Arc<Server> {
    self.server.clone()
  }

  pub fn serve(self) {
    for request in self.server.incoming_requests() {
      let service = self.service.clone();
      let config = self.config.clone();
      std::thread::spawn(move || {
        routes::dispatch(request, &service, &config);
      });
    }
    warn!("HTTP 服务已停止接受请求");
  }
}
