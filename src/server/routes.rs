// 该文件是 Terra Detect （田鉴） 项目的一部分。
// src/server/routes.rs - 请求分发与响应
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

use std::{io::Read, time::Instant};

use serde::Serialize;
use serde_json::json;
use tiny_http::{Header, Method, Request, Response};
use tracing::{info, warn};

use crate::{
  input::Upload,
  server::{ServerConfig, multipart},
  service::{DetectError, DetectionService},
};

/// 与传输层无关的请求
#[derive(Debug)]
pub struct ApiRequest<'a> {
  pub method: Method,
  pub path: &'a str,
  pub content_type: Option<&'a str>,
  pub body: &'a [u8],
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
  pub status: u16,
  /// 204 响应没有响应体
  pub body: Option<String>,
}

impl ApiResponse {
  fn json<T: Serialize>(status: u16, value: &T) -> Self {
    match serde_json::to_string(value) {
      Ok(body) => Self {
        status,
        body: Some(body),
      },
      Err(err) => Self::error(500, format!("响应序列化失败: {}", err)),
    }
  }

  fn error(status: u16, detail: impl Into<String>) -> Self {
    let detail: String = detail.into();
    Self {
      status,
      body: Some(json!({ "detail": detail }).to_string()),
    }
  }

  fn no_content() -> Self {
    Self {
      status: 204,
      body: None,
    }
  }
}

/// 检测错误对应的 HTTP 状态码
pub fn status_for(err: &DetectError) -> u16 {
  match err {
    DetectError::ModelUnavailable(_) => 503,
    DetectError::Decode(_) => 400,
    DetectError::InvalidClassIndex(_) | DetectError::Inference(_) => 500,
  }
}

fn detect_error(err: DetectError) -> ApiResponse {
  ApiResponse::error(status_for(&err), err.to_string())
}

fn file_parts(request: &ApiRequest) -> Result<Vec<Upload>, ApiResponse> {
  let boundary = request
    .content_type
    .and_then(multipart::extract_boundary)
    .ok_or_else(|| ApiResponse::error(422, "请求必须为 multipart/form-data"))?;
  let uploads = multipart::parse_file_parts(request.body, &boundary);
  if uploads.is_empty() {
    return Err(ApiResponse::error(422, "请求中没有上传文件"));
  }
  Ok(uploads)
}

fn detect(service: &DetectionService, request: &ApiRequest) -> ApiResponse {
  let uploads = match file_parts(request) {
    Ok(uploads) => uploads,
    Err(response) => return response,
  };
  match service.detect(&uploads[0]) {
    Ok(result) => ApiResponse::json(200, &result),
    Err(err) => detect_error(err),
  }
}

fn batch_detect(service: &DetectionService, request: &ApiRequest) -> ApiResponse {
  let uploads = match file_parts(request) {
    Ok(uploads) => uploads,
    Err(response) => return response,
  };
  match service.detect_batch(&uploads) {
    Ok(results) => ApiResponse::json(200, &results),
    Err(err) => detect_error(err),
  }
}

/// 路由请求到对应的处理函数
pub fn handle(service: &DetectionService, request: &ApiRequest) -> ApiResponse {
  match (&request.method, request.path) {
    (Method::Options, _) => ApiResponse::no_content(),
    (Method::Get, "/") => ApiResponse::json(200, &service.info()),
    (Method::Get, "/health") => ApiResponse::json(200, &service.health()),
    (Method::Post, "/detect") => detect(service, request),
    (Method::Post, "/batch-detect") => batch_detect(service, request),
    (_, "/" | "/health" | "/detect" | "/batch-detect") => ApiResponse::error(405, "Method Not Allowed"),
    _ => ApiResponse::error(404, "Not Found"),
  }
}

fn header(name: &str, value: &str) -> Option<Header> {
  Header::from_bytes(name.as_bytes(), value.as_bytes()).ok()
}

fn cors_headers(origin: Option<&str>, config: &ServerConfig) -> Vec<Header> {
  let Some(origin) = origin.filter(|o| config.allowed_origins.iter().any(|a| a == o)) else {
    return Vec::new();
  };
  [
    ("Access-Control-Allow-Origin", origin),
    ("Access-Control-Allow-Credentials", "true"),
    ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
    ("Access-Control-Allow-Headers", "*"),
    ("Vary", "Origin"),
  ]
  .into_iter()
  .filter_map(|(name, value)| header(name, value))
  .collect()
}

enum BodyError {
  TooLarge,
  Read(std::io::Error),
}

fn read_body(request: &mut Request, limit: usize) -> Result<Vec<u8>, BodyError> {
  if request.body_length().is_some_and(|len| len > limit) {
    return Err(BodyError::TooLarge);
  }
  let mut body = Vec::new();
  request
    .as_reader()
    .take(limit as u64 + 1)
    .read_to_end(&mut body)
    .map_err(BodyError::Read)?;
  if body.len() > limit {
    return Err(BodyError::TooLarge);
  }
  Ok(body)
}

fn header_value(request: &Request, name: &'static str) -> Option<String> {
  request
    .headers()
    .iter()
    .find(|h| h.field.equiv(name))
    .map(|h| h.value.as_str().to_string())
}

/// 处理一个 HTTP 请求并写回响应
pub fn dispatch(mut request: Request, service: &DetectionService, config: &ServerConfig) {
  let started = Instant::now();
  let method = request.method().clone();
  let url = request.url().to_string();
  let path = url.split('?').next().unwrap_or("/").to_string();
  let origin = header_value(&request, "Origin");
  let content_type = header_value(&request, "Content-Type");

  let response = match read_body(&mut request, config.max_body_bytes) {
    Ok(body) => handle(
      service,
      &ApiRequest {
        method: method.clone(),
        path: &path,
        content_type: content_type.as_deref(),
        body: &body,
      },
    ),
    Err(BodyError::TooLarge) => ApiResponse::error(
      413,
      format!("请求体超过 {} 字节上限", config.max_body_bytes),
    ),
    Err(BodyError::Read(err)) => ApiResponse::error(400, format!("请求体读取失败: {}", err)),
  };

  let status = response.status;
  let mut reply = Response::from_data(response.body.unwrap_or_default().into_bytes())
    .with_status_code(status);
  if status != 204
    && let Some(h) = header("Content-Type", "application/json")
  {
    reply = reply.with_header(h);
  }
  for h in cors_headers(origin.as_deref(), config) {
    reply = reply.with_header(h);
  }

  info!(
    "{} {} -> {} ({:.2?})",
    method,
    path,
    status,
    started.elapsed()
  );
  if let Err(err) = request.respond(reply) {
    warn!("响应写回失败: {}", err);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Thresholds;

  fn unavailable() -> DetectionService {
    DetectionService::unavailable("找不到模型文件", Thresholds::default())
  }

  fn request<'a>(method: Method, path: &'a str, content_type: Option<&'a str>, body: &'a [u8]) -> ApiRequest<'a> {
    ApiRequest {
      method,
      path,
      content_type,
      body,
    }
  }

  fn body_json(response: &ApiResponse) -> serde_json::Value {
    serde_json::from_str(response.body.as_deref().unwrap()).unwrap()
  }

  #[test]
  fn root_and_health_work_without_model() {
    let service = unavailable();

    let response = handle(&service, &request(Method::Get, "/", None, b""));
    assert_eq!(response.status, 200);
    let json = body_json(&response);
    assert_eq!(json["status"], "running");
    assert_eq!(json["model_loaded"], false);

    let response = handle(&service, &request(Method::Get, "/health", None, b""));
    assert_eq!(response.status, 200);
    let json = body_json(&response);
    assert_eq!(json["status"], "healthy");
    assert!(json["classes"].is_null());
  }

  #[test]
  fn detect_without_model_is_503() {
    let service = unavailable();
    let body = b"--b\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.jpg\"\r\n\r\nxx\r\n--b--\r\n";
    let response = handle(
      &service,
      &request(Method::Post, "/detect", Some("multipart/form-data; boundary=b"), body),
    );
    assert_eq!(response.status, 503);
    assert!(body_json(&response)["detail"].as_str().unwrap().contains("找不到模型文件"));
  }

  #[test]
  fn missing_file_is_422() {
    let service = unavailable();
    let response = handle(
      &service,
      &request(Method::Post, "/batch-detect", Some("application/json"), b"{}"),
    );
    assert_eq!(response.status, 422);

    let response = handle(
      &service,
      &request(Method::Post, "/detect", Some("multipart/form-data; boundary=b"), b"--b--\r\n"),
    );
    assert_eq!(response.status, 422);
  }

  #[test]
  fn unknown_routes_and_methods() {
    let service = unavailable();
    assert_eq!(handle(&service, &request(Method::Get, "/nope", None, b"")).status, 404);
    assert_eq!(handle(&service, &request(Method::Get, "/detect", None, b"")).status, 405);
    assert_eq!(handle(&service, &request(Method::Options, "/detect", None, b"")), ApiResponse::no_content());
  }

  #[test]
  fn cors_echoes_allowed_origins_only() {
    let config = ServerConfig::default();
    let headers = cors_headers(Some("http://localhost:3000"), &config);
    assert!(headers.iter().any(|h| {
      h.field.equiv("Access-Control-Allow-Origin") && h.value.as_str() == "http://localhost:3000"
    }));
    assert!(cors_headers(Some("http://evil.example"), &config).is_empty());
    assert!(cors_headers(None, &config).is_empty());
  }

  #[test]
  fn maps_errors_to_status_codes() {
    use crate::{detection::InvalidClassIndex, input::DecodeError, model::ModelError};

    assert_eq!(status_for(&DetectError::ModelUnavailable(String::new())), 503);
    assert_eq!(status_for(&DetectError::Decode(DecodeError::Empty)), 400);
    assert_eq!(
      status_for(&DetectError::InvalidClassIndex(InvalidClassIndex {
        class_id: 3,
        known: 2
      })),
      500
    );
    assert_eq!(
      status_for(&DetectError::Inference(ModelError::InvalidOutput(String::new()))),
      500
    );
  }
}
