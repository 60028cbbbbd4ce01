// 该文件是 Terra Detect （田鉴） 项目的一部分。
// src/server/multipart.rs - multipart/form-data 解析
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

use crate::input::Upload;

const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
  if needle.is_empty() {
    return Some(0);
  }
  haystack.windows(needle.len()).position(|w| w == needle)
}

fn split_on<'a>(haystack: &'a [u8], needle: &[u8]) -> Vec<&'a [u8]> {
  let mut pieces = Vec::new();
  let mut rest = haystack;
  while let Some(pos) = find_subsequence(rest, needle) {
    pieces.push(&rest[..pos]);
    rest = &rest[pos + needle.len()..];
  }
  pieces.push(rest);
  pieces
}

/// 从 `multipart/form-data; boundary=...` 中取出分隔符
pub fn extract_boundary(content_type: &str) -> Option<String> {
  let mut params = content_type.split(';').map(str::trim);
  let mime = params.next()?;
  if !mime.eq_ignore_ascii_case("multipart/form-data") {
    return None;
  }
  params
    .find_map(|p| {
      p.strip_prefix("boundary=")
        .or_else(|| p.strip_prefix("BOUNDARY="))
    })
    .map(|b| b.trim_matches('"').to_string())
    .filter(|b| !b.is_empty())
}

/// 按引号外的 `;` 切分头部参数，引号内的 `;` 属于参数值
fn split_params(header: &str) -> Vec<&str> {
  let mut params = Vec::new();
  let (mut start, mut quoted, mut escaped) = (0, false, false);
  for (index, ch) in header.char_indices() {
    match ch {
      _ if escaped => escaped = false,
      '\\' if quoted => escaped = true,
      '"' => quoted = !quoted,
      ';' if !quoted => {
        params.push(header[start..index].trim());
        start = index + 1;
      }
      _ => {}
    }
  }
  params.push(header[start..].trim());
  params
}

fn unquote(value: &str) -> String {
  let value = value.trim();
  match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
    Some(inner) => {
      let mut unescaped = String::with_capacity(inner.len());
      let mut chars = inner.chars();
      while let Some(ch) = chars.next() {
        match ch {
          '\\' => unescaped.extend(chars.next()),
          _ => unescaped.push(ch),
        }
      }
      unescaped
    }
    None => value.to_string(),
  }
}

/// 取出 `Content-Disposition` 中某个参数的值，支持带引号与不带引号两种写法
fn disposition_param(disposition: &str, key: &str) -> Option<String> {
  split_params(disposition).into_iter().find_map(|param| {
    let (name, value) = param.split_once('=')?;
    if !name.trim().eq_ignore_ascii_case(key) {
      return None;
    }
    Some(unquote(value))
  })
}

/// 文件名优先使用 RFC 5987 形式的 `filename*=UTF-8''...`
fn part_filename(disposition: &str) -> Option<String> {
  if let Some(extended) = disposition_param(disposition, "filename*") {
    let encoded = extended
      .split_once("''")
      .map(|(_, value)| value)
      .unwrap_or(&extended);
    if let Ok(decoded) = urlencoding::decode(encoded) {
      return Some(decoded.into_owned());
    }
  }
  disposition_param(disposition, "filename")
}

/// 解析请求体中的全部文件部分，按出现顺序返回
///
/// 只有带 `filename` 参数的部分才被视为文件，普通表单字段被忽略。
pub fn parse_file_parts(body: &[u8], boundary: &str) -> Vec<Upload> {
  let delimiter = format!("--{}", boundary);
  let mut uploads = Vec::new();

  for part in split_on(body, delimiter.as_bytes()).into_iter().skip(1) {
    // 结束分隔符 `--boundary--`
    if part.starts_with(b"--") {
      break;
    }
    let part = part.strip_prefix(b"\r\n").unwrap_or(part);
    let Some(sep_pos) = find_subsequence(part, HEADER_SEPARATOR) else {
      continue;
    };

    let headers = String::from_utf8_lossy(&part[..sep_pos]);
    let mut disposition = None;
    let mut content_type = None;
    for line in headers.split("\r\n") {
      let Some((name, value)) = line.split_once(':') else {
        continue;
      };
      let name = name.trim();
      if name.eq_ignore_ascii_case("content-disposition") {
        disposition = Some(value.trim().to_string());
      } else if name.eq_ignore_ascii_case("content-type") {
        content_type = Some(value.trim().to_string());
      }
    }

    let Some(disposition) = disposition else {
      continue;
    };
    if disposition_param(&disposition, "filename").is_none()
      && disposition_param(&disposition, "filename*").is_none()
    {
      continue;
    }

    let data = &part[sep_pos + HEADER_SEPARATOR.len()..];
    let data = data.strip_suffix(b"\r\n").unwrap_or(data);

    let mut upload = Upload::new(data);
    if let Some(filename) = part_filename(&disposition).filter(|f| !f.is_empty()) {
      upload = upload.with_filename(filename);
    }
    if let Some(content_type) = content_type {
      upload = upload.with_content_type(content_type);
    }
    uploads.push(upload);
  }

  uploads
}

#[cfg(test)]
mod tests {
  use super::*;

  const BOUNDARY: &str = "----TerraBoundary7MA4YWxk";

  fn body(parts: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (headers, data) in parts {
      body.extend_from_slice(format!("--{}\r\n{}\r\n\r\n", BOUNDARY, headers).as_bytes());
      body.extend_from_slice(data);
      body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
  }

  #[test]
  fn extracts_boundary() {
    assert_eq!(
      extract_boundary("multipart/form-data; boundary=abc123").as_deref(),
      Some("abc123")
    );
    assert_eq!(
      extract_boundary("Multipart/Form-Data; charset=utf-8; boundary=\"q r\"").as_deref(),
      Some("q r")
    );
    assert_eq!(extract_boundary("application/json"), None);
    assert_eq!(extract_boundary("multipart/form-data"), None);
  }

  #[test]
  fn parses_file_parts_in_order() {
    let body = body(&[
      (
        "Content-Disposition: form-data; name=\"files\"; filename=\"a.jpg\"\r\nContent-Type: image/jpeg",
        &b"\xff\xd8\xff\xe0"[..],
      ),
      ("Content-Disposition: form-data; name=\"note\"", &b"hello"[..]),
      (
        "Content-Disposition: form-data; name=\"files\"; filename=\"b.png\"",
        &b"\r\n\r\nbinary\r\n"[..],
      ),
    ]);

    let uploads = parse_file_parts(&body, BOUNDARY);
    assert_eq!(uploads.len(), 2);
    assert_eq!(uploads[0].filename.as_deref(), Some("a.jpg"));
    assert_eq!(uploads[0].content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(uploads[0].bytes, b"\xff\xd8\xff\xe0");
    assert_eq!(uploads[1].filename.as_deref(), Some("b.png"));
    assert_eq!(uploads[1].content_type, None);
    assert_eq!(uploads[1].bytes, b"\r\n\r\nbinary\r\n");
  }

  #[test]
  fn decodes_extended_filenames() {
    let body = body(&[(
      "Content-Disposition: form-data; name=\"file\"; filename=\"x.jpg\"; filename*=UTF-8''%E5%8F%B6%E7%89%87.jpg",
      &b"data"[..],
    )]);
    let uploads = parse_file_parts(&body, BOUNDARY);
    assert_eq!(uploads[0].filename.as_deref(), Some("叶片.jpg"));
  }

  #[test]
  fn empty_file_part_is_kept() {
    let body = body(&[(
      "Content-Disposition: form-data; name=\"file\"; filename=\"empty.jpg\"",
      &b""[..],
    )]);
    let uploads = parse_file_parts(&body, BOUNDARY);
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0].bytes.is_empty());
  }

  #[test]
  fn no_file_parts() {
    let body = body(&[("Content-Disposition: form-data; name=\"note\"", &b"hi"[..])]);
    assert!(parse_file_parts(&body, BOUNDARY).is_empty());
    assert!(parse_file_parts(b"garbage", BOUNDARY).is_empty());
  }

  #[test]
  fn quoted_filenames_keep_semicolons() {
    let body = body(&[(
      "Content-Disposition: form-data; name=\"file\"; filename=\"a;b \\\"leaf\\\".jpg\"",
      &b"data"[..],
    )]);
    let uploads = parse_file_parts(&body, BOUNDARY);
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].filename.as_deref(), Some("a;b \"leaf\".jpg"));
  }
}
