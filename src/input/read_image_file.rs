// 该文件是 Terra Detect （田鉴） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::{Path, PathBuf};

use image::ImageFormat;
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{ReadError, Upload},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(std::io::Error),
  #[error("No image files found in {0}")]
  NoImages(String),
}

impl From<std::io::Error> for ImageFileInputError {
  fn from(err: std::io::Error) -> Self {
    ImageFileInputError::IoError(err)
  }
}

/// 从磁盘读取一个图像文件，或目录下的全部图像文件（按文件名排序）
///
/// 文件只读取为原始字节，解码留给检测流水线，与 HTTP 上传走同一路径。
pub struct ImageFileInput {
  paths: Vec<PathBuf>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = urlencoding::decode(url.path())
      .map(|p| p.into_owned())
      .unwrap_or_else(|_| url.path().to_string());
    Self::open(path)
  }
}

impl ImageFileInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    // 路径不存在时在这里报告，而不是留到读取阶段
    let metadata = std::fs::metadata(path)?;
    if !metadata.is_dir() {
      return Ok(Self {
        paths: vec![path.to_path_buf()],
      });
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(path)? {
      let entry = entry?;
      let candidate = entry.path();
      if candidate.is_file() && ImageFormat::from_path(&candidate).is_ok() {
        paths.push(candidate);
      }
    }
    paths.sort();

    if paths.is_empty() {
      return Err(ImageFileInputError::NoImages(path.display().to_string()));
    }
    debug!("目录 {} 中共 {} 个图像文件", path.display(), paths.len());

    Ok(Self { paths })
  }

  pub fn len(&self) -> usize {
    self.paths.len()
  }

  pub fn is_empty(&self) -> bool {
    self.paths.is_empty()
  }

  /// 依次读取文件，读取失败的文件带着文件名与 I/O 错误返回
  pub fn into_uploads(self) -> impl Iterator<Item = Result<Upload, ReadError>> {
    self.paths.into_iter().map(|path| read_upload(&path))
  }
}

fn read_upload(path: &Path) -> Result<Upload, ReadError> {
  let filename = path
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_else(|| path.display().to_string());
  let content_type = ImageFormat::from_path(path)
    .ok()
    .map(|format| format.to_mime_type().to_string());

  let bytes = std::fs::read(path).map_err(|source| {
    error!("读取文件 {} 失败: {}", path.display(), source);
    ReadError {
      filename: filename.clone(),
      source,
    }
  })?;

  let mut upload = Upload::new(bytes).with_filename(filename);
  upload.content_type = content_type;
  Ok(upload)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("terra-detect-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
  }

  #[test]
  fn directory_lists_images_in_order() {
    let dir = scratch_dir("input-dir");
    std::fs::write(dir.join("b.png"), b"b").unwrap();
    std::fs::write(dir.join("a.jpg"), b"a").unwrap();
    std::fs::write(dir.join("notes.txt"), b"skip").unwrap();

    let input = ImageFileInput::open(&dir).unwrap();
    let uploads: Vec<Upload> = input.into_uploads().collect::<Result<_, _>>().unwrap();
    let names: Vec<&str> = uploads.iter().map(|u| u.display_name()).collect();
    assert_eq!(names, vec!["a.jpg", "b.png"]);
    assert_eq!(uploads[0].content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(uploads[1].bytes, b"b");

    let _ = std::fs::remove_dir_all(&dir);
  }

  #[test]
  fn empty_directory_is_an_error() {
    let dir = scratch_dir("input-empty");
    assert!(matches!(
      ImageFileInput::open(&dir),
      Err(ImageFileInputError::NoImages(_))
    ));
    let _ = std::fs::remove_dir_all(&dir);
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("video:///tmp/a.mp4").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch)
    ));
  }

  #[test]
  fn missing_file_is_rejected_on_open() {
    match ImageFileInput::open("/nonexistent/terra-detect/leaf.jpg") {
      Err(ImageFileInputError::IoError(err)) => {
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound)
      }
      other => panic!("unexpected result: {:?}", other.map(|input| input.len())),
    }
  }

  #[test]
  fn file_removed_after_open_reports_read_error() {
    let dir = scratch_dir("input-removed");
    let path = dir.join("leaf.png");
    std::fs::write(&path, b"leaf").unwrap();

    let input = ImageFileInput::open(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    let err = input.into_uploads().next().unwrap().unwrap_err();
    assert_eq!(err.filename, "leaf.png");
    assert_eq!(err.source.kind(), std::io::ErrorKind::NotFound);
    assert_eq!(err.placeholder().display_name(), "leaf.png");
    assert!(err.to_string().contains("leaf.png"));

    let _ = std::fs::remove_dir_all(&dir);
  }
}
