// 该文件是 Terra Detect （田鉴） 项目的一部分。
// src/model/labels.rs - 类别标签表
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

use std::{collections::BTreeMap, path::Path};

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("读取标签文件失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签 JSON 无效: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("类别索引无效: {0}")]
  InvalidKey(String),
  #[error("标签格式错误: {0}")]
  Malformed(String),
  #[error("标签表为空")]
  Empty,
}

/// 类别索引到名称的映射，索引可以不连续
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMap {
  names: BTreeMap<u32, String>,
}

impl<S: Into<String>> FromIterator<S> for LabelMap {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    Self {
      names: iter
        .into_iter()
        .enumerate()
        .map(|(id, name)| (id as u32, name.into()))
        .collect(),
    }
  }
}

impl LabelMap {
  pub fn get(&self, class_id: u32) -> Option<&str> {
    self.names.get(&class_id).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  /// 按索引顺序排列的类别名称
  pub fn names(&self) -> Vec<String> {
    self.names.values().cloned().collect()
  }

  pub fn insert(&mut self, class_id: u32, name: impl Into<String>) {
    self.names.insert(class_id, name.into());
  }

  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LabelError> {
    let text = std::fs::read_to_string(path)?;
    Self::from_json_str(&text)
  }

  /// 支持 `["a", "b"]` 与 `{"0": "a", "1": "b"}` 两种写法
  pub fn from_json_str(text: &str) -> Result<Self, LabelError> {
    let labels = match serde_json::from_str::<Value>(text)? {
      Value::Array(items) => items
        .into_iter()
        .map(|item| match item {
          Value::String(name) => Ok(name),
          other => Err(LabelError::Malformed(format!("期望字符串, 实际为 {}", other))),
        })
        .collect::<Result<LabelMap, _>>()?,
      Value::Object(entries) => {
        let mut labels = LabelMap::default();
        for (key, value) in entries {
          let class_id = key
            .trim()
            .parse::<u32>()
            .map_err(|_| LabelError::InvalidKey(key.clone()))?;
          match value {
            Value::String(name) => labels.insert(class_id, name),
            other => {
              return Err(LabelError::Malformed(format!("期望字符串, 实际为 {}", other)));
            }
          }
        }
        labels
      }
      other => {
        return Err(LabelError::Malformed(format!(
          "期望数组或对象, 实际为 {}",
          other
        )));
      }
    };

    if labels.is_empty() {
      return Err(LabelError::Empty);
    }
    Ok(labels)
  }

  /// 解析导出模型元数据中的 `names` 字段，形如 `{0: 'late_blight', 1: "leaf spot"}`
  pub fn from_metadata(text: &str) -> Result<Self, LabelError> {
    let body = text
      .trim()
      .strip_prefix('{')
      .and_then(|s| s.strip_suffix('}'))
      .ok_or_else(|| LabelError::Malformed(text.to_string()))?;

    let mut labels = LabelMap::default();
    let mut chars = body.chars().peekable();

    loop {
      while chars.next_if(|c| c.is_whitespace() || *c == ',').is_some() {}
      if chars.peek().is_none() {
        break;
      }

      let mut key = String::new();
      while let Some(c) = chars.next_if(|c| *c != ':') {
        key.push(c);
      }
      if chars.next() != Some(':') {
        return Err(LabelError::Malformed(text.to_string()));
      }
      let class_id = key
        .trim()
        .parse::<u32>()
        .map_err(|_| LabelError::InvalidKey(key.trim().to_string()))?;

      while chars.next_if(|c| c.is_whitespace()).is_some() {}
      let quote = match chars.next() {
        Some(q @ ('\'' | '"')) => q,
        _ => return Err(LabelError::Malformed(text.to_string())),
      };

      let mut name = String::new();
      let mut closed = false;
      while let Some(c) = chars.next() {
        match c {
          '\\' => {
            if let Some(escaped) = chars.next() {
              name.push(escaped);
            }
          }
          c if c == quote => {
            closed = true;
            break;
          }
          c => name.push(c),
        }
      }
      if !closed {
        return Err(LabelError::Malformed(text.to_string()));
      }
      labels.insert(class_id, name);
    }

    if labels.is_empty() {
      return Err(LabelError::Empty);
    }
    Ok(labels)
  }
}
