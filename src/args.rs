// 该文件是 Terra Detect （田鉴） 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::Parser;
use url::Url;

use terra_detect::{config::DetectorArgs, task::DEFAULT_BATCH_CHUNK_SIZE};

/// Terra Detect 植物病害检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub detector: DetectorArgs,

  /// 输入来源，可重复指定
  /// 支持格式:
  /// - 图片文件: leaf.jpg 或 image:///data/leaf.jpg
  /// - 图片目录: photos/ 或 image:///data/photos（按文件名顺序处理目录下全部图片）
  #[arg(long, required = true, num_args = 1.., value_name = "SOURCE")]
  pub input: Vec<String>,

  /// 输出方式
  /// 支持格式:
  /// - stdout: 每张图片输出一行 JSON
  /// - image:///path/to/dir 保存标注后的图片
  /// - folder:///path/to/dir[?always] 按日期记录检测结果
  #[arg(long, default_value = "stdout:", value_name = "OUTPUT")]
  pub output: Url,

  /// 批量处理时每批的图片数量
  #[arg(long, default_value_t = DEFAULT_BATCH_CHUNK_SIZE, value_name = "COUNT")]
  pub chunk_size: usize,
}
