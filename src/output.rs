// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// src/output.rs - 输出定义
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

use std::fmt;
use std::path::Path;

use image::RgbImage;
use thiserror::Error;

/// 逐帧写入的视频输出
pub trait FrameSink: Send {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError>;

  /// 关闭输出并等待数据落盘
  fn finish(self: Box<Self>) -> Result<(), OutputError>;
}

pub mod draw;
pub mod mjpeg;

mod ffmpeg_output;
pub use self::ffmpeg_output::FfmpegVideoOutput;

mod reencode;
pub use self::reencode::{Reencoder, reencode_args};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("无法创建输出 {path}: {reason}")]
  Open { path: String, reason: String },
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("视频编码错误: {0}")]
  Encoding(String),
  #[error("字体加载错误: {0}")]
  FontLoad(String),
}

impl OutputError {
  pub fn open(path: &Path, reason: impl fmt::Display) -> Self {
    OutputError::Open {
      path: path.display().to_string(),
      reason: reason.to_string(),
    }
  }
}
