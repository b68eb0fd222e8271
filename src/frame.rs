// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

use image::RgbImage;
use thiserror::Error;

const RGB_CHANNELS: usize = 3;
pub const DEFAULT_FPS: f64 = 25.0;

/// 视频流元数据
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
  pub width: u32,
  pub height: u32,
  pub fps: f64,
}

impl StreamInfo {
  pub fn new(width: u32, height: u32, fps: f64) -> Self {
    let fps = if fps.is_finite() && fps > 0.0 {
      fps
    } else {
      DEFAULT_FPS
    };
    Self { width, height, fps }
  }

  /// 单帧 RGB24 数据的字节数
  pub fn frame_size(&self) -> usize {
    RGB_CHANNELS * self.width as usize * self.height as usize
  }
}

#[derive(Error, Debug)]
#[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
pub struct FrameSizeMismatch {
  pub expected: usize,
  pub actual: usize,
}

/// 视频源中的一帧，`index` 为该帧在源中的序号（从 0 开始）
#[derive(Debug, Clone)]
pub struct Frame {
  pub index: u64,
  pub image: RgbImage,
}

impl Frame {
  pub fn new(index: u64, image: RgbImage) -> Self {
    Self { index, image }
  }

  pub fn from_rgb24(
    index: u64,
    width: u32,
    height: u32,
    data: Vec<u8>,
  ) -> Result<Self, FrameSizeMismatch> {
    let expected = RGB_CHANNELS * width as usize * height as usize;
    let actual = data.len();
    RgbImage::from_raw(width, height, data)
      .map(|image| Self { index, image })
      .ok_or(FrameSizeMismatch { expected, actual })
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}
