// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// src/input/memory.rs - 内存帧序列输入
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

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::RgbImage;

use crate::{
  frame::{Frame, StreamInfo},
  input::{InputError, VideoSource},
};

/// 由内存中的图像组成的视频源，可选地在末尾模拟一次读取错误。
pub struct MemorySource {
  info: StreamInfo,
  frames: VecDeque<RgbImage>,
  next_index: u64,
  read_error: bool,
  released: Option<Arc<AtomicBool>>,
}

impl MemorySource {
  pub fn new(info: StreamInfo, frames: Vec<RgbImage>) -> Self {
    Self {
      info,
      frames: frames.into(),
      next_index: 0,
      read_error: false,
      released: None,
    }
  }

  /// `count` 帧纯黑图像
  pub fn blank(info: StreamInfo, count: usize) -> Self {
    let frames = (0..count)
      .map(|_| RgbImage::new(info.width, info.height))
      .collect();
    Self::new(info, frames)
  }

  /// 帧耗尽后返回一次读取错误，而不是正常结束
  pub fn with_read_error(mut self) -> Self {
    self.read_error = true;
    self
  }

  /// drop 时置位，用于观察句柄是否被释放
  pub fn with_release_flag(mut self, flag: Arc<AtomicBool>) -> Self {
    self.released = Some(flag);
    self
  }
}

impl Iterator for MemorySource {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if let Some(image) = self.frames.pop_front() {
      let index = self.next_index;
      self.next_index += 1;
      return Some(Ok(Frame::new(index, image)));
    }
    if self.read_error {
      self.read_error = false;
      return Some(Err(InputError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "模拟的读取错误",
      ))));
    }
    None
  }
}

impl VideoSource for MemorySource {
  fn info(&self) -> StreamInfo {
    self.info
  }
}

impl Drop for MemorySource {
  fn drop(&mut self) {
    if let Some(flag) = &self.released {
      flag.store(true, Ordering::SeqCst);
    }
  }
}
