// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// src/backend.rs - 视频读写后端
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

use crate::{
  frame::StreamInfo,
  input::{FfmpegInput, InputError, SourceLocator, VideoSource},
  output::{FfmpegVideoOutput, FrameSink, OutputError, Reencoder},
};

/// 流水线所需的全部外部视频能力
pub trait Backend: Send + Sync {
  fn open_source(&self, locator: &SourceLocator) -> Result<Box<dyn VideoSource>, InputError>;

  fn open_sink(&self, path: &Path, info: &StreamInfo) -> Result<Box<dyn FrameSink>, OutputError>;

  /// 将中间文件转码为浏览器可播放的视频
  fn reencode(&self, raw: &Path, output: &Path) -> Result<(), OutputError>;
}

/// 基于 ffmpeg / ffprobe 命令行的后端
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
  ffmpeg: PathBuf,
  ffprobe: PathBuf,
  reencoder: Reencoder,
}

impl FfmpegBackend {
  pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
    let ffmpeg = ffmpeg.into();
    Self {
      reencoder: Reencoder::new(ffmpeg.clone()),
      ffmpeg,
      ffprobe: ffprobe.into(),
    }
  }
}

impl Default for FfmpegBackend {
  fn default() -> Self {
    Self::new("ffmpeg", "ffprobe")
  }
}

impl Backend for FfmpegBackend {
  fn open_source(&self, locator: &SourceLocator) -> Result<Box<dyn VideoSource>, InputError> {
    match locator {
      #[cfg(feature = "gstreamer_input")]
      SourceLocator::GStreamer(url) => {
        use crate::{FromUrl, input::GStreamerInputPipelineBuilder};
        let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
        Ok(Box::new(input))
      }
      #[cfg(not(feature = "gstreamer_input"))]
      SourceLocator::GStreamer(_) => Err(InputError::Unsupported(format!(
        "{} (需要启用 gstreamer_input 特性)",
        locator
      ))),
      _ => Ok(Box::new(FfmpegInput::open(
        &self.ffmpeg,
        &self.ffprobe,
        locator,
      )?)),
    }
  }

  fn open_sink(&self, path: &Path, info: &StreamInfo) -> Result<Box<dyn FrameSink>, OutputError> {
    Ok(Box::new(FfmpegVideoOutput::open(&self.ffmpeg, path, info)?))
  }

  fn reencode(&self, raw: &Path, output: &Path) -> Result<(), OutputError> {
    self.reencoder.reencode(raw, output)
  }
}
