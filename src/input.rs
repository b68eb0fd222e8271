// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// src/input.rs - 视频输入
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
use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

use crate::frame::{Frame, FrameSizeMismatch, StreamInfo};

/// 逐帧读取的视频源。迭代器结束即表示源已耗尽，
/// 读取错误以 `Err` 返回后迭代结束。源在 drop 时释放底层句柄。
pub trait VideoSource: Iterator<Item = Result<Frame, InputError>> + Send {
  fn info(&self) -> StreamInfo;
}

mod ffmpeg_input;
pub use self::ffmpeg_input::{FfmpegInput, parse_frame_rate};

mod memory;
pub use self::memory::MemorySource;

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("无法打开输入源 {locator}: {reason}")]
  Open { locator: String, reason: String },
  #[error("视频元数据解析失败: {0}")]
  Probe(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error(transparent)]
  FrameSize(#[from] FrameSizeMismatch),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("不支持的输入源: {0}")]
  Unsupported(String),
}

impl InputError {
  pub fn open(locator: &SourceLocator, reason: impl fmt::Display) -> Self {
    InputError::Open {
      locator: locator.to_string(),
      reason: reason.to_string(),
    }
  }
}

const GSTREAMER_INPUT_SCHEME: &str = "gst";

/// 输入源定位
///
/// - 普通路径: 本地视频文件
/// - 十进制数字: 摄像头编号（`/dev/videoN`）
/// - `rtsp://`、`http://`、`https://`: 网络摄像头
/// - `gst://camera/...`、`gst://file/...`: GStreamer 管道（需启用 `gstreamer_input` 特性）
#[derive(Debug, Clone, PartialEq)]
pub enum SourceLocator {
  File(PathBuf),
  Webcam(u32),
  Network(Url),
  GStreamer(Url),
}

impl SourceLocator {
  pub fn parse(source: &str) -> Self {
    let source = source.trim();
    if let Ok(index) = source.parse::<u32>() {
      return SourceLocator::Webcam(index);
    }
    if let Ok(url) = Url::parse(source) {
      match url.scheme() {
        "rtsp" | "rtsps" | "rtmp" | "http" | "https" => return SourceLocator::Network(url),
        GSTREAMER_INPUT_SCHEME => return SourceLocator::GStreamer(url),
        _ => {}
      }
    }
    SourceLocator::File(PathBuf::from(source))
  }

  pub fn file(path: impl AsRef<Path>) -> Self {
    SourceLocator::File(path.as_ref().to_path_buf())
  }
}

impl fmt::Display for SourceLocator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SourceLocator::File(path) => write!(f, "{}", path.display()),
      SourceLocator::Webcam(index) => write!(f, "webcam:{}", index),
      // 网络地址可能携带账号密码，不完整输出
      SourceLocator::Network(url) => write!(
        f,
        "{}://{}{}",
        url.scheme(),
        url.host_str().unwrap_or_default(),
        url.path()
      ),
      SourceLocator::GStreamer(url) => write!(f, "{}", url),
    }
  }
}
