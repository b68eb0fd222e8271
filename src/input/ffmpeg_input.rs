// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// src/input/ffmpeg_input.rs - 基于 ffmpeg 子进程的视频输入
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

//! 视频文件 / 摄像头 / 网络流输入模块
//!
//! 先用 `ffprobe` 读取分辨率和帧率，再启动 `ffmpeg` 将视频解码为
//! RGB24 原始帧写到标准输出，逐帧读取。
//!
//! # 依赖
//!
//! 此模块需要系统安装 ffmpeg 与 ffprobe 命令行工具。

use std::ffi::OsString;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
  frame::{Frame, StreamInfo},
  input::{InputError, SourceLocator, VideoSource},
};

#[derive(Debug, Deserialize)]
struct ProbeOutput {
  #[serde(default)]
  streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
  width: Option<u32>,
  height: Option<u32>,
  avg_frame_rate: Option<String>,
  r_frame_rate: Option<String>,
}

/// 解析 ffprobe 输出的帧率，例如 `30000/1001` 或 `25`
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
  let rate = rate.trim();
  let value = match rate.split_once('/') {
    Some((num, den)) => {
      let num: f64 = num.trim().parse().ok()?;
      let den: f64 = den.trim().parse().ok()?;
      if den == 0.0 {
        return None;
      }
      num / den
    }
    None => rate.parse().ok()?,
  };
  (value.is_finite() && value > 0.0).then_some(value)
}

fn parse_probe(json: &[u8]) -> Result<StreamInfo, InputError> {
  let output: ProbeOutput =
    serde_json::from_slice(json).map_err(|e| InputError::Probe(e.to_string()))?;
  let stream = output
    .streams
    .into_iter()
    .next()
    .ok_or_else(|| InputError::Probe("找不到视频流".to_string()))?;
  let (width, height) = match (stream.width, stream.height) {
    (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
    _ => return Err(InputError::Probe("视频流缺少分辨率信息".to_string())),
  };
  let fps = stream
    .avg_frame_rate
    .as_deref()
    .and_then(parse_frame_rate)
    .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
    .unwrap_or(0.0);
  Ok(StreamInfo::new(width, height, fps))
}

/// ffmpeg / ffprobe 共用的输入参数
fn input_args(locator: &SourceLocator) -> Result<Vec<OsString>, InputError> {
  let args = match locator {
    SourceLocator::File(path) => vec!["-i".into(), path.as_os_str().to_os_string()],
    SourceLocator::Webcam(index) => vec![
      "-f".into(),
      "v4l2".into(),
      "-i".into(),
      format!("/dev/video{}", index).into(),
    ],
    SourceLocator::Network(url) if url.scheme().starts_with("rtsp") => vec![
      "-rtsp_transport".into(),
      "tcp".into(),
      "-i".into(),
      url.as_str().into(),
    ],
    SourceLocator::Network(url) => vec!["-i".into(), url.as_str().into()],
    SourceLocator::GStreamer(_) => {
      return Err(InputError::Unsupported(format!(
        "ffmpeg 后端无法读取 GStreamer 管道: {}",
        locator
      )));
    }
  };
  Ok(args)
}

pub struct FfmpegInput {
  child: Child,
  stdout: BufReader<ChildStdout>,
  info: StreamInfo,
  next_index: u64,
  finished: bool,
}

impl FfmpegInput {
  pub fn open(
    ffmpeg: &Path,
    ffprobe: &Path,
    locator: &SourceLocator,
  ) -> Result<Self, InputError> {
    if let SourceLocator::File(path) = locator {
      if !path.is_file() {
        return Err(InputError::open(locator, "文件不存在"));
      }
    }
    let input = input_args(locator)?;

    let probe = Command::new(ffprobe)
      .args(["-v", "error", "-select_streams", "v:0"])
      .args([
        "-show_entries",
        "stream=width,height,avg_frame_rate,r_frame_rate",
      ])
      .args(["-of", "json"])
      .args(&input)
      .stdin(Stdio::null())
      .output()
      .map_err(|e| InputError::open(locator, format!("无法执行 ffprobe: {}", e)))?;
    if !probe.status.success() {
      let stderr = String::from_utf8_lossy(&probe.stderr);
      return Err(InputError::open(locator, stderr.trim()));
    }
    let info = parse_probe(&probe.stdout)?;

    info!(
      "打开输入源 {}: {}x{} @ {:.2} fps",
      locator, info.width, info.height, info.fps
    );

    let mut child = Command::new(ffmpeg)
      .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
      .args(&input)
      .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::null())
      .spawn()
      .map_err(|e| InputError::open(locator, format!("无法执行 ffmpeg: {}", e)))?;

    let stdout = match child.stdout.take() {
      Some(stdout) => BufReader::new(stdout),
      None => {
        let _ = child.kill();
        let _ = child.wait();
        return Err(InputError::open(locator, "无法获取 ffmpeg 标准输出"));
      }
    };

    Ok(Self {
      child,
      stdout,
      info,
      next_index: 0,
      finished: false,
    })
  }
}

impl Iterator for FfmpegInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    let mut data = vec![0u8; self.info.frame_size()];
    match self.stdout.read_exact(&mut data) {
      Ok(()) => {
        let index = self.next_index;
        self.next_index += 1;
        debug!("读取第 {} 帧", index);
        Some(
          Frame::from_rgb24(index, self.info.width, self.info.height, data)
            .map_err(InputError::from),
        )
      }
      Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
        debug!("输入源结束，共 {} 帧", self.next_index);
        self.finished = true;
        None
      }
      Err(e) => {
        self.finished = true;
        Some(Err(e.into()))
      }
    }
  }
}

impl VideoSource for FfmpegInput {
  fn info(&self) -> StreamInfo {
    self.info
  }
}

impl Drop for FfmpegInput {
  fn drop(&mut self) {
    if let Err(e) = self.child.kill() {
      if e.kind() != ErrorKind::InvalidInput {
        warn!("停止 ffmpeg 解码进程失败: {}", e);
      }
    }
    let _ = self.child.wait();
  }
}
