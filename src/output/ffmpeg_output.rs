// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// src/output/ffmpeg_output.rs - 中间视频文件输出
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

//! 将 RGB24 帧通过标准输入写给 ffmpeg，生成 MPEG-4 Part 2 的中间 MP4 文件。
//! 该文件不保证浏览器可播放，需要再经过 [`Reencoder`](super::Reencoder) 转码。

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use image::RgbImage;
use tracing::{debug, error, info, warn};

use crate::{
  frame::StreamInfo,
  output::{FrameSink, OutputError},
};

pub struct FfmpegVideoOutput {
  child: Option<Child>,
  stdin: Option<ChildStdin>,
  path: PathBuf,
  info: StreamInfo,
  frames_written: u64,
}

impl FfmpegVideoOutput {
  pub fn open(ffmpeg: &Path, path: &Path, info: &StreamInfo) -> Result<Self, OutputError> {
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent).map_err(|e| OutputError::open(path, e))?;
      }
    }

    let mut child = Command::new(ffmpeg)
      .args(["-y", "-hide_banner", "-loglevel", "error"])
      .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
      .arg("-s")
      .arg(format!("{}x{}", info.width, info.height))
      .arg("-r")
      .arg(format!("{}", info.fps))
      .args(["-i", "-", "-an", "-c:v", "mpeg4", "-q:v", "5"])
      .arg(path)
      .stdin(Stdio::piped())
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| OutputError::open(path, format!("无法执行 ffmpeg (请确保已安装): {}", e)))?;

    let stdin = child.stdin.take();
    if stdin.is_none() {
      let _ = child.kill();
      let _ = child.wait();
      return Err(OutputError::open(path, "无法获取 ffmpeg 标准输入"));
    }

    info!(
      "视频输出已创建: {}x{} @ {:.2} fps -> {}",
      info.width,
      info.height,
      info.fps,
      path.display()
    );

    Ok(Self {
      child: Some(child),
      stdin,
      path: path.to_path_buf(),
      info: *info,
      frames_written: 0,
    })
  }
}

impl FrameSink for FfmpegVideoOutput {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    if image.width() != self.info.width || image.height() != self.info.height {
      return Err(OutputError::Encoding(format!(
        "帧尺寸 {}x{} 与输出 {}x{} 不一致",
        image.width(),
        image.height(),
        self.info.width,
        self.info.height
      )));
    }

    let stdin = self
      .stdin
      .as_mut()
      .ok_or_else(|| OutputError::Encoding("输出已关闭".to_string()))?;
    stdin.write_all(image.as_raw()).map_err(|e| {
      if e.kind() == ErrorKind::BrokenPipe {
        OutputError::Encoding("ffmpeg 编码进程提前退出".to_string())
      } else {
        OutputError::Io(e)
      }
    })?;
    self.frames_written += 1;
    debug!("写入第 {} 帧", self.frames_written);
    Ok(())
  }

  fn finish(mut self: Box<Self>) -> Result<(), OutputError> {
    // 关闭标准输入，ffmpeg 收到 EOF 后写完文件尾
    drop(self.stdin.take());
    let child = self
      .child
      .take()
      .ok_or_else(|| OutputError::Encoding("输出已关闭".to_string()))?;
    let output = child.wait_with_output()?;
    if output.status.success() {
      info!(
        "视频输出关闭，共写入 {} 帧: {}",
        self.frames_written,
        self.path.display()
      );
      Ok(())
    } else {
      let stderr = String::from_utf8_lossy(&output.stderr);
      error!("ffmpeg 错误: {}", stderr);
      Err(OutputError::Encoding(format!("ffmpeg 失败: {}", stderr.trim())))
    }
  }
}

impl Drop for FfmpegVideoOutput {
  fn drop(&mut self) {
    // 未正常 finish 时结束子进程
    if let Some(mut child) = self.child.take() {
      drop(self.stdin.take());
      if let Err(e) = child.kill() {
        warn!("停止 ffmpeg 编码进程失败: {}", e);
      }
      let _ = child.wait();
    }
  }
}
