// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// src/output/reencode.rs - 浏览器兼容转码
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

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{error, info};

use crate::output::OutputError;

/// H.264 + yuv420p + faststart，强制覆盖输出
pub fn reencode_args(raw: &Path, output: &Path) -> Vec<OsString> {
  let mut args: Vec<OsString> = vec!["-i".into(), raw.as_os_str().to_os_string()];
  args.extend(
    [
      "-vcodec",
      "libx264",
      "-pix_fmt",
      "yuv420p",
      "-movflags",
      "+faststart",
      "-y",
    ]
    .map(OsString::from),
  );
  args.push(output.as_os_str().to_os_string());
  args
}

#[derive(Debug, Clone)]
pub struct Reencoder {
  ffmpeg: PathBuf,
}

impl Reencoder {
  pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
    Self {
      ffmpeg: ffmpeg.into(),
    }
  }

  pub fn reencode(&self, raw: &Path, output: &Path) -> Result<(), OutputError> {
    info!("转码 {} -> {}", raw.display(), output.display());
    let result = Command::new(&self.ffmpeg)
      .args(["-hide_banner", "-loglevel", "error"])
      .args(reencode_args(raw, output))
      .stdin(Stdio::null())
      .output()
      .map_err(|e| OutputError::Encoding(format!("无法执行 ffmpeg (请确保已安装): {}", e)))?;

    if result.status.success() {
      info!("视频编码成功: {}", output.display());
      Ok(())
    } else {
      let stderr = String::from_utf8_lossy(&result.stderr);
      error!("ffmpeg 错误: {}", stderr);
      Err(OutputError::Encoding(format!(
        "ffmpeg 退出 ({}): {}",
        result.status,
        stderr.trim()
      )))
    }
  }
}
