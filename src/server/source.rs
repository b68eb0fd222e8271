// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// src/server/source.rs - 请求参数解析
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

use url::Url;

use crate::{input::SourceLocator, server::ApiError};

/// 直播源选择
///
/// - `webcam`：配置的摄像头
/// - 十进制数字：指定编号的摄像头
/// - `cctv`：配置的网络摄像头地址
/// - 百分号编码的 `rtsp://`、`http(s)://` 地址
///
/// 不接受本地路径。
pub fn resolve_source(
  raw_selector: &str,
  webcam_index: u32,
  cctv_url: Option<&Url>,
) -> Result<SourceLocator, ApiError> {
  let selector = urlencoding::decode(raw_selector)
    .map_err(|_| ApiError::InvalidSelector(raw_selector.to_string()))?;
  let selector = selector.trim();

  match selector {
    "webcam" => return Ok(SourceLocator::Webcam(webcam_index)),
    "cctv" => {
      return cctv_url
        .cloned()
        .map(SourceLocator::Network)
        .ok_or_else(|| ApiError::UnknownSource("cctv".to_string()));
    }
    _ => {}
  }

  if let Ok(index) = selector.parse::<u32>() {
    return Ok(SourceLocator::Webcam(index));
  }

  match Url::parse(selector) {
    Ok(url) if matches!(url.scheme(), "rtsp" | "rtsps" | "http" | "https") => {
      Ok(SourceLocator::Network(url))
    }
    _ => Err(ApiError::UnknownSource(selector.to_string())),
  }
}

/// 只保留 ASCII 字母数字与 `._-`，空白变为 `_`，去掉目录部分和首尾的 `._`
pub fn secure_filename(name: &str) -> String {
  let name = name.replace(['/', '\\'], " ");
  let joined = name.split_whitespace().collect::<Vec<_>>().join("_");
  let filtered: String = joined
    .chars()
    .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    .collect();
  filtered.trim_matches(|c| c == '.' || c == '_').to_string()
}
