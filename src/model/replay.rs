// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// src/model/replay.rs - 检测结果回放模型
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

//! 按帧序号回放检测结果。
//!
//! 脚本文件为 JSON Lines 格式，第 N 行对应第 N 帧（从 0 开始），
//! 每行是一个 `DetectItem` 数组，空行表示该帧没有检测结果：
//!
//! ```text
//! [{"class_id":0,"score":0.91,"bbox":[10,20,60,180]}]
//!
//! [{"class_id":0,"score":0.88,"bbox":[12,21,62,181],"track_id":7}]
//! ```

use std::io::BufRead;
use std::sync::Arc;

use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{DetectItem, DetectResult, Model, ModelError},
};

#[derive(Debug, Clone, Default)]
pub struct ReplayModel {
  frames: Arc<[Box<[DetectItem]>]>,
}

impl ReplayModel {
  pub fn new(frames: Vec<Vec<DetectItem>>) -> Self {
    Self {
      frames: frames
        .into_iter()
        .map(Vec::into_boxed_slice)
        .collect::<Vec<_>>()
        .into(),
    }
  }

  pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, ModelError> {
    let mut frames = Vec::new();
    for (index, line) in reader.lines().enumerate() {
      let line = line?;
      let line = line.trim();
      if line.is_empty() {
        frames.push(Vec::new());
        continue;
      }
      let items: Vec<DetectItem> = serde_json::from_str(line).map_err(|source| {
        ModelError::Script {
          line: index + 1,
          source,
        }
      })?;
      frames.push(items);
    }
    Ok(Self::new(frames))
  }

  pub fn frame_count(&self) -> usize {
    self.frames.len()
  }
}

impl FromUrlWithScheme for ReplayModel {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayModel {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::SchemeMismatch(url.scheme().to_string()));
    }

    info!("加载检测脚本: {}", url.path());
    let file = std::fs::File::open(url.path())?;
    let model = Self::from_reader(std::io::BufReader::new(file))?;
    info!("检测脚本加载完成，共 {} 帧", model.frame_count());
    Ok(model)
  }
}

impl Model for ReplayModel {
  type Input = Frame;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, input: &Frame) -> Result<DetectResult, ModelError> {
    let items = usize::try_from(input.index)
      .ok()
      .and_then(|index| self.frames.get(index))
      .map(|items| items.to_vec())
      .unwrap_or_default();
    Ok(DetectResult::from(items))
  }
}
