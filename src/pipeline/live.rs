// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// src/pipeline/live.rs - 直播流标注
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

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::{
  backend::Backend,
  frame::Frame,
  input::{SourceLocator, VideoSource},
  model::{IouTracker, SharedModel, Tracker},
  output::{
    draw::{Draw, LabelMode},
    mjpeg::{DEFAULT_JPEG_QUALITY, encode_jpeg, multipart_payload},
  },
  pipeline::PipelineError,
};

enum LiveState {
  Pending,
  Running(Box<dyn VideoSource>),
  Finished,
}

/// 惰性的 MJPEG 分片序列。
///
/// 第一次 `next` 时才打开输入源；输入结束、读取失败或迭代器被 drop 时释放输入源。
/// 结束后不可重新开始。
pub struct LiveStream {
  locator: SourceLocator,
  backend: Arc<dyn Backend>,
  model: SharedModel,
  draw: Arc<Draw>,
  tracker: IouTracker,
  jpeg_quality: u8,
  state: LiveState,
  emitted: u64,
}

impl LiveStream {
  pub fn new(
    locator: SourceLocator,
    backend: Arc<dyn Backend>,
    model: SharedModel,
    draw: Arc<Draw>,
  ) -> Self {
    Self {
      locator,
      backend,
      model,
      draw,
      tracker: IouTracker::default(),
      jpeg_quality: DEFAULT_JPEG_QUALITY,
      state: LiveState::Pending,
      emitted: 0,
    }
  }

  pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
    self.jpeg_quality = quality;
    self
  }

  pub fn is_finished(&self) -> bool {
    matches!(self.state, LiveState::Finished)
  }

  fn close(&mut self) {
    // 替换状态即 drop 输入源
    self.state = LiveState::Finished;
    info!("直播流 {} 结束，共输出 {} 帧", self.locator, self.emitted);
  }

  fn render(&mut self, frame: Frame) -> Result<Vec<u8>, PipelineError> {
    let result = self.model.infer(&frame)?;
    let result = self.tracker.update(result);
    let count = result.person_count();
    debug!("直播第 {} 帧: {} 人", frame.index, count);

    let image = self.draw.annotate(frame.image, &result, LabelMode::Track);
    let image = self.draw.overlay_summary(image, count);
    let jpeg = encode_jpeg(&image, self.jpeg_quality).map_err(PipelineError::EncodeFrameFailed)?;
    Ok(multipart_payload(&jpeg))
  }
}

impl Iterator for LiveStream {
  type Item = Vec<u8>;

  fn next(&mut self) -> Option<Self::Item> {
    if matches!(self.state, LiveState::Pending) {
      self.state = match self.backend.open_source(&self.locator) {
        Ok(source) => {
          let info = source.info();
          info!(
            "直播流 {} 已打开: {}x{} @ {:.2} fps",
            self.locator, info.width, info.height, info.fps
          );
          LiveState::Running(source)
        }
        Err(e) => {
          error!("无法打开直播源 {}: {}", self.locator, e);
          LiveState::Finished
        }
      };
    }

    loop {
      let next = match &mut self.state {
        LiveState::Running(source) => source.next(),
        _ => return None,
      };
      let frame = match next {
        Some(Ok(frame)) => frame,
        Some(Err(e)) => {
          warn!("直播源 {} 读取失败: {}", self.locator, e);
          self.close();
          return None;
        }
        None => {
          self.close();
          return None;
        }
      };

      let index = frame.index;
      match self.render(frame) {
        Ok(payload) => {
          self.emitted += 1;
          return Some(payload);
        }
        Err(e) => warn!("跳过直播第 {} 帧: {}", index, e),
      }
    }
  }
}
