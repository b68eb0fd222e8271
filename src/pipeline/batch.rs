// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// src/pipeline/batch.rs - 上传视频的批处理
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

//! 逐帧推理、标注并写入中间视频，最后转码为浏览器可播放的 MP4。
//!
//! 输出目录中的文件：
//! - `temp_<stem>.mp4`：中间文件，无论成功与否都会删除
//! - `processed_<stem>.mp4`：最终结果

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::{
  backend::Backend,
  frame::StreamInfo,
  input::{SourceLocator, VideoSource},
  model::SharedModel,
  output::{
    OutputError,
    draw::{Draw, LabelMode},
  },
  pipeline::{CountAccumulator, PipelineError, RunAnalytics},
};

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutput {
  pub artifact: PathBuf,
  pub analytics: RunAnalytics,
}

#[derive(Clone)]
pub struct BatchPipeline {
  model: SharedModel,
  backend: Arc<dyn Backend>,
  draw: Arc<Draw>,
}

fn file_stem(source: &Path) -> String {
  source
    .file_stem()
    .map(|stem| stem.to_string_lossy().into_owned())
    .unwrap_or_else(|| String::from("video"))
}

impl BatchPipeline {
  pub fn new(model: SharedModel, backend: Arc<dyn Backend>, draw: Arc<Draw>) -> Self {
    Self {
      model,
      backend,
      draw,
    }
  }

  /// `<output_dir>/processed_<stem>.mp4`
  pub fn artifact_path(source: &Path, output_dir: &Path) -> PathBuf {
    output_dir.join(format!("processed_{}.mp4", file_stem(source)))
  }

  fn raw_path(source: &Path, output_dir: &Path) -> PathBuf {
    output_dir.join(format!("temp_{}.mp4", file_stem(source)))
  }

  pub fn process(&self, source: &Path, output_dir: &Path) -> Result<BatchOutput, PipelineError> {
    let locator = SourceLocator::file(source);
    let input = self
      .backend
      .open_source(&locator)
      .map_err(PipelineError::SourceUnavailable)?;

    std::fs::create_dir_all(output_dir)
      .map_err(|e| PipelineError::SinkUnavailable(OutputError::open(output_dir, e)))?;
    let raw = Self::raw_path(source, output_dir);
    let artifact = Self::artifact_path(source, output_dir);

    let started = Instant::now();
    let result = self.encode_frames(input, &raw).and_then(|analytics| {
      if let Err(e) = self.backend.reencode(&raw, &artifact) {
        // 只清理本次转码留下的不完整结果，之前的结果在转码前保持不动
        if artifact.exists() {
          if let Err(e) = std::fs::remove_file(&artifact) {
            warn!("删除不完整的结果 {} 失败: {}", artifact.display(), e);
          }
        }
        return Err(PipelineError::ReencodeFailed(e));
      }
      Ok(analytics)
    });

    if let Err(e) = std::fs::remove_file(&raw) {
      debug!("删除中间文件 {} 失败: {}", raw.display(), e);
    }

    let analytics = result?;
    info!(
      "处理完成 {} -> {}，共 {} 帧，峰值 {} 人，平均 {} 人，耗时 {:.2?}",
      source.display(),
      artifact.display(),
      analytics.total_frames,
      analytics.peak_count,
      analytics.average_count,
      started.elapsed()
    );
    Ok(BatchOutput {
      artifact,
      analytics,
    })
  }

  fn encode_frames(
    &self,
    mut input: Box<dyn VideoSource>,
    raw: &Path,
  ) -> Result<RunAnalytics, PipelineError> {
    let info: StreamInfo = input.info();
    let mut sink = self
      .backend
      .open_sink(raw, &info)
      .map_err(PipelineError::SinkUnavailable)?;

    let mut counts = CountAccumulator::default();
    for frame in input.by_ref() {
      let frame = match frame {
        Ok(frame) => frame,
        Err(e) => {
          warn!("读取第 {} 帧失败，视为输入结束: {}", counts.frames(), e);
          break;
        }
      };

      let result = self.model.infer(&frame)?;
      let count = result.person_count();
      counts.push(count);
      debug!("第 {} 帧: {} 人", frame.index, count);

      let image = self.draw.annotate(frame.image, &result, LabelMode::Class);
      let image = self.draw.overlay_summary(image, count);
      sink
        .write_frame(&image)
        .map_err(PipelineError::SinkWrite)?;
    }
    // 转码前先释放输入源并关闭中间文件
    drop(input);
    sink.finish().map_err(PipelineError::SinkWrite)?;

    Ok(counts.finish())
  }
}
