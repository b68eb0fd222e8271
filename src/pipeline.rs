// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// src/pipeline.rs - 视频处理流水线
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

use thiserror::Error;

use crate::{input::InputError, model::ModelError, output::OutputError};

mod analytics;
pub use self::analytics::{CountAccumulator, RunAnalytics};

mod batch;
pub use self::batch::{BatchOutput, BatchPipeline};

mod live;
pub use self::live::LiveStream;

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("无法打开输入源: {0}")]
  SourceUnavailable(#[source] InputError),
  #[error("无法创建输出视频: {0}")]
  SinkUnavailable(#[source] OutputError),
  #[error("转码失败: {0}")]
  ReencodeFailed(#[source] OutputError),
  #[error("帧编码失败: {0}")]
  EncodeFrameFailed(#[source] OutputError),
  #[error("推理失败: {0}")]
  Inference(#[from] ModelError),
  #[error("写入输出视频失败: {0}")]
  SinkWrite(#[source] OutputError),
}
