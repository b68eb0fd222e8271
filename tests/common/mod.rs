// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// tests/common/mod.rs - 测试用的内存后端与模型
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

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use image::RgbImage;

use crowd_pulse::{
  backend::Backend,
  frame::{Frame, StreamInfo},
  input::{InputError, MemorySource, SourceLocator, VideoSource},
  model::{DetectItem, DetectResult, Model, ModelError, ReplayModel, SharedModel},
  output::{FrameSink, OutputError, draw::Draw},
  pipeline::BatchPipeline,
};

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;

/// 测试结束时删除的临时目录
pub struct TempDir(PathBuf);

impl TempDir {
  pub fn new() -> Self {
    let path = std::env::temp_dir().join(format!("crowd-pulse-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&path).unwrap();
    Self(path)
  }

  pub fn path(&self) -> &Path {
    &self.0
  }
}

impl Drop for TempDir {
  fn drop(&mut self) {
    let _ = std::fs::remove_dir_all(&self.0);
  }
}

/// 内存中的视频后端，可按需模拟各个环节失败
#[derive(Default)]
pub struct MemoryBackend {
  pub frames: usize,
  pub fail_open: bool,
  pub fail_sink: bool,
  pub fail_reencode: bool,
  pub read_error: bool,
  /// 非空时按这些尺寸逐帧生成，忽略 `frames`
  pub frame_sizes: Vec<(u32, u32)>,
  pub opened: Arc<AtomicUsize>,
  pub released: Arc<AtomicBool>,
  pub written: Arc<AtomicUsize>,
}

impl MemoryBackend {
  pub fn with_frames(frames: usize) -> Self {
    Self {
      frames,
      ..Self::default()
    }
  }

  pub fn with_frame_sizes(sizes: &[(u32, u32)]) -> Self {
    Self {
      frame_sizes: sizes.to_vec(),
      ..Self::default()
    }
  }

  pub fn info() -> StreamInfo {
    StreamInfo::new(WIDTH, HEIGHT, 25.0)
  }

  pub fn opened(&self) -> usize {
    self.opened.load(Ordering::SeqCst)
  }

  pub fn released(&self) -> bool {
    self.released.load(Ordering::SeqCst)
  }

  pub fn written(&self) -> usize {
    self.written.load(Ordering::SeqCst)
  }
}

impl Backend for MemoryBackend {
  fn open_source(&self, locator: &SourceLocator) -> Result<Box<dyn VideoSource>, InputError> {
    self.opened.fetch_add(1, Ordering::SeqCst);
    if self.fail_open {
      return Err(InputError::open(locator, "模拟的打开失败"));
    }
    let source = if self.frame_sizes.is_empty() {
      MemorySource::blank(Self::info(), self.frames)
    } else {
      let images = self
        .frame_sizes
        .iter()
        .map(|&(width, height)| RgbImage::new(width, height))
        .collect();
      MemorySource::new(Self::info(), images)
    };
    let mut source = source.with_release_flag(self.released.clone());
    if self.read_error {
      source = source.with_read_error();
    }
    Ok(Box::new(source))
  }

  fn open_sink(&self, path: &Path, info: &StreamInfo) -> Result<Box<dyn FrameSink>, OutputError> {
    if self.fail_sink {
      return Err(OutputError::open(path, "模拟的输出失败"));
    }
    Ok(Box::new(MemorySink {
      path: path.to_path_buf(),
      info: *info,
      frames: 0,
      written: self.written.clone(),
    }))
  }

  fn reencode(&self, raw: &Path, output: &Path) -> Result<(), OutputError> {
    if self.fail_reencode {
      // 模拟转码进程写了一半后失败
      std::fs::write(output, b"partial")?;
      return Err(OutputError::Encoding("ffmpeg 退出 (exit status: 1)".to_string()));
    }
    std::fs::copy(raw, output)?;
    Ok(())
  }
}

pub struct MemorySink {
  path: PathBuf,
  info: StreamInfo,
  frames: usize,
  written: Arc<AtomicUsize>,
}

impl FrameSink for MemorySink {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    assert_eq!(image.dimensions(), (self.info.width, self.info.height));
    self.frames += 1;
    self.written.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  fn finish(self: Box<Self>) -> Result<(), OutputError> {
    std::fs::write(&self.path, format!("{} frames", self.frames))?;
    Ok(())
  }
}

pub fn people(count: usize) -> Vec<DetectItem> {
  (0..count)
    .map(|i| {
      let x = (i * 6) as f32;
      DetectItem::person([x, 10.0, x + 5.0, 40.0])
    })
    .collect()
}

/// 第 N 帧返回 `counts[N]` 个人
pub fn scripted(counts: &[usize]) -> SharedModel {
  Arc::new(ReplayModel::new(
    counts.iter().map(|&count| people(count)).collect(),
  ))
}

pub fn null_model() -> SharedModel {
  Arc::new(ReplayModel::default())
}

/// 指定帧推理失败
pub struct FailingModel {
  pub fail_on: Vec<u64>,
}

impl Model for FailingModel {
  type Input = Frame;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, input: &Frame) -> Result<DetectResult, ModelError> {
    if self.fail_on.contains(&input.index) {
      return Err(ModelError::Inference(format!("第 {} 帧推理失败", input.index)));
    }
    Ok(DetectResult::from(people(1)))
  }
}

/// 推理时直接 panic
pub struct PanickingModel;

impl Model for PanickingModel {
  type Input = Frame;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, _input: &Frame) -> Result<DetectResult, ModelError> {
    panic!("模型崩溃");
  }
}

pub fn pipeline(model: SharedModel, backend: Arc<MemoryBackend>) -> BatchPipeline {
  BatchPipeline::new(model, backend, Arc::new(Draw::default()))
}
