// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// tests/batch_pipeline.rs - 批处理流水线测试
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

mod common;

use std::path::Path;
use std::sync::Arc;

use crowd_pulse::pipeline::{BatchPipeline, PipelineError, RunAnalytics};

use common::{FailingModel, MemoryBackend, TempDir, null_model, pipeline, scripted};

#[test]
fn counts_drive_run_analytics() {
  let dir = TempDir::new();
  let backend = Arc::new(MemoryBackend::with_frames(3));
  let output = pipeline(scripted(&[2, 5, 3]), backend.clone())
    .process(Path::new("uploads/clip.mp4"), dir.path())
    .unwrap();

  assert_eq!(
    output.analytics,
    RunAnalytics {
      peak_count: 5,
      average_count: 3.33,
      total_frames: 3
    }
  );
  assert_eq!(output.artifact, dir.path().join("processed_clip.mp4"));
  assert!(output.artifact.is_file());
  assert_eq!(backend.written(), 3);
  assert!(backend.released());
}

#[test]
fn raw_intermediate_is_removed() {
  let dir = TempDir::new();
  let backend = Arc::new(MemoryBackend::with_frames(2));
  let output = pipeline(null_model(), backend)
    .process(Path::new("clip.mp4"), dir.path())
    .unwrap();

  assert!(!dir.path().join("temp_clip.mp4").exists());
  assert_ne!(output.artifact, dir.path().join("temp_clip.mp4"));
}

#[test]
fn no_people_anywhere() {
  let dir = TempDir::new();
  let backend = Arc::new(MemoryBackend::with_frames(7));
  let output = pipeline(null_model(), backend)
    .process(Path::new("empty.mp4"), dir.path())
    .unwrap();

  assert_eq!(
    output.analytics,
    RunAnalytics {
      peak_count: 0,
      average_count: 0.0,
      total_frames: 7
    }
  );
}

#[test]
fn zero_frame_video() {
  let dir = TempDir::new();
  let backend = Arc::new(MemoryBackend::with_frames(0));
  let output = pipeline(scripted(&[4]), backend)
    .process(Path::new("blank.mp4"), dir.path())
    .unwrap();
  assert_eq!(output.analytics.total_frames, 0);
  assert_eq!(output.analytics.peak_count, 0);
}

#[test]
fn deterministic_detector_gives_identical_runs() {
  let dir = TempDir::new();
  let model = scripted(&[1, 4, 4, 0, 2]);
  let first = pipeline(model.clone(), Arc::new(MemoryBackend::with_frames(5)))
    .process(Path::new("a.mp4"), dir.path())
    .unwrap();
  let second = pipeline(model, Arc::new(MemoryBackend::with_frames(5)))
    .process(Path::new("a.mp4"), dir.path())
    .unwrap();
  assert_eq!(first, second);
}

#[test]
fn total_frames_ignores_detection_script_length() {
  let dir = TempDir::new();
  // 脚本只有 2 帧，视频有 6 帧
  let output = pipeline(scripted(&[3, 3]), Arc::new(MemoryBackend::with_frames(6)))
    .process(Path::new("long.mp4"), dir.path())
    .unwrap();
  assert_eq!(output.analytics.total_frames, 6);
  assert_eq!(output.analytics.peak_count, 3);
  assert_eq!(output.analytics.average_count, 1.0);
}

#[test]
fn read_error_ends_the_video() {
  let dir = TempDir::new();
  let backend = Arc::new(MemoryBackend {
    read_error: true,
    ..MemoryBackend::with_frames(4)
  });
  let output = pipeline(null_model(), backend)
    .process(Path::new("broken.mp4"), dir.path())
    .unwrap();
  assert_eq!(output.analytics.total_frames, 4);
}

#[test]
fn unopenable_source() {
  let dir = TempDir::new();
  let backend = Arc::new(MemoryBackend {
    fail_open: true,
    ..MemoryBackend::with_frames(3)
  });
  let err = pipeline(null_model(), backend)
    .process(Path::new("missing.mp4"), dir.path())
    .unwrap_err();
  assert!(matches!(err, PipelineError::SourceUnavailable(_)));
  assert!(!BatchPipeline::artifact_path(Path::new("missing.mp4"), dir.path()).exists());
}

#[test]
fn unopenable_sink_releases_source() {
  let dir = TempDir::new();
  let backend = Arc::new(MemoryBackend {
    fail_sink: true,
    ..MemoryBackend::with_frames(3)
  });
  let err = pipeline(null_model(), backend.clone())
    .process(Path::new("clip.mp4"), dir.path())
    .unwrap_err();
  assert!(matches!(err, PipelineError::SinkUnavailable(_)));
  assert!(backend.released());
  assert_eq!(backend.written(), 0);
}

#[test]
fn reencode_failure_leaves_no_artifact() {
  let dir = TempDir::new();
  let backend = Arc::new(MemoryBackend {
    fail_reencode: true,
    ..MemoryBackend::with_frames(3)
  });
  let err = pipeline(scripted(&[1, 1, 1]), backend)
    .process(Path::new("clip.mp4"), dir.path())
    .unwrap_err();
  assert!(matches!(err, PipelineError::ReencodeFailed(_)));
  assert!(!dir.path().join("processed_clip.mp4").exists());
  assert!(!dir.path().join("temp_clip.mp4").exists());
}

#[test]
fn inference_failure_aborts_the_job() {
  let dir = TempDir::new();
  let backend = Arc::new(MemoryBackend::with_frames(4));
  let err = pipeline(Arc::new(FailingModel { fail_on: vec![2] }), backend.clone())
    .process(Path::new("clip.mp4"), dir.path())
    .unwrap_err();
  assert!(matches!(err, PipelineError::Inference(_)));
  assert_eq!(backend.written(), 2);
  assert!(backend.released());
  assert!(!dir.path().join("processed_clip.mp4").exists());
  assert!(!dir.path().join("temp_clip.mp4").exists());
}

#[test]
fn output_directory_is_created() {
  let dir = TempDir::new();
  let nested = dir.path().join("a").join("b");
  let output = pipeline(null_model(), Arc::new(MemoryBackend::with_frames(1)))
    .process(Path::new("clip.mp4"), &nested)
    .unwrap();
  assert!(output.artifact.starts_with(&nested));
  assert!(output.artifact.is_file());
}

#[test]
fn failed_rerun_keeps_previous_artifact() {
  let dir = TempDir::new();
  let first = pipeline(null_model(), Arc::new(MemoryBackend::with_frames(2)))
    .process(Path::new("clip.mp4"), dir.path())
    .unwrap();
  assert_eq!(std::fs::read(&first.artifact).unwrap(), b"2 frames");

  // 推理失败时转码没有运行，之前的结果保留
  let err = pipeline(
    Arc::new(FailingModel { fail_on: vec![0] }),
    Arc::new(MemoryBackend::with_frames(3)),
  )
  .process(Path::new("clip.mp4"), dir.path())
  .unwrap_err();
  assert!(matches!(err, PipelineError::Inference(_)));
  assert_eq!(std::fs::read(&first.artifact).unwrap(), b"2 frames");

  // 打不开输出时同样保留
  let err = pipeline(
    null_model(),
    Arc::new(MemoryBackend {
      fail_sink: true,
      ..MemoryBackend::with_frames(3)
    }),
  )
  .process(Path::new("clip.mp4"), dir.path())
  .unwrap_err();
  assert!(matches!(err, PipelineError::SinkUnavailable(_)));
  assert_eq!(std::fs::read(&first.artifact).unwrap(), b"2 frames");
}
