// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// tests/task_runner.rs - 后台任务测试
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

use std::path::PathBuf;
use std::sync::Arc;

use crowd_pulse::{
  model::SharedModel,
  pipeline::RunAnalytics,
  task::{TaskRegistry, TaskRunner, TaskStatus},
};

use common::{MemoryBackend, PanickingModel, TempDir, null_model, pipeline, scripted};

fn runner(dir: &TempDir, model: SharedModel, backend: MemoryBackend) -> TaskRunner {
  TaskRunner::new(
    TaskRegistry::new(),
    pipeline(model, Arc::new(backend)),
    dir.path().to_path_buf(),
  )
}

#[tokio::test]
async fn successful_job_completes_with_artifact_and_analytics() {
  let dir = TempDir::new();
  let runner = runner(&dir, scripted(&[2, 5, 3]), MemoryBackend::with_frames(3));

  let (id, handle) = runner.spawn(PathBuf::from("static/uploads/abc_clip.mp4"));
  handle.await.unwrap();

  let task = runner.registry().get(&id).unwrap();
  assert_eq!(task.status, TaskStatus::Complete);
  assert_eq!(
    task.result_path.as_deref(),
    Some("processed/processed_abc_clip.mp4")
  );

  let stored = std::fs::read(runner.analytics_path(&id)).unwrap();
  let analytics: RunAnalytics = serde_json::from_slice(&stored).unwrap();
  assert_eq!(analytics, RunAnalytics::from_counts(&[2, 5, 3]));
  assert_eq!(runner.analytics_path(&id), dir.path().join(format!("{}.json", id)));
}

#[tokio::test]
async fn submit_returns_immediately_as_processing() {
  let dir = TempDir::new();
  let runner = runner(&dir, null_model(), MemoryBackend::with_frames(1)).with_max_jobs(1);
  // 提交后立即可以查询
  let id = runner.submit(PathBuf::from("clip.mp4"));
  let status = runner.registry().get(&id).unwrap().status;
  assert!(matches!(
    status,
    TaskStatus::Processing | TaskStatus::Complete
  ));
}

#[tokio::test]
async fn unopenable_source_fails_the_task() {
  let dir = TempDir::new();
  let backend = MemoryBackend {
    fail_open: true,
    ..MemoryBackend::with_frames(3)
  };
  let runner = runner(&dir, null_model(), backend);

  let (id, handle) = runner.spawn(PathBuf::from("missing.mp4"));
  handle.await.unwrap();

  let task = runner.registry().get(&id).unwrap();
  assert_eq!(task.status, TaskStatus::Failed);
  assert_eq!(task.result_path, None);
  assert!(!runner.analytics_path(&id).exists());
}

#[tokio::test]
async fn reencode_failure_fails_the_task() {
  let dir = TempDir::new();
  let backend = MemoryBackend {
    fail_reencode: true,
    ..MemoryBackend::with_frames(2)
  };
  let runner = runner(&dir, null_model(), backend);

  let (id, handle) = runner.spawn(PathBuf::from("clip.mp4"));
  handle.await.unwrap();

  assert_eq!(runner.registry().get(&id).unwrap().status, TaskStatus::Failed);
  assert!(!dir.path().join("processed_clip.mp4").exists());
}

#[tokio::test]
async fn panicking_job_is_reported_as_failed() {
  let dir = TempDir::new();
  let runner = runner(&dir, Arc::new(PanickingModel), MemoryBackend::with_frames(2));

  let (id, handle) = runner.spawn(PathBuf::from("clip.mp4"));
  // 后台任务本身不会 panic
  handle.await.unwrap();

  let task = runner.registry().get(&id).unwrap();
  assert_eq!(task.status, TaskStatus::Failed);
  assert_eq!(task.result_path, None);
}

#[tokio::test]
async fn limited_runner_finishes_every_job() {
  let dir = TempDir::new();
  let runner = runner(&dir, null_model(), MemoryBackend::with_frames(2)).with_max_jobs(1);

  let jobs: Vec<_> = (0..4)
    .map(|i| runner.spawn(PathBuf::from(format!("clip{}.mp4", i))))
    .collect();
  for (id, handle) in jobs {
    handle.await.unwrap();
    let task = runner.registry().get(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Complete);
    assert!(runner.analytics_path(&id).is_file());
  }
  assert_eq!(runner.registry().len(), 4);
}
