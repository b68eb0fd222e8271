// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// src/task.rs - 后台任务登记与执行
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

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::pipeline::{BatchOutput, BatchPipeline};

/// 结果文件对外的 URL 前缀
pub const PROCESSED_WEB_PREFIX: &str = "processed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
  pub fn new() -> Self {
    Self(Uuid::new_v4())
  }
}

impl Default for TaskId {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for TaskId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.0.fmt(f)
  }
}

impl FromStr for TaskId {
  type Err = uuid::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Uuid::parse_str(s).map(Self)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
  Processing,
  Complete,
  Failed,
}

impl TaskStatus {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, TaskStatus::Processing)
  }
}

/// 对外可见的任务记录，序列化为 `{"status": ..., "result_path": ...}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
  #[serde(skip)]
  pub id: TaskId,
  pub status: TaskStatus,
  pub result_path: Option<String>,
}

#[derive(Error, Debug, PartialEq)]
pub enum TaskError {
  #[error("任务不存在: {0}")]
  NotFound(TaskId),
  #[error("任务 {id} 已结束 ({status:?})，不能再次更新")]
  AlreadyFinished { id: TaskId, status: TaskStatus },
}

/// 任务表。每次更新都在写锁内整体替换一条记录，读者看不到中间状态。
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
  tasks: Arc<RwLock<HashMap<TaskId, Task>>>,
}

impl TaskRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn create(&self) -> TaskId {
    let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
    // UUID 冲突几乎不可能，仍然保证不会覆盖已有任务
    let mut id = TaskId::new();
    while tasks.contains_key(&id) {
      id = TaskId::new();
    }
    tasks.insert(
      id,
      Task {
        id,
        status: TaskStatus::Processing,
        result_path: None,
      },
    );
    id
  }

  pub fn get(&self, id: &TaskId) -> Result<Task, TaskError> {
    self
      .tasks
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(id)
      .cloned()
      .ok_or(TaskError::NotFound(*id))
  }

  pub fn complete(&self, id: &TaskId, result_path: String) -> Result<(), TaskError> {
    self.finish(id, TaskStatus::Complete, Some(result_path))
  }

  pub fn fail(&self, id: &TaskId) -> Result<(), TaskError> {
    self.finish(id, TaskStatus::Failed, None)
  }

  pub fn len(&self) -> usize {
    self.tasks.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn finish(
    &self,
    id: &TaskId,
    status: TaskStatus,
    result_path: Option<String>,
  ) -> Result<(), TaskError> {
    let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
    let task = tasks.get_mut(id).ok_or(TaskError::NotFound(*id))?;
    if task.status.is_terminal() {
      return Err(TaskError::AlreadyFinished {
        id: *id,
        status: task.status,
      });
    }
    *task = Task {
      id: *id,
      status,
      result_path,
    };
    Ok(())
  }
}

/// 在后台执行批处理，并把结果写回任务表
#[derive(Clone)]
pub struct TaskRunner {
  registry: TaskRegistry,
  pipeline: Arc<BatchPipeline>,
  processed_dir: PathBuf,
  limit: Option<Arc<Semaphore>>,
}

impl TaskRunner {
  pub fn new(registry: TaskRegistry, pipeline: BatchPipeline, processed_dir: PathBuf) -> Self {
    Self {
      registry,
      pipeline: Arc::new(pipeline),
      processed_dir,
      limit: None,
    }
  }

  /// 同时运行的任务上限，0 表示不限制
  pub fn with_max_jobs(mut self, max_jobs: usize) -> Self {
    self.limit = (max_jobs > 0).then(|| Arc::new(Semaphore::new(max_jobs)));
    self
  }

  pub fn registry(&self) -> &TaskRegistry {
    &self.registry
  }

  pub fn processed_dir(&self) -> &Path {
    &self.processed_dir
  }

  /// `<processed_dir>/<task id>.json`
  pub fn analytics_path(&self, id: &TaskId) -> PathBuf {
    self.processed_dir.join(format!("{}.json", id))
  }

  /// 登记任务并在后台开始处理，立即返回任务编号
  pub fn submit(&self, video_path: PathBuf) -> TaskId {
    self.spawn(video_path).0
  }

  /// 同 [`submit`](Self::submit)，同时返回后台任务的句柄
  pub fn spawn(&self, video_path: PathBuf) -> (TaskId, JoinHandle<()>) {
    let id = self.registry.create();
    info!("任务 {} 已创建: {}", id, video_path.display());
    let runner = self.clone();
    let handle = tokio::spawn(async move { runner.run(id, video_path).await });
    (id, handle)
  }

  async fn run(self, id: TaskId, video_path: PathBuf) {
    let _permit = match &self.limit {
      Some(limit) => match limit.clone().acquire_owned().await {
        Ok(permit) => Some(permit),
        Err(e) => {
          error!("任务 {} 无法获取执行许可: {}", id, e);
          self.mark_failed(&id);
          return;
        }
      },
      None => None,
    };

    info!("任务 {} 开始处理", id);
    let started = Instant::now();
    let pipeline = self.pipeline.clone();
    let output_dir = self.processed_dir.clone();
    let outcome =
      tokio::task::spawn_blocking(move || pipeline.process(&video_path, &output_dir)).await;

    match outcome {
      Ok(Ok(output)) => match self.persist(&id, &output).await {
        Ok(web_path) => {
          info!(
            "任务 {} 完成: {}，耗时 {:.2?}",
            id,
            web_path,
            started.elapsed()
          );
          if let Err(e) = self.registry.complete(&id, web_path) {
            warn!("更新任务状态失败: {}", e);
          }
        }
        Err(e) => {
          error!("任务 {} 保存统计结果失败: {}", id, e);
          self.mark_failed(&id);
        }
      },
      Ok(Err(e)) => {
        error!("任务 {} 失败: {}", id, e);
        self.mark_failed(&id);
      }
      Err(e) => {
        error!("任务 {} 异常退出: {}", id, e);
        self.mark_failed(&id);
      }
    }
  }

  /// 保存统计结果，失败时删除已生成的视频，不留下无人引用的结果
  async fn persist(&self, id: &TaskId, output: &BatchOutput) -> std::io::Result<String> {
    if let Err(e) = self.write_analytics(id, output).await {
      if let Err(e) = tokio::fs::remove_file(&output.artifact).await {
        warn!("删除结果 {} 失败: {}", output.artifact.display(), e);
      }
      return Err(e);
    }
    let file_name = output
      .artifact
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_default();
    Ok(format!("{}/{}", PROCESSED_WEB_PREFIX, file_name))
  }

  // 先写临时文件再改名，查询方不会读到写了一半的内容
  async fn write_analytics(&self, id: &TaskId, output: &BatchOutput) -> std::io::Result<()> {
    let json = serde_json::to_vec(&output.analytics)?;
    let path = self.analytics_path(id);
    let partial = path.with_extension("json.part");
    tokio::fs::write(&partial, json).await?;
    if let Err(e) = tokio::fs::rename(&partial, &path).await {
      let _ = tokio::fs::remove_file(&partial).await;
      return Err(e);
    }
    Ok(())
  }

  fn mark_failed(&self, id: &TaskId) {
    if let Err(e) = self.registry.fail(id) {
      warn!("更新任务状态失败: {}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn new_task_is_processing() {
    let registry = TaskRegistry::new();
    let id = registry.create();
    let task = registry.get(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Processing);
    assert_eq!(task.result_path, None);
    assert_eq!(registry.len(), 1);
  }

  #[test]
  fn ids_are_unique() {
    let registry = TaskRegistry::new();
    let a = registry.create();
    let b = registry.create();
    assert_ne!(a, b);
  }

  #[test]
  fn unknown_id_is_not_found() {
    let registry = TaskRegistry::new();
    let id = TaskId::new();
    assert_eq!(registry.get(&id), Err(TaskError::NotFound(id)));
    assert_eq!(registry.fail(&id), Err(TaskError::NotFound(id)));
  }

  #[test]
  fn terminal_status_never_reverts() {
    let registry = TaskRegistry::new();
    let id = registry.create();
    registry
      .complete(&id, "processed/processed_a.mp4".to_string())
      .unwrap();
    assert!(matches!(
      registry.fail(&id),
      Err(TaskError::AlreadyFinished {
        status: TaskStatus::Complete,
        ..
      })
    ));
    let task = registry.get(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Complete);
    assert_eq!(task.result_path.as_deref(), Some("processed/processed_a.mp4"));

    let failed = registry.create();
    registry.fail(&failed).unwrap();
    assert!(
      registry
        .complete(&failed, "processed/x.mp4".to_string())
        .is_err()
    );
    assert_eq!(registry.get(&failed).unwrap().result_path, None);
  }

  #[test]
  fn task_json_shape() {
    let registry = TaskRegistry::new();
    let id = registry.create();
    let json = serde_json::to_value(registry.get(&id).unwrap()).unwrap();
    assert_eq!(
      json,
      serde_json::json!({"status": "processing", "result_path": null})
    );
  }

  #[test]
  fn task_id_round_trips_through_text() {
    let id = TaskId::new();
    assert_eq!(id.to_string().parse::<TaskId>().unwrap(), id);
    assert!("not-a-uuid".parse::<TaskId>().is_err());
  }

  fn scratch_runner() -> TaskRunner {
    use crate::{backend::FfmpegBackend, model::ReplayModel, output::draw::Draw};

    let dir = std::env::temp_dir().join(format!("crowd-pulse-task-{}", Uuid::new_v4().simple()));
    std::fs::create_dir_all(&dir).unwrap();
    let pipeline = BatchPipeline::new(
      Arc::new(ReplayModel::new(Vec::new())),
      Arc::new(FfmpegBackend::default()),
      Arc::new(Draw::default()),
    );
    TaskRunner::new(TaskRegistry::new(), pipeline, dir)
  }

  fn sample_output(runner: &TaskRunner) -> BatchOutput {
    let artifact = runner.processed_dir().join("processed_clip.mp4");
    std::fs::write(&artifact, b"video").unwrap();
    BatchOutput {
      artifact,
      analytics: crate::pipeline::RunAnalytics::from_counts(&[2, 5, 3]),
    }
  }

  #[tokio::test]
  async fn analytics_are_written_whole() {
    let runner = scratch_runner();
    let id = TaskId::new();
    let output = sample_output(&runner);

    let web_path = runner.persist(&id, &output).await.unwrap();
    assert_eq!(web_path, "processed/processed_clip.mp4");
    let stored: serde_json::Value =
      serde_json::from_slice(&std::fs::read(runner.analytics_path(&id)).unwrap()).unwrap();
    assert_eq!(stored["total_frames"], 3);
    // 不留下临时文件
    let entries = std::fs::read_dir(runner.processed_dir()).unwrap().count();
    assert_eq!(entries, 2);

    std::fs::remove_dir_all(runner.processed_dir()).unwrap();
  }

  #[tokio::test]
  async fn unsaved_analytics_remove_the_artifact() {
    let runner = scratch_runner();
    let id = TaskId::new();
    let output = sample_output(&runner);
    // 目标位置被目录占用，改名必然失败
    std::fs::create_dir(runner.analytics_path(&id)).unwrap();

    assert!(runner.persist(&id, &output).await.is_err());
    assert!(!output.artifact.exists());
    assert!(!runner.analytics_path(&id).with_extension("json.part").exists());

    std::fs::remove_dir_all(runner.processed_dir()).unwrap();
  }
}
